//! Host probes for the network and disk checks

use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

/// Well-known endpoints tried to decide whether there is internet at all
const INTERNET_ENDPOINTS: &[(&str, u16)] = &[("1.1.1.1", 443), ("8.8.8.8", 53), ("9.9.9.9", 443)];

/// TCP reachability
pub trait NetworkProbe: Send + Sync {
    /// Whether a TCP connection to `host:port` succeeds
    fn can_connect(&self, host: &str, port: u16) -> bool;

    /// Whether any well-known public endpoint answers
    fn internet(&self) -> bool {
        INTERNET_ENDPOINTS
            .iter()
            .any(|(host, port)| self.can_connect(host, *port))
    }
}

/// Volume and directory sizes
pub trait DiskProbe: Send + Sync {
    /// Utilization of the volume holding `path`, 0-100
    fn used_percent(&self, path: &Path) -> Option<u8>;

    /// Total size of regular files under `path`, in bytes
    fn tree_size(&self, path: &Path) -> u64 {
        WalkDir::new(path)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| entry.metadata().ok())
            .filter(std::fs::Metadata::is_file)
            .map(|meta| meta.len())
            .sum()
    }
}

/// Plain TCP connect with a deadline
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// Probe giving up on each address after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl NetworkProbe for TcpProbe {
    fn can_connect(&self, host: &str, port: u16) -> bool {
        let Ok(addrs) = (host, port).to_socket_addrs() else {
            return false;
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.timeout).is_ok())
    }
}

/// `statvfs`-backed disk probe
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl DiskProbe for StatvfsProbe {
    #[cfg(unix)]
    fn used_percent(&self, path: &Path) -> Option<u8> {
        let stat = rustix::fs::statvfs(path).ok()?;
        let used = stat.f_blocks.saturating_sub(stat.f_bfree);
        utilisation(used, stat.f_bavail)
    }

    #[cfg(not(unix))]
    fn used_percent(&self, _path: &Path) -> Option<u8> {
        None
    }
}

/// Whole percent of usable blocks in use, rounded down so a threshold is
/// only reached once utilisation actually hits it
#[cfg_attr(not(unix), allow(dead_code))]
fn utilisation(used: u64, available: u64) -> Option<u8> {
    let usable = used.checked_add(available)?;
    if usable == 0 {
        return None;
    }
    let percent = u128::from(used) * 100 / u128::from(usable);
    u8::try_from(percent.min(100)).ok()
}

/// Host and port the remote lives on; `None` for local remotes
pub fn remote_endpoint(url: &str) -> Option<(String, u16)> {
    if url.starts_with('/') || url.starts_with("file://") {
        return None;
    }

    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => {
            // scp-like: [user@]host:path
            let (authority, _) = url.split_once(':')?;
            let host = authority.rsplit('@').next()?;
            return (!host.is_empty()).then(|| (host.to_string(), 22));
        }
    };

    let default_port = match scheme {
        "ssh" | "git+ssh" => 22,
        "https" => 443,
        "http" => 80,
        "git" => 9418,
        _ => return None,
    };

    let authority = rest.split('/').next()?;
    let host_port = authority.rsplit('@').next()?;
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (host_port, default_port),
    };
    (!host.is_empty()).then(|| (host.to_string(), port))
}
