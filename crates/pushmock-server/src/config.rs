//! Runtime configuration for the two listeners and the mock root folder.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port serving the push stream endpoints (`/sse`, `/sse/event`, ...).
    pub push_port: u16,
    /// Port serving the mock CRUD API (`/api/mocks`, ...).
    pub admin_port: u16,
    /// Bind host for both listeners.
    pub host: String,
    /// Root folder holding `Domains/<domain>/SSE/*.json` documents.
    pub mock_root: PathBuf,
}

impl ServerConfig {
    pub fn new(push_port: u16, admin_port: u16, mock_path: Option<PathBuf>) -> Self {
        Self {
            push_port,
            admin_port,
            host: "0.0.0.0".to_string(),
            mock_root: mock_path.unwrap_or_else(default_mock_root),
        }
    }

    pub fn push_addr(&self) -> SocketAddr {
        // Bind host is validated at listener bind time; parsing cannot fail
        // for the fixed default.
        format!("{}:{}", self.host, self.push_port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.push_port)))
    }

    pub fn admin_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.admin_port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.admin_port)))
    }
}

/// Default mock root: `~/.pushmock/mocks`, or a temp-dir fallback when no
/// home directory is available.
pub fn default_mock_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".pushmock")
        .join("mocks")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_mock_path_wins() {
        let config = ServerConfig::new(8009, 8010, Some(PathBuf::from("/srv/mocks")));
        assert_eq!(config.mock_root, PathBuf::from("/srv/mocks"));
    }

    #[test]
    fn test_default_mock_root_is_stable() {
        assert_eq!(default_mock_root(), default_mock_root());
    }

    #[test]
    fn test_addrs_use_configured_ports() {
        let config = ServerConfig::new(8009, 8010, None);
        assert_eq!(config.push_addr().port(), 8009);
        assert_eq!(config.admin_addr().port(), 8010);
    }
}
