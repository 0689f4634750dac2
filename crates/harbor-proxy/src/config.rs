//! Listener configuration for the public HTTP server.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8000;

/// Configuration of the proxy's own listener.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding `index.html` and the assets served under `/static`.
    pub frontend_dir: PathBuf,
    /// Upper bound for a single proxied request, long generations included.
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            frontend_dir: PathBuf::from("frontend"),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl ProxyConfig {
    /// Read `PORT` and `HARBOR_FRONTEND_DIR` from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            match port.trim().parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!("Ignoring invalid PORT value {:?}", port),
            }
        }
        if let Some(dir) = lookup("HARBOR_FRONTEND_DIR") {
            config.frontend_dir = PathBuf::from(dir);
        }

        config
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
