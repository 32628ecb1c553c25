//! YAML configuration via `serde`/`serde_yaml`.

use serde::Deserialize;
use std::path::Path;

use crate::error::{Result, ServerError};

#[derive(Debug, Clone, Deserialize)]
pub struct ListenAddress {
    pub host: String,
    pub port: u16,
}

fn default_backlog() -> u32 {
    128
}

fn default_max_buffer_size() -> usize {
    100 * 1024 * 1024
}

fn default_read_chunk_size() -> usize {
    4096
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen: Vec<ListenAddress>,
    #[serde(default)]
    pub no_keep_alive: bool,
    #[serde(default)]
    pub xheaders: bool,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl Config {
    pub fn from_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| ServerError::Protocol(format!("invalid configuration: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = "listen:\n  - host: 0.0.0.0\n    port: 8080\n";
        let cfg = Config::from_str(yaml).unwrap();
        assert_eq!(cfg.listen.len(), 1);
        assert_eq!(cfg.listen[0].port, 8080);
        assert!(!cfg.no_keep_alive);
        assert!(!cfg.xheaders);
        assert_eq!(cfg.max_buffer_size, default_max_buffer_size());
        assert_eq!(cfg.read_chunk_size, default_read_chunk_size());
    }

    #[test]
    fn parses_full_config() {
        let yaml = "listen:\n  - host: 127.0.0.1\n    port: 9000\nno_keep_alive: true\nxheaders: true\nmax_buffer_size: 1024\nread_chunk_size: 512\n";
        let cfg = Config::from_str(yaml).unwrap();
        assert!(cfg.no_keep_alive);
        assert!(cfg.xheaders);
        assert_eq!(cfg.max_buffer_size, 1024);
        assert_eq!(cfg.read_chunk_size, 512);
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(Config::from_str("not: [valid").is_err());
    }
}
