//! Process configuration for the API binary.

use std::net::SocketAddr;

use anyhow::Context;

use fmshop_infra::config::SettlementConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string; in-memory stores are used when absent.
    pub database_url: Option<String>,
    pub settlement: SettlementConfig,
}

impl ApiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind = lookup("BIND_ADDR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let bind_addr = bind
            .trim()
            .parse()
            .with_context(|| format!("BIND_ADDR must be host:port, got {bind:?}"))?;

        Ok(Self {
            bind_addr,
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            settlement: SettlementConfig::from_lookup(&lookup)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_in_memory_on_port_8080() {
        let config = ApiConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn rejects_bad_bind_addr() {
        let lookup = |key: &str| (key == "BIND_ADDR").then(|| "localhost".to_owned());
        assert!(ApiConfig::from_lookup(lookup).is_err());
    }

    #[test]
    fn blank_database_url_is_ignored() {
        let lookup = |key: &str| match key {
            "DATABASE_URL" => Some("  ".to_owned()),
            "BIND_ADDR" => Some("127.0.0.1:9000".to_owned()),
            _ => None,
        };
        let config = ApiConfig::from_lookup(lookup).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
    }
}
