//! Daemon configuration.
//!
//! A single JSON document with a section per component; every field has a
//! default, so an empty object (or no file at all) yields a working
//! single-box setup.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::bot::BotConfig;
use crate::server::EngineConfig;
use crate::sim::SimConfig;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub listen_addr: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self { listen_addr: "0.0.0.0:9001".into() }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub net: NetConfig,
    pub sim: SimConfig,
    pub bot: BotConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Config {
    /// Load from a JSON file, or fall back to defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_a_file() {
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.engine.in_capacity, 4096);
        assert_eq!(cfg.engine.out_capacity, 4096);
        assert_eq!(cfg.engine.tracked_users, vec![1, 9999]);
        assert_eq!(cfg.net.listen_addr, "0.0.0.0:9001");
        assert!(cfg.sim.enabled);
        assert!(cfg.bot.enabled);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "engine": { "symbol": "XYZ", "tracked_users": [5] },
                "sim": { "enabled": false, "sigma": 0.35 },
                "net": { "listen_addr": "127.0.0.1:7777" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.engine.symbol, "XYZ");
        assert_eq!(cfg.engine.tracked_users, vec![5]);
        assert_eq!(cfg.engine.pool_capacity, 1 << 20);
        assert!(!cfg.sim.enabled);
        assert_eq!(cfg.sim.sigma, 0.35);
        assert_eq!(cfg.sim.s0, 100.0);
        assert_eq!(cfg.net.listen_addr, "127.0.0.1:7777");
        assert_eq!(cfg.bot.user_id, 9999);
    }
}
