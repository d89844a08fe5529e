use std::path::PathBuf;

use delve_protocol::StreamMode;
use serde::Deserialize;

use crate::config::{ServerConfig, DEFAULT_DURABLE_PREFIX};
use crate::paths::{delve_config_path, delve_home_dir};

/// Optional `~/.delve/config.toml`.
///
/// Values set here override [`ServerConfig::default`]; environment
/// variables read by the gateway override both.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DelveConfig {
    pub version: u32,
    pub storage: StorageConfig,
    pub runs: RunsConfig,
    pub agent: AgentConfig,
}

impl Default for DelveConfig {
    fn default() -> Self {
        Self {
            version: 1,
            storage: StorageConfig::default(),
            runs: RunsConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl DelveConfig {
    pub fn load() -> Result<Self, String> {
        let path = delve_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw =
            std::fs::read_to_string(&path).map_err(|e| format!("read config.toml: {e}"))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| format!("parse config.toml: {e}"))
    }

    /// Overlay the file's settings on `base`.
    pub fn apply(&self, mut base: ServerConfig) -> ServerConfig {
        if !self.storage.durable_prefixes.is_empty() {
            base.durable_prefixes = self.storage.durable_prefixes.clone();
        }
        if let Some(db_path) = self.storage.db_path.as_deref() {
            match resolve_path(db_path) {
                Ok(path) => base.db_path = path,
                Err(err) => tracing::warn!(%db_path, error = %err, "ignoring storage.db_path"),
            }
        }
        if let Some(limit) = self.runs.recursion_limit {
            base.recursion_limit = limit;
        }
        if let Some(buffer) = self.runs.event_buffer {
            base.event_buffer = buffer.max(1);
        }
        if let Some(retention) = self.runs.checkpoint_retention {
            base.checkpoint_retention = retention.max(1);
        }
        if let Some(tags) = self.runs.stream_modes.as_ref() {
            match StreamMode::parse_list(tags) {
                Ok(modes) if !modes.is_empty() => base.stream_modes = modes,
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "ignoring runs.stream_modes"),
            }
        }
        base.require_approval = self.agent.require_approval;
        base
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub durable_prefixes: Vec<String>,
    pub db_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            durable_prefixes: vec![DEFAULT_DURABLE_PREFIX.to_string()],
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunsConfig {
    pub recursion_limit: Option<u32>,
    pub stream_modes: Option<Vec<String>>,
    pub event_buffer: Option<usize>,
    pub checkpoint_retention: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub require_approval: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            require_approval: true,
        }
    }
}

fn resolve_path(value: &str) -> Result<PathBuf, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("path override is empty".to_string());
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = crate::paths::user_home_dir() {
            return Ok(home.join(rest));
        }
    }
    let path = PathBuf::from(trimmed);
    if path.is_relative() {
        return Ok(delve_home_dir()?.join(path));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let config = DelveConfig::from_toml_str("").unwrap();
        let applied = config.apply(ServerConfig::default());
        assert_eq!(applied.recursion_limit, 50);
        assert_eq!(applied.durable_prefixes, vec!["/memories/".to_string()]);
        assert!(applied.require_approval);
    }

    #[test]
    fn sections_override_defaults() {
        let config = DelveConfig::from_toml_str(
            r#"
            [storage]
            durable_prefixes = ["/memories/", "/archive/"]
            db_path = "/tmp/delve-test.db"

            [runs]
            recursion_limit = 12
            stream_modes = ["values", "updates"]
            event_buffer = 0
            checkpoint_retention = 8

            [agent]
            require_approval = false
            "#,
        )
        .unwrap();
        let applied = config.apply(ServerConfig::default());
        assert_eq!(applied.recursion_limit, 12);
        assert_eq!(
            applied.stream_modes,
            vec![StreamMode::Values, StreamMode::Updates]
        );
        assert_eq!(applied.event_buffer, 1);
        assert_eq!(applied.checkpoint_retention, 8);
        assert_eq!(applied.db_path, PathBuf::from("/tmp/delve-test.db"));
        assert_eq!(applied.durable_prefixes.len(), 2);
        assert!(!applied.require_approval);
    }

    #[test]
    fn bad_stream_modes_are_ignored() {
        let config = DelveConfig::from_toml_str("[runs]\nstream_modes = [\"bogus\"]\n").unwrap();
        let applied = config.apply(ServerConfig::default());
        assert_eq!(applied.stream_modes.len(), 4);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(DelveConfig::from_toml_str("[runs\n").is_err());
    }
}
