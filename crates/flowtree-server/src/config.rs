//! Configuration for the Flowtree Server
//!
//! Settings are layered: built-in defaults, then an optional TOML file
//! (`FLOWTREE_CONFIG`, default `flowtree.toml`), then `FLOWTREE__*`
//! environment variables, with `__` separating nested keys
//! (`FLOWTREE__CORE__MAX_COMMIT_RETRIES=5`).

use std::net::{IpAddr, SocketAddr};

use config::{Config, Environment, File};
use flowtree_core::CoreConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ServerError, ServerResult};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "FLOWTREE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "flowtree.toml";
const ENV_PREFIX: &str = "FLOWTREE";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Flow store location: `memory://`, `sqlite://<path>` or `sqlite::memory:`
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Hierarchy engine settings
    #[serde(default)]
    pub core: CoreConfig,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_store_url() -> String {
    "memory://".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            store_url: default_store_url(),
            log_level: default_log_level(),
            json_logs: false,
            core: CoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the optional config file and environment variables
    pub fn load() -> ServerResult<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path, environment())
    }

    /// Load configuration from `path` (skipped when missing) overlaid by `env`
    pub fn load_from(path: &str, env: Environment) -> ServerResult<Self> {
        let config: ServerConfig = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate()?;

        info!(
            port = config.port,
            store_url = %config.store_url,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> ServerResult<()> {
        self.bind_address.parse::<IpAddr>().map_err(|e| {
            ServerError::ConfigurationError(format!(
                "Invalid bind_address '{}': {}",
                self.bind_address, e
            ))
        })?;
        if !self.store_url.starts_with("memory://") && !self.store_url.starts_with("sqlite:") {
            return Err(ServerError::ConfigurationError(format!(
                "Unsupported store_url '{}'",
                self.store_url
            )));
        }
        if self.log_level.trim().is_empty() {
            return Err(ServerError::ConfigurationError(
                "log_level must not be empty".to_string(),
            ));
        }
        self.core.validate()?;
        Ok(())
    }

    /// Address to listen on
    pub fn socket_addr(&self) -> ServerResult<SocketAddr> {
        let ip = self.bind_address.parse::<IpAddr>().map_err(|e| {
            ServerError::ConfigurationError(format!("Invalid bind_address: {}", e))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// `FLOWTREE__*` environment source
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtree_core::OrphanPolicy;
    use pretty_assertions::assert_eq;

    fn env_of(vars: &[(&str, &str)]) -> Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        environment().source(Some(map))
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = ServerConfig::load_from("does-not-exist.toml", env_of(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_file_then_environment() {
        let dir = std::env::temp_dir().join(format!("flowtree-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flowtree.toml");
        std::fs::write(
            &path,
            r#"
port = 9000
store_url = "sqlite::memory:"

[core]
orphan_policy = "reparent"
max_commit_retries = 7
"#,
        )
        .unwrap();

        let config = ServerConfig::load_from(
            path.to_str().unwrap(),
            env_of(&[("FLOWTREE__PORT", "9100"), ("FLOWTREE__JSON_LOGS", "true")]),
        )
        .unwrap();
        assert_eq!(config.port, 9100);
        assert!(config.json_logs);
        assert_eq!(config.store_url, "sqlite::memory:");
        assert_eq!(config.core.orphan_policy, OrphanPolicy::Reparent);
        assert_eq!(config.core.max_commit_retries, 7);
        assert_eq!(config.core.retry_backoff_ms, 10);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = ServerConfig::default();
        config.store_url = "postgres://db".to_string();
        assert!(matches!(config.validate(), Err(ServerError::ConfigurationError(_))));

        let mut config = ServerConfig::default();
        config.bind_address = "not an ip".to_string();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.core.event_capacity = 0;
        assert!(matches!(config.validate(), Err(ServerError::Core(_))));
    }
}
