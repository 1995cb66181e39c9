use anyhow::{Context, Result};
use chainlog_connector::config::ConnectorConfig;
use chainlog_logger::LogConfig;
use serde::Deserialize;

/// Environment variables with this prefix override file values,
/// e.g. `CHAINLOG_GATEWAY__DB_PATH`.
const ENV_PREFIX: &str = "CHAINLOG";

/// The top-level configuration for the chainlog gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfig {
    #[serde(default)]
    pub connector: ConnectorConfig,
    #[serde(default)]
    pub gateway: GatewaySpecificConfig,
}

/// Contains settings that are unique to the gateway binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GatewaySpecificConfig {
    /// Directory of the sled database holding checkpoints, events and leases.
    pub db_path: String,
    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for GatewaySpecificConfig {
    fn default() -> Self {
        Self {
            db_path: "./chainlog.db".to_string(),
            log: LogConfig::default(),
        }
    }
}

/// Loads the gateway configuration from a specified TOML file.
///
/// It uses the `config` crate to read the file, layers `CHAINLOG_`-prefixed
/// environment variables on top and deserializes the result into
/// [`GatewayConfig`].
pub fn load_config(path: &str) -> Result<GatewayConfig> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

    let settings: GatewayConfig = builder
        .build()
        .context(format!("Failed to build configuration from '{}'", path))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
