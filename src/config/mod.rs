//! # Configuration Management
//!
//! Layered configuration: compiled-in defaults, then `WARDEN__`-prefixed
//! environment variables (`WARDEN__AUTH__ADMIN_ROLE=root`). A `.env` file is
//! loaded into the environment by the binary before this runs.

mod settings;

pub use settings::{AppConfig, AuthConfig, DatabaseConfig, ObservabilityConfig, ServerConfig};

use crate::errors::{Error, Result};
use config::{Config, Environment};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "WARDEN";

impl AppConfig {
    /// Load configuration from defaults and the process environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(environment: Environment) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())?;

        let config = Config::builder()
            .add_source(defaults)
            .add_source(
                environment
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.internal_ips")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }
}
