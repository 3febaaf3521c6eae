//! Configuration Loader
//!
//! Layers an optional TOML file under `AGENT_RUNTIME__*` environment overrides
//! and validates the merged result before handing it to the runtime.

use super::error::{ConfigResult, ConfigurationError};
use super::RuntimeConfig;
use config::{Config, Environment, File, FileFormat};
use std::path::Path;
use tracing::{debug, info};

/// Prefix for environment overrides, e.g. `AGENT_RUNTIME__RATE_LIMITS__ENABLED=false`
pub const ENV_PREFIX: &str = "AGENT_RUNTIME";
const ENV_SEPARATOR: &str = "__";

/// Stateless entry points for building a validated [`RuntimeConfig`]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from environment overrides only
    pub fn load() -> ConfigResult<RuntimeConfig> {
        Self::load_from_file::<&Path>(None)
    }

    /// Load from a TOML file (when given) plus environment overrides
    pub fn load_from_file<P: AsRef<Path>>(path: Option<P>) -> ConfigResult<RuntimeConfig> {
        let mut builder = Config::builder();
        let mut source_description = "environment".to_string();

        if let Some(path) = path {
            let path = path.as_ref();
            if !path.exists() {
                return Err(ConfigurationError::config_file_not_found(path));
            }
            debug!(path = %path.display(), "Loading runtime configuration file");
            source_description = path.display().to_string();
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let settings = builder
            .add_source(Self::environment_source())
            .build()
            .map_err(|e| ConfigurationError::load_error(&source_description, e))?;

        Self::finish(settings, &source_description)
    }

    /// Load from an in-memory TOML document, without environment overrides
    pub fn load_from_str(toml: &str) -> ConfigResult<RuntimeConfig> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .map_err(|e| ConfigurationError::load_error("inline TOML", e))?;

        Self::finish(settings, "inline TOML")
    }

    fn environment_source() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    fn finish(settings: Config, source_description: &str) -> ConfigResult<RuntimeConfig> {
        let mut config: RuntimeConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::load_error(source_description, e))?;

        if config.environment.is_empty() {
            config.environment = crate::logging::resolve_environment();
        }

        config.validate()?;

        info!(
            source = %source_description,
            environment = %config.environment,
            rate_limiting_enabled = config.rate_limits.enabled,
            "⚙️ CONFIG: Runtime configuration loaded"
        );

        Ok(config)
    }
}
