//! Config loader facade: the only entry point for building a `RefereedConfig`.

use super::merge::builder_with_defaults;
use super::sources::{environment, global_file, workspace_file};
use super::RefereedConfig;
use crate::error::ApiError;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global file, workspace
    /// `config/config.toml`, workspace `config/{REFEREED_ENV}.toml`, environment.
    pub fn load(workspace_root: &Path) -> Result<RefereedConfig, ApiError> {
        let builder = builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder);
        let config: RefereedConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a single explicit file (plus environment overrides).
    pub fn load_from_file(path: &Path) -> Result<RefereedConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let builder = builder_with_defaults()?
            .add_source(config::File::from(path.to_path_buf()).required(true));
        let builder = environment::add_to_builder(builder);
        let config: RefereedConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Location of the user-level config file.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    /// Render a config as TOML.
    pub fn to_toml(config: &RefereedConfig) -> Result<String, ApiError> {
        toml::to_string_pretty(config)
            .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e)))
    }
}
