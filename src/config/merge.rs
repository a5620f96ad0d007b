//! Merge rules: defaults first, then files, then environment.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("storage.root", ".refereed")?
        .set_default("pipeline.max_rounds", 3)?
        .set_default("pipeline.threshold", 8.0)?
        .set_default("pool.workers", 2)
}
