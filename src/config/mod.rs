#[cfg(feature = "cli")]
pub mod cli;
pub mod detector_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use detector_config::{
    ConfigSource, DataConfig, DatasetConfig, DetectorConfig, ModelConfig, ModelIoConfig,
    TestConfig, TransformSpec,
};
