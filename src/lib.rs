pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{ConfigSource, DetectorConfig};

pub use core::detector::{async_inference_detector, inference_detector, init_detector, Detector};
pub use core::engine::{InferenceEngine, InferenceReport};
pub use core::uncertainty::UncertaintyType;
pub use core::visualize::{show_result, ShowOptions};
pub use domain::model::{BBox, DetectionResult, Device, ImageSource};
pub use utils::error::{DetError, Result};
