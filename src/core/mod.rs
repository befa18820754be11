pub mod backend;
pub mod classes;
pub mod detector;
pub mod engine;
pub mod pipeline;
pub mod uncertainty;
pub mod visualize;

pub use crate::domain::model::{DetectionResult, ImageSource};
pub use crate::domain::ports::{AsyncForward, InferenceBackend, Transform};
pub use crate::utils::error::Result;
