use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("ONNX Runtime error: {0}")]
    RuntimeError(#[from] ort::Error),

    #[error("Model error: {message}")]
    ModelError { message: String },

    #[error("Tensor shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("config must be a filename or Config object, but got {got}")]
    TypeError { got: String },

    #[error(
        "{name} is not valid uncertainty_type. List of possible uncertainty_type: {valid:?}. Change it in config parameters."
    )]
    UnknownUncertaintyType { name: String, valid: Vec<String> },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Inference task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Model,
    Processing,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DetError {
    pub fn config(message: impl Into<String>) -> Self {
        DetError::ConfigError {
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        DetError::ModelError {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        DetError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            DetError::ConfigError { .. }
            | DetError::ConfigValidationError { .. }
            | DetError::InvalidConfigValueError { .. }
            | DetError::MissingConfigError { .. }
            | DetError::TypeError { .. }
            | DetError::UnknownUncertaintyType { .. } => ErrorCategory::Configuration,
            DetError::ImageError(_) => ErrorCategory::Input,
            DetError::RuntimeError(_) | DetError::ModelError { .. } => ErrorCategory::Model,
            DetError::ShapeError(_) | DetError::ProcessingError { .. } => {
                ErrorCategory::Processing
            }
            DetError::IoError(_) | DetError::SerializationError(_) | DetError::TaskError(_) => {
                ErrorCategory::System
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Configuration | ErrorCategory::Input => ErrorSeverity::High,
            ErrorCategory::Processing => ErrorSeverity::Medium,
            ErrorCategory::Model | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            DetError::TypeError { .. } => "Pass a .toml or .json config file, or a loaded DetectorConfig",
            DetError::UnknownUncertaintyType { .. } => {
                "Set uncertainty_type to one of the listed metrics in the config file"
            }
            DetError::MissingConfigError { .. } => "Add the missing field to the config file",
            DetError::ConfigError { .. }
            | DetError::ConfigValidationError { .. }
            | DetError::InvalidConfigValueError { .. } => "Check the config file against the documented fields",
            DetError::ImageError(_) => "Make sure the image exists and is a supported format (jpg, png, bmp)",
            DetError::RuntimeError(_) | DetError::ModelError { .. } => "Check the ONNX checkpoint and the ONNX Runtime installation",
            DetError::ShapeError(_) | DetError::ProcessingError { .. } => {
                "Check that the model outputs match the names and shapes declared in the config"
            }
            DetError::IoError(_) => "Check file paths and permissions",
            DetError::SerializationError(_) => "Check that the JSON input is well formed",
            DetError::TaskError(_) => "Retry the request; the inference worker panicked or was cancelled",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Input => format!("Could not read the input image: {}", self),
            ErrorCategory::Model => format!("Model failed to run: {}", self),
            ErrorCategory::Processing => format!("Inference output could not be processed: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, DetError>;
