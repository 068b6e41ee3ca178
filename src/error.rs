use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Invalid {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("Operation '{operation}' is not supported by the {source_kind} source")]
    Unsupported {
        operation: String,
        source_kind: String,
    },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Failures of the underlying capture handle
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open capture device {device}: {details}")]
    DeviceOpen { device: u32, details: String },

    #[error("Failed to open video file {path}: {details}")]
    FileOpen { path: String, details: String },

    #[error("Frame read failed: {details}")]
    Read { details: String },

    #[error("Seek failed: {details}")]
    Seek { details: String },

    #[error("Capture backend error: {details}")]
    Backend { details: String },
}

/// Failures while turning a raw frame into an encoded one
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Frame decode failed: {details}")]
    Decode { details: String },

    #[error("JPEG encoding failed: {details}")]
    JpegEncoding { details: String },

    #[error("Invalid frame: {details}")]
    InvalidFrame { details: String },
}

impl FlowcastError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn invalid<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn unsupported<O: Into<String>, K: Into<String>>(operation: O, source_kind: K) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            source_kind: source_kind.into(),
        }
    }

    /// True for errors caused by caller input rather than system state
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidInput { .. } | Self::Unsupported { .. })
    }
}

pub type Result<T> = std::result::Result<T, FlowcastError>;
