use thiserror::Error;

#[derive(Error, Debug)]
pub enum CantinaError {
    /// Missing required configuration or secrets. Fatal at startup.
    #[error("Config error: {0}")]
    Config(String),

    /// Audio device, music directory or vendor endpoint unreachable.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Command or payload failed schema validation at an ingress edge.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Vendor rate limit or 5xx after retries were exhausted.
    #[error("Transient upstream failure: {0}")]
    TransientUpstream(String),

    /// Uncaught failure inside a subscriber handler.
    #[error("Handler fault: {0}")]
    HandlerFault(String),

    #[error("Service '{service}' failed to start: {reason}")]
    ServiceStartFailed { service: String, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Shutdown requested")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CantinaError>;
