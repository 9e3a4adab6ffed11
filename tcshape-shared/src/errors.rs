use thiserror::Error;

/// Common error types for tcshape
#[derive(Error, Debug)]
pub enum TcshapeError {
    #[error("Traffic control command failed: `{command}`: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Interface not found: {interface}")]
    InterfaceNotFound { interface: String },

    #[error(
        "Offload features enabled on {interface} ({features}); bandwidth limiting would under-perform. \
         Disable them with `ethtool -K {interface} tso off gso off gro off`"
    )]
    OffloadEnabled { interface: String, features: String },

    #[error("Root privileges are required to {action}")]
    NotPrivileged { action: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Profile error in {path}: {message}")]
    ProfileError { path: String, message: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TcshapeError {
    /// Create an InvalidConfig error from anything printable
    pub fn invalid_config(message: impl Into<String>) -> Self {
        TcshapeError::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Result type alias for convenience
pub type TcshapeResult<T> = Result<T, TcshapeError>;
