/// Errors that can occur in terminal-layer operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The terminal driver could not be installed.
    #[error("failed to install terminal driver {name}: {reason}")]
    Install { name: String, reason: String },

    /// A device node could not be created for an endpoint.
    #[error("failed to register device node {index}: {reason}")]
    DeviceRegistration { index: usize, reason: String },

    /// Device registration was attempted before the driver was installed.
    #[error("terminal driver not installed")]
    NotInstalled,

    /// An I/O error occurred in the terminal layer.
    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
