use std::fmt;

use ttydiag_transport::TransportError;

/// Why an operation found the channel not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReadyReason {
    /// No diag owner is registered.
    NoOwner,
    /// The owner has not armed a request slot.
    NoSlot,
    /// A forwarded request is still waiting for its response.
    ResponsePending,
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NotReadyReason::NoOwner => "no diag owner registered",
            NotReadyReason::NoSlot => "no request slot armed",
            NotReadyReason::ResponsePending => "response pending",
        };
        f.write_str(text)
    }
}

/// Errors returned by multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The endpoint index is outside the endpoint table.
    #[error("endpoint index {index} out of range (endpoint count {count})")]
    InvalidIndex { index: usize, count: usize },

    /// The channel cannot take the request right now. Retry later.
    #[error("channel not ready: {0}")]
    NotReady(NotReadyReason),

    /// The endpoint already has an opener.
    #[error("endpoint {0} is already open")]
    AlreadyOpen(usize),

    /// A diag owner is already registered.
    #[error("diag owner already registered")]
    AlreadyRegistered,

    /// The write does not fit in the armed request slot.
    #[error("message too large ({size} bytes, slot capacity {capacity})")]
    MessageTooLarge { size: usize, capacity: usize },

    /// The terminal could not take the whole response.
    #[error("inbound buffer exhausted on endpoint {endpoint} ({granted} of {requested} bytes available)")]
    OutOfMemory {
        endpoint: usize,
        requested: usize,
        granted: usize,
    },

    /// The target endpoint has no open terminal session.
    #[error("endpoint {0} is not connected")]
    Disconnected(usize),

    /// The terminal layer failed to install the driver or a device node.
    #[error("terminal layer error: {0}")]
    Transport(#[from] TransportError),
}

impl MuxError {
    /// True when the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MuxError::NotReady(_))
    }

    /// Conventional errno a terminal driver reports for this error.
    #[cfg(unix)]
    pub fn errno(&self) -> i32 {
        match self {
            MuxError::InvalidIndex { .. } => libc::ENODEV,
            MuxError::NotReady(_) => libc::EAGAIN,
            MuxError::AlreadyOpen(_) | MuxError::AlreadyRegistered => libc::EBUSY,
            MuxError::MessageTooLarge { .. } => libc::EMSGSIZE,
            MuxError::OutOfMemory { .. } => libc::ENOMEM,
            MuxError::Disconnected(_) | MuxError::Transport(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_ready_is_retryable() {
        assert!(MuxError::NotReady(NotReadyReason::NoSlot).is_retryable());
        assert!(!MuxError::AlreadyOpen(0).is_retryable());
        assert!(!MuxError::MessageTooLarge {
            size: 9,
            capacity: 8
        }
        .is_retryable());
    }

    #[cfg(unix)]
    #[test]
    fn errno_mapping_matches_terminal_conventions() {
        assert_eq!(
            MuxError::InvalidIndex { index: 7, count: 2 }.errno(),
            libc::ENODEV
        );
        assert_eq!(
            MuxError::NotReady(NotReadyReason::ResponsePending).errno(),
            libc::EAGAIN
        );
        assert_eq!(MuxError::AlreadyOpen(1).errno(), libc::EBUSY);
        assert_eq!(MuxError::AlreadyRegistered.errno(), libc::EBUSY);
        assert_eq!(
            MuxError::MessageTooLarge {
                size: 2,
                capacity: 1
            }
            .errno(),
            libc::EMSGSIZE
        );
        assert_eq!(
            MuxError::OutOfMemory {
                endpoint: 0,
                requested: 4,
                granted: 1
            }
            .errno(),
            libc::ENOMEM
        );
        assert_eq!(MuxError::Disconnected(0).errno(), libc::EIO);
    }

    #[test]
    fn display_includes_reason() {
        let err = MuxError::NotReady(NotReadyReason::ResponsePending);
        assert_eq!(err.to_string(), "channel not ready: response pending");
    }
}
