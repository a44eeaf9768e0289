use std::fmt;
use std::io;

use ttydiag::responder::ResponderError;
use ttydiag_mux::MuxError;
use ttydiag_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Transport(err) => transport_error(context, err),
        MuxError::NotReady(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        MuxError::MessageTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        MuxError::InvalidIndex { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        MuxError::AlreadyOpen(_)
        | MuxError::AlreadyRegistered
        | MuxError::OutOfMemory { .. }
        | MuxError::Disconnected(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn responder_error(context: &str, err: ResponderError) -> CliError {
    match err {
        ResponderError::Register(err) => mux_error(context, err),
        ResponderError::Spawn(_) => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use ttydiag_mux::NotReadyReason;

    use super::*;

    #[test]
    fn mux_errors_map_to_exit_codes() {
        let busy = mux_error("submit", MuxError::NotReady(NotReadyReason::ResponsePending));
        assert_eq!(busy.code, TIMEOUT);
        assert!(busy.message.starts_with("submit: "));

        let big = mux_error(
            "submit",
            MuxError::MessageTooLarge {
                size: 10,
                capacity: 4,
            },
        );
        assert_eq!(big.code, DATA_INVALID);

        let bad = mux_error("open", MuxError::InvalidIndex { index: 9, count: 2 });
        assert_eq!(bad.code, USAGE);

        assert_eq!(mux_error("open", MuxError::AlreadyOpen(0)).code, FAILURE);
    }

    #[test]
    fn responder_spawn_failure_is_internal() {
        let err = responder_error(
            "responder start failed",
            ResponderError::Spawn(io::Error::from(io::ErrorKind::OutOfMemory)),
        );
        assert_eq!(err.code, INTERNAL);
        assert!(err.message.contains("failed to spawn owner thread"));

        let err = responder_error(
            "responder start failed",
            ResponderError::Register(MuxError::AlreadyRegistered),
        );
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn transport_io_errors_use_io_mapping() {
        let err = mux_error(
            "register",
            MuxError::Transport(TransportError::Io(io::Error::from(
                io::ErrorKind::PermissionDenied,
            ))),
        );
        assert_eq!(err.code, PERMISSION_DENIED);

        let err = mux_error("register", MuxError::Transport(TransportError::NotInstalled));
        assert_eq!(err.code, TRANSPORT_ERROR);
    }
}
