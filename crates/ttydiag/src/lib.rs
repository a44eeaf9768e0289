//! Diag packet relay between one diagnostic owner and serial-like terminals.
//!
//! A fixed set of terminal endpoints share a single receive slot offered by
//! the owner. Each terminal write becomes one request; the owner's response
//! is routed back to the endpoint that asked.
//!
//! # Crate Structure
//!
//! - [`transport`]: terminal driver and port abstraction plus in-memory implementations
//! - [`mux`]: endpoint registry, request slot and the multiplexer core
//! - [`responder`]: a ready-made owner loop

/// Re-export transport types.
pub mod transport {
    pub use ttydiag_transport::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use ttydiag_mux::*;
}

pub mod responder;
