//! Diag channel multiplexer.
//!
//! Bridges one diagnostic packet owner to a fixed pool of terminal endpoints
//! through a single request slot:
//! - the owner arms one receive buffer at a time ([`DiagChannel::arm`])
//! - one terminal write fills it and hands it to the owner ([`Multiplexer::submit`])
//! - the owner's answer goes back to that terminal ([`DiagChannel::deliver`])
//!
//! Only one request is ever in flight. A second write while the owner has not
//! answered is rejected with [`MuxError::NotReady`].

pub mod channel;
pub mod error;
pub mod event;
pub mod mux;
pub mod registry;
pub mod request;

pub use channel::DiagChannel;
pub use error::{MuxError, NotReadyReason, Result};
pub use event::{event_queue, ChannelEvent, EventSender, Notify};
pub use mux::{EndpointStatus, MuxStatus, Multiplexer};
pub use registry::{SessionHandle, ENDPOINT_COUNT};
pub use request::DiagRequest;
pub use ttydiag_transport::{DriverConfig, TerminalSettings};
