//! Terminal-layer collaborator for the diag multiplexer.
//!
//! The multiplexer never talks to a real tty subsystem directly. Everything it
//! needs from the terminal side goes through two traits defined here:
//! - [`TerminalDriver`] registers and unregisters the per-endpoint device nodes
//! - [`TerminalPort`] is one open session's inbound (flip) buffer
//!
//! [`MemoryDriver`] and [`MemoryPort`] implement both in process memory, which
//! is what the CLI harness and the test suites run against.

pub mod config;
pub mod error;
pub mod memory;
pub mod traits;

pub use config::{DriverConfig, TerminalSettings, DIAG_MAJOR};
pub use error::{Result, TransportError};
pub use memory::{DeviceEvent, InboundChunk, MemoryDriver, MemoryPort, DEFAULT_PORT_CAPACITY};
pub use traits::{CharFlag, TerminalDriver, TerminalPort};
