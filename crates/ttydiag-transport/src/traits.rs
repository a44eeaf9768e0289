use crate::config::DriverConfig;
use crate::error::Result;

/// Per-character flag attached to inbound data.
///
/// Mirrors the tty flip-buffer flags: ordinary data, or an out-of-band break
/// condition carried on a single zero byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharFlag {
    Normal,
    Break,
}

impl CharFlag {
    /// Returns true for the break marker flag.
    pub fn is_break(self) -> bool {
        matches!(self, CharFlag::Break)
    }
}

/// Device-node side of the terminal layer.
///
/// One driver serves every endpoint. The multiplexer installs it once at
/// construction and then registers or unregisters device nodes by endpoint
/// index as the diag owner comes and goes.
pub trait TerminalDriver: Send + Sync {
    /// Install the driver with `device_count` minors.
    fn install(&self, config: &DriverConfig, device_count: usize) -> Result<()>;

    /// Create the device node for endpoint `index`.
    fn register_device(&self, index: usize) -> Result<()>;

    /// Remove the device node for endpoint `index`.
    fn unregister_device(&self, index: usize);
}

/// Inbound buffer of one open terminal session.
///
/// Data flows `reserve` -> `insert` -> `push`. Nothing inserted is visible to
/// the reader until `push` is called.
pub trait TerminalPort: Send + Sync {
    /// Ask for `len` bytes of inbound room. Returns how many bytes the port
    /// can take right now, which may be less than `len`.
    fn reserve(&self, len: usize) -> usize;

    /// Stage `data` with `flag`. Returns the number of bytes staged.
    fn insert(&self, data: &[u8], flag: CharFlag) -> usize;

    /// Make staged data visible to the reader.
    fn push(&self);
}

impl<T: TerminalPort + ?Sized> TerminalPort for std::sync::Arc<T> {
    fn reserve(&self, len: usize) -> usize {
        (**self).reserve(len)
    }

    fn insert(&self, data: &[u8], flag: CharFlag) -> usize {
        (**self).insert(data, flag)
    }

    fn push(&self) {
        (**self).push()
    }
}
