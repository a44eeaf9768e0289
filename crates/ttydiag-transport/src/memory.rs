use std::collections::{BTreeSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::config::DriverConfig;
use crate::error::{Result, TransportError};
use crate::traits::{CharFlag, TerminalDriver, TerminalPort};

/// Default inbound capacity of a [`MemoryPort`]: 64 KiB.
pub const DEFAULT_PORT_CAPACITY: usize = 64 * 1024;

/// A run of pushed inbound bytes sharing one flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChunk {
    pub data: Bytes,
    pub flag: CharFlag,
}

impl InboundChunk {
    /// Returns true if this chunk is a break marker.
    pub fn is_break(&self) -> bool {
        self.flag.is_break()
    }
}

/// Device-node lifecycle event recorded by [`MemoryDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Registered(usize),
    Unregistered(usize),
}

#[derive(Default)]
struct DriverState {
    installed: Option<(DriverConfig, usize)>,
    devices: BTreeSet<usize>,
    events: Vec<DeviceEvent>,
    fail_index: Option<usize>,
}

/// In-memory terminal driver that records device-node registrations.
#[derive(Default)]
pub struct MemoryDriver {
    state: Mutex<DriverState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next registration of `index` fail.
    pub fn fail_registration_of(&self, index: usize) {
        self.lock().fail_index = Some(index);
    }

    /// Configuration the driver was installed with, if any.
    pub fn installed(&self) -> Option<DriverConfig> {
        self.lock().installed.as_ref().map(|(config, _)| config.clone())
    }

    /// Currently registered device indices, ascending.
    pub fn registered(&self) -> Vec<usize> {
        self.lock().devices.iter().copied().collect()
    }

    /// Names of the currently registered device nodes.
    pub fn device_nodes(&self) -> Vec<String> {
        let state = self.lock();
        match &state.installed {
            Some((config, _)) => state.devices.iter().map(|i| config.device_node(*i)).collect(),
            None => Vec::new(),
        }
    }

    /// Every register/unregister call in order.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.lock().events.clone()
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TerminalDriver for MemoryDriver {
    fn install(&self, config: &DriverConfig, device_count: usize) -> Result<()> {
        let mut state = self.lock();
        if state.installed.is_some() {
            return Err(TransportError::Install {
                name: config.driver_name.clone(),
                reason: "driver already installed".to_string(),
            });
        }
        debug!(
            driver = %config.driver_name,
            major = config.major,
            device_count,
            "installed memory terminal driver"
        );
        state.installed = Some((config.clone(), device_count));
        Ok(())
    }

    fn register_device(&self, index: usize) -> Result<()> {
        let mut state = self.lock();
        let count = match &state.installed {
            Some((_, count)) => *count,
            None => return Err(TransportError::NotInstalled),
        };
        if index >= count {
            return Err(TransportError::DeviceRegistration {
                index,
                reason: format!("minor out of range (device count {count})"),
            });
        }
        if state.fail_index == Some(index) {
            state.fail_index = None;
            return Err(TransportError::DeviceRegistration {
                index,
                reason: "injected failure".to_string(),
            });
        }
        state.devices.insert(index);
        state.events.push(DeviceEvent::Registered(index));
        Ok(())
    }

    fn unregister_device(&self, index: usize) {
        let mut state = self.lock();
        state.devices.remove(&index);
        state.events.push(DeviceEvent::Unregistered(index));
    }
}

struct PortState {
    capacity: usize,
    staged: Vec<InboundChunk>,
    staged_len: usize,
    pushed: VecDeque<InboundChunk>,
    pushed_len: usize,
    pushes: usize,
}

impl PortState {
    fn room(&self) -> usize {
        self.capacity
            .saturating_sub(self.staged_len)
            .saturating_sub(self.pushed_len)
    }
}

/// In-memory inbound buffer for one terminal session.
///
/// `capacity` bounds the bytes held between `insert` and the reader draining
/// them, so a slow reader eventually makes `reserve` come up short.
pub struct MemoryPort {
    state: Mutex<PortState>,
    readable: Condvar,
    #[cfg(feature = "async")]
    notify: tokio::sync::Notify,
}

impl Default for MemoryPort {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PORT_CAPACITY)
    }
}

impl MemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PortState {
                capacity,
                staged: Vec::new(),
                staged_len: 0,
                pushed: VecDeque::new(),
                pushed_len: 0,
                pushes: 0,
            }),
            readable: Condvar::new(),
            #[cfg(feature = "async")]
            notify: tokio::sync::Notify::new(),
        }
    }

    /// Change the inbound capacity. Already buffered data is kept.
    pub fn set_capacity(&self, capacity: usize) {
        self.lock().capacity = capacity;
    }

    /// Number of `push` calls observed so far.
    pub fn push_count(&self) -> usize {
        self.lock().pushes
    }

    /// Bytes pushed and not yet read.
    pub fn available(&self) -> usize {
        self.lock().pushed_len
    }

    /// Take the next pushed chunk without blocking.
    pub fn read(&self) -> Option<InboundChunk> {
        let mut state = self.lock();
        Self::pop(&mut state)
    }

    /// Take every pushed chunk without blocking.
    pub fn read_all(&self) -> Vec<InboundChunk> {
        let mut state = self.lock();
        state.pushed_len = 0;
        state.pushed.drain(..).collect()
    }

    /// Concatenate all pushed normal data, dropping break markers.
    pub fn read_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        for chunk in self.read_all() {
            if !chunk.is_break() {
                out.extend_from_slice(&chunk.data);
            }
        }
        out.freeze()
    }

    /// Block until a chunk is pushed or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration) -> Option<InboundChunk> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(chunk) = Self::pop(&mut state) {
                return Some(chunk);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = match self.readable.wait_timeout(state, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Wait asynchronously for the next pushed chunk.
    #[cfg(feature = "async")]
    pub async fn read_async(&self) -> InboundChunk {
        loop {
            if let Some(chunk) = self.read() {
                return chunk;
            }
            self.notify.notified().await;
        }
    }

    fn pop(state: &mut PortState) -> Option<InboundChunk> {
        let chunk = state.pushed.pop_front()?;
        state.pushed_len -= chunk.data.len();
        Some(chunk)
    }

    fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TerminalPort for MemoryPort {
    fn reserve(&self, len: usize) -> usize {
        len.min(self.lock().room())
    }

    fn insert(&self, data: &[u8], flag: CharFlag) -> usize {
        let mut state = self.lock();
        let take = data.len().min(state.room());
        if take == 0 {
            return 0;
        }
        let state = &mut *state;
        let data = &data[..take];
        let mergeable = flag == CharFlag::Normal
            && matches!(state.staged.last(), Some(last) if last.flag == CharFlag::Normal);
        if mergeable {
            if let Some(last) = state.staged.last_mut() {
                let mut merged = BytesMut::from(last.data.as_ref());
                merged.extend_from_slice(data);
                last.data = merged.freeze();
            }
        } else {
            state.staged.push(InboundChunk {
                data: Bytes::copy_from_slice(data),
                flag,
            });
        }
        state.staged_len += take;
        take
    }

    fn push(&self) {
        let mut state = self.lock();
        state.pushes += 1;
        if state.staged.is_empty() {
            return;
        }
        let staged = std::mem::take(&mut state.staged);
        state.pushed_len += state.staged_len;
        state.staged_len = 0;
        trace!(chunks = staged.len(), "pushed inbound data");
        state.pushed.extend(staged);
        drop(state);

        self.readable.notify_all();
        #[cfg(feature = "async")]
        self.notify.notify_one();
    }
}
