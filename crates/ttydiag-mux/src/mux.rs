use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};
use ttydiag_transport::{CharFlag, DriverConfig, TerminalDriver, TerminalPort};

use crate::channel::{ChannelState, DiagChannel};
use crate::error::{MuxError, NotReadyReason, Result};
use crate::event::{ChannelEvent, Notify};
use crate::registry::{Endpoint, EndpointRegistry, SessionHandle, ENDPOINT_COUNT};
use crate::request::RequestSlot;

#[derive(Debug, Default)]
pub(crate) struct MuxState {
    pub(crate) registry: EndpointRegistry,
    pub(crate) channel: ChannelState,
    pub(crate) slot: RequestSlot,
}

pub(crate) struct Shared {
    driver: Arc<dyn TerminalDriver>,
    config: DriverConfig,
    state: Mutex<MuxState>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, MuxState> {
        // Every critical section finishes its mutation before anything that
        // could panic, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Owner teardown: break any waiting terminal, clear owner state, then
    /// remove the device nodes highest index first.
    ///
    /// Device nodes are removed before the lock drops so a new owner cannot
    /// register between the detach and the removal.
    pub(crate) fn teardown(&self) {
        let mut state = self.lock();
        let state = &mut *state;
        let mut broken = None;
        if let Some(index) = state.channel.take_active() {
            if let Some(port) = state.registry.get(index).and_then(Endpoint::port) {
                send_break(&**port);
                broken = Some(index);
            }
        }
        state.channel.detach();
        state.slot.take();

        for index in (0..ENDPOINT_COUNT).rev() {
            self.driver.unregister_device(index);
        }
        debug!(break_sent_to = ?broken, "diag owner deregistered");
    }
}

/// Snapshot of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub index: usize,
    pub device_node: String,
    pub open_count: usize,
    pub connected: bool,
}

/// Snapshot of the whole multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxStatus {
    pub owner_registered: bool,
    pub active_endpoint: Option<usize>,
    pub armed_capacity: Option<usize>,
    pub endpoints: Vec<EndpointStatus>,
}

/// Shared multiplexer context.
///
/// Cheap to clone; every clone drives the same endpoints and channel. The
/// terminal layer calls [`open`](Self::open), [`close`](Self::close),
/// [`submit`](Self::submit) and [`space_available`](Self::space_available);
/// the diag owner calls [`register`](Self::register) and then works through
/// the returned [`DiagChannel`].
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

impl Multiplexer {
    /// Install `driver` with the default configuration.
    pub fn new(driver: Arc<dyn TerminalDriver>) -> Result<Self> {
        Self::with_config(driver, DriverConfig::default())
    }

    /// Install `driver` with explicit configuration.
    pub fn with_config(driver: Arc<dyn TerminalDriver>, config: DriverConfig) -> Result<Self> {
        driver.install(&config, ENDPOINT_COUNT)?;
        debug!(
            driver = %config.driver_name,
            device = %config.device_name,
            major = config.major,
            "diag terminal driver installed"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                driver,
                config,
                state: Mutex::new(MuxState::default()),
            }),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    /// Register the diag owner and create the endpoint device nodes.
    pub fn register(&self, notify: impl Notify + 'static) -> Result<DiagChannel> {
        let mut state = self.shared.lock();
        if state.channel.is_registered() {
            return Err(MuxError::AlreadyRegistered);
        }

        for index in 0..ENDPOINT_COUNT {
            if let Err(err) = self.shared.driver.register_device(index) {
                for registered in (0..index).rev() {
                    self.shared.driver.unregister_device(registered);
                }
                return Err(err.into());
            }
        }
        state.channel.attach(Arc::new(notify));
        drop(state);

        debug!(endpoints = ENDPOINT_COUNT, "diag owner registered");
        Ok(DiagChannel::new(Arc::clone(&self.shared)))
    }

    /// Open endpoint `index` on behalf of a terminal session.
    pub fn open(&self, index: usize, port: Arc<dyn TerminalPort>) -> Result<SessionHandle> {
        EndpointRegistry::check_index(index)?;
        let (session, notify) = {
            let mut state = self.shared.lock();
            let notify = state
                .channel
                .notifier()
                .ok_or(MuxError::NotReady(NotReadyReason::NoOwner))?;
            let session = state.registry.bind(index, port)?;
            (session, notify)
        };

        debug!(endpoint = index, "endpoint opened");
        notify.notify(ChannelEvent::Connect { endpoint: index });
        Ok(session)
    }

    /// Close a terminal session. Unknown or stale sessions are ignored.
    ///
    /// Closing the last open endpoint releases the in-flight request; if it
    /// was this endpoint's, a break marker is pushed to it first.
    pub fn close(&self, session: SessionHandle) {
        let mut state = self.shared.lock();
        let state = &mut *state;
        let Some(released) = state.registry.release(session) else {
            return;
        };

        if !state.registry.any_open() {
            if let Some(active) = state.channel.take_active() {
                if active == released.index {
                    if let Some(port) = &released.unbound {
                        send_break(&**port);
                    }
                }
                debug!(endpoint = active, "in-flight request released on disconnect");
            }
        }
        debug!(endpoint = released.index, "endpoint closed");
    }

    /// Forward a terminal write to the diag owner.
    ///
    /// The write is copied whole into the armed slot or rejected; it is
    /// never split. Returns the number of bytes taken.
    pub fn submit(&self, session: SessionHandle, data: &[u8]) -> Result<usize> {
        let (endpoint, request, notify) = {
            let mut state = self.shared.lock();
            let state = &mut *state;

            let endpoint = state
                .registry
                .resolve(session)
                .map(Endpoint::index)
                .ok_or(MuxError::Disconnected(session.index()))?;
            let notify = state
                .channel
                .notifier()
                .ok_or(MuxError::NotReady(NotReadyReason::NoOwner))?;
            if state.channel.active().is_some() {
                return Err(MuxError::NotReady(NotReadyReason::ResponsePending));
            }
            let capacity = state
                .slot
                .capacity()
                .ok_or(MuxError::NotReady(NotReadyReason::NoSlot))?;
            if data.len() > capacity {
                return Err(MuxError::MessageTooLarge {
                    size: data.len(),
                    capacity,
                });
            }

            let mut request = state
                .slot
                .take()
                .ok_or(MuxError::NotReady(NotReadyReason::NoSlot))?;
            request.fill(data)?;
            state.channel.set_active(endpoint);
            (endpoint, request, notify)
        };

        trace!(endpoint, length = data.len(), "request forwarded to diag owner");
        notify.notify(ChannelEvent::ReadDone { endpoint, request });
        Ok(data.len())
    }

    /// Bytes the session may submit right now: the armed slot's capacity, or
    /// 0 while no slot is armed or a response is pending.
    pub fn space_available(&self, session: SessionHandle) -> usize {
        let state = self.shared.lock();
        if state.registry.resolve(session).is_none() || state.channel.active().is_some() {
            return 0;
        }
        state.slot.capacity().unwrap_or(0)
    }

    /// Bytes queued towards the owner. Writes are handed over immediately,
    /// so this is always 0.
    pub fn pending_bytes(&self, _session: SessionHandle) -> usize {
        0
    }

    pub fn is_registered(&self) -> bool {
        self.shared.lock().channel.is_registered()
    }

    /// Endpoint awaiting a response, if any.
    pub fn active_endpoint(&self) -> Option<usize> {
        self.shared.lock().channel.active()
    }

    pub fn status(&self) -> MuxStatus {
        let state = self.shared.lock();
        MuxStatus {
            owner_registered: state.channel.is_registered(),
            active_endpoint: state.channel.active(),
            armed_capacity: state.slot.capacity(),
            endpoints: state
                .registry
                .iter()
                .map(|ep| EndpointStatus {
                    index: ep.index(),
                    device_node: self.shared.config.device_node(ep.index()),
                    open_count: ep.open_count(),
                    connected: ep.port().is_some(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("config", &self.shared.config)
            .field("state", &*self.shared.lock())
            .finish()
    }
}

/// Push a single break-flagged zero byte.
fn send_break(port: &dyn TerminalPort) {
    port.insert(&[0], CharFlag::Break);
    port.push();
}
