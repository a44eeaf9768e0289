use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};
use ttydiag_transport::CharFlag;

use crate::error::{MuxError, Result};
use crate::event::{ChannelEvent, Notify};
use crate::mux::Shared;
use crate::registry::Endpoint;
use crate::request::DiagRequest;

/// Endpoint that receives responses nobody asked for.
const PRIMARY_ENDPOINT: usize = 0;

/// Owner registration plus the active-endpoint marker.
#[derive(Default)]
pub(crate) struct ChannelState {
    notify: Option<Arc<dyn Notify>>,
    active: Option<usize>,
}

impl ChannelState {
    pub(crate) fn is_registered(&self) -> bool {
        self.notify.is_some()
    }

    pub(crate) fn attach(&mut self, notify: Arc<dyn Notify>) {
        self.notify = Some(notify);
    }

    pub(crate) fn detach(&mut self) {
        self.notify = None;
        self.active = None;
    }

    pub(crate) fn notifier(&self) -> Option<Arc<dyn Notify>> {
        self.notify.clone()
    }

    pub(crate) fn active(&self) -> Option<usize> {
        self.active
    }

    pub(crate) fn set_active(&mut self, index: usize) {
        self.active = Some(index);
    }

    pub(crate) fn take_active(&mut self) -> Option<usize> {
        self.active.take()
    }
}

impl fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelState")
            .field("registered", &self.notify.is_some())
            .field("active", &self.active)
            .finish()
    }
}

/// The diag owner's side of a registered channel.
///
/// Returned by [`Multiplexer::register`]. Dropping it deregisters the owner,
/// exactly like [`DiagChannel::deregister`].
///
/// [`Multiplexer::register`]: crate::mux::Multiplexer::register
pub struct DiagChannel {
    shared: Arc<Shared>,
    registered: bool,
}

impl DiagChannel {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            registered: true,
        }
    }

    /// Offer `request` as the receive slot for the next terminal write.
    ///
    /// An armed but unconsumed request is replaced without error.
    pub fn arm(&self, request: DiagRequest) {
        let capacity = request.capacity();
        let replaced = self.shared.lock().slot.arm(request);
        match replaced {
            Some(old) => debug!(
                old_tag = old.tag(),
                capacity, "armed request replaced an unconsumed one"
            ),
            None => trace!(capacity, "request slot armed"),
        }
    }

    /// Push `response` to the endpoint awaiting it.
    ///
    /// With no request in flight the response goes to endpoint 0. The whole
    /// response is delivered or nothing is: on [`MuxError::OutOfMemory`] the
    /// request stays in flight so the owner can retry or abandon it.
    pub fn deliver(&self, response: &DiagRequest) -> Result<()> {
        let (endpoint, notify) = {
            let mut state = self.shared.lock();
            let state = &mut *state;

            let endpoint = state.channel.active().unwrap_or(PRIMARY_ENDPOINT);
            let port = state
                .registry
                .get(endpoint)
                .and_then(Endpoint::port)
                .ok_or(MuxError::Disconnected(endpoint))?;

            let requested = response.len();
            let granted = port.reserve(requested);
            if granted < requested {
                return Err(MuxError::OutOfMemory {
                    endpoint,
                    requested,
                    granted,
                });
            }

            state.channel.take_active();
            port.insert(response.as_bytes(), CharFlag::Normal);
            port.push();
            (endpoint, state.channel.notifier())
        };

        trace!(endpoint, length = response.len(), "response delivered");
        if let Some(notify) = notify {
            notify.notify(ChannelEvent::WriteDone {
                endpoint,
                tag: response.tag(),
                length: response.len(),
            });
        }
        Ok(())
    }

    /// Drop the in-flight request without answering it.
    pub fn abandon(&self) {
        let abandoned = self.shared.lock().channel.take_active();
        if let Some(endpoint) = abandoned {
            trace!(endpoint, "in-flight request abandoned");
        }
    }

    /// Endpoint awaiting a response, if any.
    pub fn active_endpoint(&self) -> Option<usize> {
        self.shared.lock().channel.active()
    }

    /// Unregister the owner and remove every device node.
    ///
    /// A terminal still waiting for a response receives a break marker.
    pub fn deregister(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if std::mem::take(&mut self.registered) {
            self.shared.teardown();
        }
    }
}

impl Drop for DiagChannel {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for DiagChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagChannel")
            .field("registered", &self.registered)
            .finish()
    }
}
