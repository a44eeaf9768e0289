use std::fmt;
use std::sync::Arc;

use ttydiag_transport::TerminalPort;

use crate::error::{MuxError, Result};

/// Number of terminal endpoints served by one multiplexer.
pub const ENDPOINT_COUNT: usize = 2;

/// Identifies one opening of one endpoint.
///
/// Handles from an earlier open of the same endpoint stop matching once the
/// endpoint is reopened, so a late close from a previous session is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: usize,
    generation: u64,
}

impl SessionHandle {
    /// Endpoint index this session belongs to.
    pub fn index(&self) -> usize {
        self.index
    }
}

pub(crate) struct Endpoint {
    index: usize,
    port: Option<Arc<dyn TerminalPort>>,
    open_count: usize,
    generation: u64,
}

impl Endpoint {
    fn new(index: usize) -> Self {
        Self {
            index,
            port: None,
            open_count: 0,
            generation: 0,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn port(&self) -> Option<&Arc<dyn TerminalPort>> {
        self.port.as_ref()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.open_count
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open_count > 0
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("index", &self.index)
            .field("bound", &self.port.is_some())
            .field("open_count", &self.open_count)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Outcome of releasing a session.
pub(crate) struct Released {
    pub(crate) index: usize,
    /// The port, when this release dropped the endpoint to zero openers.
    pub(crate) unbound: Option<Arc<dyn TerminalPort>>,
}

/// Fixed table of terminal endpoints.
#[derive(Debug)]
pub(crate) struct EndpointRegistry {
    endpoints: [Endpoint; ENDPOINT_COUNT],
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self {
            endpoints: std::array::from_fn(Endpoint::new),
        }
    }
}

impl EndpointRegistry {
    pub(crate) fn check_index(index: usize) -> Result<()> {
        if index >= ENDPOINT_COUNT {
            return Err(MuxError::InvalidIndex {
                index,
                count: ENDPOINT_COUNT,
            });
        }
        Ok(())
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Endpoint> {
        self.endpoints.get(index)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Bind `port` to endpoint `index` for a new session.
    ///
    /// Only one opener per endpoint is allowed.
    pub(crate) fn bind(&mut self, index: usize, port: Arc<dyn TerminalPort>) -> Result<SessionHandle> {
        Self::check_index(index)?;
        let endpoint = &mut self.endpoints[index];
        if endpoint.open_count >= 1 {
            return Err(MuxError::AlreadyOpen(index));
        }
        endpoint.port = Some(port);
        endpoint.open_count += 1;
        endpoint.generation = endpoint.generation.wrapping_add(1);
        Ok(SessionHandle {
            index,
            generation: endpoint.generation,
        })
    }

    /// Endpoint for a live session, or `None` if the handle is stale.
    pub(crate) fn resolve(&self, session: SessionHandle) -> Option<&Endpoint> {
        self.endpoints
            .get(session.index)
            .filter(|ep| ep.is_open() && ep.generation == session.generation)
    }

    /// Drop one opener of `session`. Returns `None` for unknown handles.
    pub(crate) fn release(&mut self, session: SessionHandle) -> Option<Released> {
        self.resolve(session)?;
        let endpoint = &mut self.endpoints[session.index];
        endpoint.open_count -= 1;
        let unbound = if endpoint.open_count == 0 {
            endpoint.port.take()
        } else {
            None
        };
        Some(Released {
            index: session.index,
            unbound,
        })
    }

    pub(crate) fn any_open(&self) -> bool {
        self.endpoints.iter().any(Endpoint::is_open)
    }
}

#[cfg(test)]
mod tests {
    use ttydiag_transport::MemoryPort;

    use super::*;

    fn port() -> Arc<dyn TerminalPort> {
        Arc::new(MemoryPort::new())
    }

    #[test]
    fn endpoints_keep_their_index() {
        let registry = EndpointRegistry::default();
        let indices: Vec<usize> = registry.iter().map(Endpoint::index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn bind_rejects_out_of_range_index() {
        let mut registry = EndpointRegistry::default();
        let err = registry.bind(ENDPOINT_COUNT, port()).unwrap_err();
        assert!(matches!(err, MuxError::InvalidIndex { index: 2, count: 2 }));
    }

    #[test]
    fn second_bind_is_already_open() {
        let mut registry = EndpointRegistry::default();
        registry.bind(1, port()).unwrap();
        let err = registry.bind(1, port()).unwrap_err();
        assert!(matches!(err, MuxError::AlreadyOpen(1)));
        assert_eq!(registry.get(1).map(Endpoint::open_count), Some(1));
    }

    #[test]
    fn release_unbinds_at_zero_and_ignores_stale_handles() {
        let mut registry = EndpointRegistry::default();
        let first = registry.bind(0, port()).unwrap();
        assert!(registry.any_open());

        let released = registry.release(first).expect("live handle should release");
        assert_eq!(released.index, 0);
        assert!(released.unbound.is_some());
        assert!(!registry.any_open());
        assert!(registry.get(0).and_then(Endpoint::port).is_none());

        assert!(registry.release(first).is_none());

        let second = registry.bind(0, port()).unwrap();
        assert_ne!(first, second);
        assert!(registry.release(first).is_none());
        assert!(registry.resolve(second).is_some());
    }
}
