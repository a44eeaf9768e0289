use bytes::{Bytes, BytesMut};

use crate::error::{MuxError, Result};

/// A diag packet buffer passed between the owner and the multiplexer.
///
/// The owner arms one as the receive slot; a terminal write fills it and it
/// travels back to the owner inside [`ChannelEvent::ReadDone`]. The same type
/// carries the owner's response into [`DiagChannel::deliver`].
///
/// [`ChannelEvent::ReadDone`]: crate::event::ChannelEvent::ReadDone
/// [`DiagChannel::deliver`]: crate::channel::DiagChannel::deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagRequest {
    tag: u64,
    capacity: usize,
    buf: BytesMut,
}

impl DiagRequest {
    /// Create an empty request able to hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tag: 0,
            capacity,
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Create a request already holding `data`, sized exactly to it.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            tag: 0,
            capacity: data.len(),
            buf: BytesMut::from(data),
        }
    }

    /// Attach an owner-chosen correlation tag.
    pub fn with_tag(mut self, tag: u64) -> Self {
        self.tag = tag;
        self
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }

    /// Maximum number of bytes this request can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of valid bytes (the actual length).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Replace the contents with `data`. All or nothing.
    pub fn fill(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() > self.capacity {
            return Err(MuxError::MessageTooLarge {
                size: data.len(),
                capacity: self.capacity,
            });
        }
        self.buf.clear();
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    /// Drop the contents, keeping capacity and tag.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Freeze the valid bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// The single receive slot lent by the owner.
#[derive(Debug, Default)]
pub(crate) struct RequestSlot {
    armed: Option<DiagRequest>,
}

impl RequestSlot {
    /// Arm `request`, returning whatever was armed before.
    pub(crate) fn arm(&mut self, request: DiagRequest) -> Option<DiagRequest> {
        self.armed.replace(request)
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.armed.as_ref().map(DiagRequest::capacity)
    }

    /// Consume the armed request.
    pub(crate) fn take(&mut self) -> Option<DiagRequest> {
        self.armed.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_sets_actual_length() {
        let mut request = DiagRequest::with_capacity(8);
        assert!(request.is_empty());

        assert_eq!(request.fill(b"abc").unwrap(), 3);
        assert_eq!(request.len(), 3);
        assert_eq!(request.capacity(), 8);
        assert_eq!(request.as_bytes(), b"abc");

        request.fill(b"xy").unwrap();
        assert_eq!(request.as_bytes(), b"xy");
    }

    #[test]
    fn oversized_fill_leaves_contents_alone() {
        let mut request = DiagRequest::with_capacity(4);
        request.fill(b"keep").unwrap();

        let err = request.fill(b"too long").unwrap_err();
        assert!(matches!(
            err,
            MuxError::MessageTooLarge {
                size: 8,
                capacity: 4
            }
        ));
        assert_eq!(request.as_bytes(), b"keep");
    }

    #[test]
    fn from_bytes_is_exactly_sized() {
        let request = DiagRequest::from_bytes(b"reply").with_tag(9);
        assert_eq!(request.capacity(), 5);
        assert_eq!(request.tag(), 9);
        assert_eq!(request.into_bytes().as_ref(), b"reply");
    }

    #[test]
    fn arming_replaces_previous_request() {
        let mut slot = RequestSlot::default();
        assert!(slot.arm(DiagRequest::with_capacity(16).with_tag(1)).is_none());

        let replaced = slot
            .arm(DiagRequest::with_capacity(32).with_tag(2))
            .expect("first request should be returned");
        assert_eq!(replaced.tag(), 1);
        assert_eq!(slot.capacity(), Some(32));

        let taken = slot.take().expect("slot should be armed");
        assert_eq!(taken.tag(), 2);
        assert_eq!(slot.capacity(), None);
    }
}
