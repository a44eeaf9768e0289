use std::sync::mpsc;

use crate::request::DiagRequest;

/// Notifications delivered to the diag owner.
///
/// Always dispatched after the multiplexer lock is released, so a handler may
/// call straight back into the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A terminal endpoint was opened.
    Connect { endpoint: usize },
    /// A terminal write filled the armed slot. The request now belongs to the
    /// owner again.
    ReadDone {
        endpoint: usize,
        request: DiagRequest,
    },
    /// A response was pushed to a terminal endpoint.
    WriteDone {
        endpoint: usize,
        tag: u64,
        length: usize,
    },
}

impl ChannelEvent {
    /// Short event name for logs and CLI output.
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::Connect { .. } => "connect",
            ChannelEvent::ReadDone { .. } => "read_done",
            ChannelEvent::WriteDone { .. } => "write_done",
        }
    }

    /// Endpoint the event concerns.
    pub fn endpoint(&self) -> usize {
        match self {
            ChannelEvent::Connect { endpoint }
            | ChannelEvent::ReadDone { endpoint, .. }
            | ChannelEvent::WriteDone { endpoint, .. } => *endpoint,
        }
    }
}

/// Receives owner notifications.
pub trait Notify: Send + Sync {
    fn notify(&self, event: ChannelEvent);
}

impl<F> Notify for F
where
    F: Fn(ChannelEvent) + Send + Sync,
{
    fn notify(&self, event: ChannelEvent) {
        self(event)
    }
}

/// [`Notify`] sink that queues events for an owner thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ChannelEvent>,
}

impl Notify for EventSender {
    fn notify(&self, event: ChannelEvent) {
        // The owner hung up its receiver; nothing left to tell.
        let _ = self.tx.send(event);
    }
}

/// Create a queued notification sink and its receiving end.
pub fn event_queue() -> (EventSender, mpsc::Receiver<ChannelEvent>) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn closures_are_notify_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |event: ChannelEvent| seen.lock().unwrap().push(event.name())
        };

        sink.notify(ChannelEvent::Connect { endpoint: 1 });
        assert_eq!(*seen.lock().unwrap(), vec!["connect"]);
    }

    #[test]
    fn event_queue_delivers_in_order() {
        let (sender, rx) = event_queue();
        sender.notify(ChannelEvent::Connect { endpoint: 0 });
        sender.notify(ChannelEvent::WriteDone {
            endpoint: 0,
            tag: 3,
            length: 5,
        });

        assert_eq!(rx.recv().unwrap().name(), "connect");
        let event = rx.recv().unwrap();
        assert_eq!(event.endpoint(), 0);
        assert!(matches!(event, ChannelEvent::WriteDone { tag: 3, length: 5, .. }));
    }

    #[test]
    fn send_after_receiver_drop_is_ignored() {
        let (sender, rx) = event_queue();
        drop(rx);
        sender.notify(ChannelEvent::Connect { endpoint: 0 });
    }
}
