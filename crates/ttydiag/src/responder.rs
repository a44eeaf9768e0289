//! A ready-made diag owner.
//!
//! [`Responder`] registers with a [`Multiplexer`], keeps one request slot
//! armed and answers every forwarded request on its own thread. It is what
//! the CLI harness runs as the owner, and a reference for writing real ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ttydiag_mux::{
    event_queue, ChannelEvent, DiagChannel, DiagRequest, MuxError, Multiplexer,
};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default receive slot capacity.
pub const DEFAULT_SLOT_CAPACITY: usize = 4096;

/// How the responder answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum ResponsePolicy {
    /// Send the request bytes back unchanged.
    #[default]
    Echo,
    /// Send the request bytes back in reverse order.
    Reverse,
    /// Never answer; abandon every request.
    Silent,
}

impl ResponsePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponsePolicy::Echo => "echo",
            ResponsePolicy::Reverse => "reverse",
            ResponsePolicy::Silent => "silent",
        }
    }
}

/// Responder settings.
#[derive(Debug, Clone, Copy)]
pub struct ResponderConfig {
    /// Capacity of each armed request. Default: [`DEFAULT_SLOT_CAPACITY`].
    pub slot_capacity: usize,
    /// Answering policy. Default: echo.
    pub policy: ResponsePolicy,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            policy: ResponsePolicy::default(),
        }
    }
}

/// Errors from [`Responder::spawn`].
#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    /// Registering as the diag owner failed.
    #[error(transparent)]
    Register(#[from] MuxError),

    /// The owner thread could not be started. The channel is already
    /// deregistered when this is returned.
    #[error("failed to spawn owner thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Counters reported when the responder stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponderStats {
    pub connects: u64,
    pub requests: u64,
    pub responses: u64,
    pub abandoned: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Owner thread answering requests until [`shutdown`](Self::shutdown).
pub struct Responder {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<ResponderStats>>,
}

impl Responder {
    /// Register with `mux` and start answering.
    pub fn spawn(mux: &Multiplexer, config: ResponderConfig) -> Result<Self, ResponderError> {
        let (sender, events) = event_queue();
        let channel = mux.register(sender)?;
        channel.arm(DiagRequest::with_capacity(config.slot_capacity));

        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("ttydiag-owner".to_string())
                .spawn(move || run_owner(channel, events, config, running))
                .map_err(ResponderError::Spawn)?
        };

        tracing::info!(
            policy = config.policy.as_str(),
            slot_capacity = config.slot_capacity,
            "responder started"
        );
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop the owner thread, deregister and return its counters.
    ///
    /// Requests already forwarded are answered before the thread exits.
    pub fn shutdown(mut self) -> ResponderStats {
        self.stop()
    }

    fn stop(&mut self) -> ResponderStats {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => ResponderStats::default(),
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_owner(
    channel: DiagChannel,
    events: Receiver<ChannelEvent>,
    config: ResponderConfig,
    running: Arc<AtomicBool>,
) -> ResponderStats {
    let mut stats = ResponderStats::default();

    loop {
        match events.recv_timeout(POLL_INTERVAL) {
            Ok(event) => handle_event(&channel, event, config, &mut stats),
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Anything queued before the stop request still gets an answer.
    while let Ok(event) = events.try_recv() {
        handle_event(&channel, event, config, &mut stats);
    }

    channel.deregister();
    tracing::info!(
        requests = stats.requests,
        responses = stats.responses,
        abandoned = stats.abandoned,
        "responder stopped"
    );
    stats
}

fn handle_event(
    channel: &DiagChannel,
    event: ChannelEvent,
    config: ResponderConfig,
    stats: &mut ResponderStats,
) {
    match event {
        ChannelEvent::Connect { endpoint } => {
            stats.connects += 1;
            tracing::debug!(endpoint, "terminal connected");
        }
        ChannelEvent::ReadDone {
            endpoint,
            mut request,
        } => {
            stats.requests += 1;
            stats.bytes_in += request.len() as u64;
            let answered = match config.policy {
                ResponsePolicy::Echo => channel.deliver(&request),
                ResponsePolicy::Reverse => {
                    let reversed: Vec<u8> = request.as_bytes().iter().rev().copied().collect();
                    request
                        .fill(&reversed)
                        .and_then(|_| channel.deliver(&request))
                }
                ResponsePolicy::Silent => {
                    channel.abandon();
                    stats.abandoned += 1;
                    Ok(())
                }
            };
            if let Err(err) = answered {
                tracing::warn!(endpoint, error = %err, "response not delivered; abandoning request");
                channel.abandon();
                stats.abandoned += 1;
            }
            request.clear();
            channel.arm(request);
        }
        ChannelEvent::WriteDone {
            endpoint, length, ..
        } => {
            stats.responses += 1;
            stats.bytes_out += length as u64;
            tracing::trace!(endpoint, length, "response written");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ttydiag_transport::{MemoryDriver, MemoryPort};

    use super::*;

    fn multiplexer() -> Multiplexer {
        Multiplexer::new(Arc::new(MemoryDriver::new())).expect("driver should install")
    }

    fn submit_retrying(mux: &Multiplexer, session: ttydiag_mux::SessionHandle, data: &[u8]) {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match mux.submit(session, data) {
                Ok(_) => return,
                Err(err) if err.is_retryable() && std::time::Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(err) => panic!("submit failed: {err}"),
            }
        }
    }

    #[test]
    fn echo_policy_answers_each_request() {
        let mux = multiplexer();
        let responder = Responder::spawn(&mux, ResponderConfig::default()).unwrap();
        let port = Arc::new(MemoryPort::new());
        let session = mux.open(0, port.clone()).unwrap();

        for message in [&b"first"[..], b"second", b"third"] {
            submit_retrying(&mux, session, message);
            let chunk = port
                .wait_for(Duration::from_secs(5))
                .expect("echo should arrive");
            assert_eq!(chunk.data.as_ref(), message);
        }

        mux.close(session);
        let stats = responder.shutdown();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.responses, 3);
        assert_eq!(stats.bytes_in, stats.bytes_out);
        assert!(!mux.is_registered());
    }

    #[test]
    fn second_responder_reports_registration_error() {
        let mux = multiplexer();
        let first = Responder::spawn(&mux, ResponderConfig::default()).unwrap();

        let second = Responder::spawn(&mux, ResponderConfig::default());
        let Err(err) = second else {
            panic!("second owner should be rejected");
        };
        assert!(matches!(
            err,
            ResponderError::Register(MuxError::AlreadyRegistered)
        ));
        assert_eq!(err.to_string(), "diag owner already registered");

        first.shutdown();
    }

    #[test]
    fn reverse_policy_reverses_bytes() {
        let mux = multiplexer();
        let responder = Responder::spawn(
            &mux,
            ResponderConfig {
                policy: ResponsePolicy::Reverse,
                ..ResponderConfig::default()
            },
        )
        .unwrap();
        let port = Arc::new(MemoryPort::new());
        let session = mux.open(1, port.clone()).unwrap();

        submit_retrying(&mux, session, b"abc");
        let chunk = port.wait_for(Duration::from_secs(5)).unwrap();
        assert_eq!(chunk.data.as_ref(), b"cba");

        drop(responder);
        assert!(!mux.is_registered());
    }

    #[test]
    fn silent_policy_frees_slot_without_answering() {
        let mux = multiplexer();
        let responder = Responder::spawn(
            &mux,
            ResponderConfig {
                slot_capacity: 8,
                policy: ResponsePolicy::Silent,
            },
        )
        .unwrap();
        let port = Arc::new(MemoryPort::new());
        let session = mux.open(0, port.clone()).unwrap();

        submit_retrying(&mux, session, b"one");
        submit_retrying(&mux, session, b"two");
        assert!(port.wait_for(Duration::from_millis(50)).is_none());

        let err = mux.submit(session, b"way too long").unwrap_err();
        assert!(matches!(
            err,
            MuxError::MessageTooLarge { .. } | MuxError::NotReady(_)
        ));

        let stats = responder.shutdown();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.abandoned, 2);
        assert_eq!(stats.responses, 0);
    }

    #[test]
    fn undeliverable_response_is_abandoned() {
        let mux = multiplexer();
        let responder = Responder::spawn(&mux, ResponderConfig::default()).unwrap();
        let port = Arc::new(MemoryPort::with_capacity(2));
        let session = mux.open(0, port.clone()).unwrap();

        submit_retrying(&mux, session, b"longer than two");
        submit_retrying(&mux, session, b"ok");
        let chunk = port.wait_for(Duration::from_secs(5)).unwrap();
        assert_eq!(chunk.data.as_ref(), b"ok");

        let stats = responder.shutdown();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.responses, 1);
    }
}
