use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use serde::Serialize;
use ttydiag::mux::{
    event_queue, ChannelEvent, DiagRequest, MuxError, NotReadyReason, SessionHandle,
    ENDPOINT_COUNT,
};
use ttydiag::transport::MemoryPort;

use crate::cmd::ContendArgs;
use crate::exit::{mux_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_grid, print_json, OutputFormat};

/// Per-round submit outcomes, reset by the coordinator between rounds.
#[derive(Default)]
struct RoundTally {
    accepted: AtomicUsize,
    pending: AtomicUsize,
    no_slot: AtomicUsize,
    other: AtomicUsize,
}

impl RoundTally {
    fn record(&self, outcome: &Result<usize, MuxError>) {
        let counter = match outcome {
            Ok(_) => &self.accepted,
            Err(MuxError::NotReady(NotReadyReason::ResponsePending)) => &self.pending,
            Err(MuxError::NotReady(NotReadyReason::NoSlot)) => &self.no_slot,
            Err(_) => &self.other,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn take(&self) -> [usize; 4] {
        [
            self.accepted.swap(0, Ordering::SeqCst),
            self.pending.swap(0, Ordering::SeqCst),
            self.no_slot.swap(0, Ordering::SeqCst),
            self.other.swap(0, Ordering::SeqCst),
        ]
    }
}

#[derive(Serialize, Default, Debug)]
struct ContendOutput {
    schema_id: &'static str,
    writers: usize,
    rounds: usize,
    accepted: usize,
    rejected_pending: usize,
    rejected_no_slot: usize,
    rejected_other: usize,
    wins_per_endpoint: Vec<usize>,
    misrouted_responses: usize,
    panicked_writers: usize,
    violations: usize,
}

pub fn run(args: ContendArgs, format: OutputFormat) -> CliResult<i32> {
    if args.writers == 0 || args.rounds == 0 {
        return Err(CliError::new(USAGE, "--writers and --rounds must be at least 1"));
    }

    let (_driver, mux) = args.driver.multiplexer()?;
    let (sender, events) = event_queue();
    let channel = mux
        .register(sender)
        .map_err(|err| mux_error("owner registration failed", err))?;

    let ports: Vec<Arc<MemoryPort>> = (0..ENDPOINT_COUNT)
        .map(|_| Arc::new(MemoryPort::new()))
        .collect();
    let mut sessions: Vec<SessionHandle> = Vec::with_capacity(ENDPOINT_COUNT);
    for (index, port) in ports.iter().enumerate() {
        let session = mux
            .open(index, port.clone())
            .map_err(|err| mux_error("open failed", err))?;
        sessions.push(session);
    }
    channel.arm(DiagRequest::with_capacity(args.capacity));

    let tally = Arc::new(RoundTally::default());
    let barrier = Arc::new(Barrier::new(args.writers + 1));
    let writers: Vec<_> = (0..args.writers)
        .map(|writer| {
            let mux = mux.clone();
            let session = sessions[writer % ENDPOINT_COUNT];
            let tally = Arc::clone(&tally);
            let barrier = Arc::clone(&barrier);
            let rounds = args.rounds;
            thread::Builder::new()
                .name(format!("writer-{writer}"))
                .spawn(move || {
                    for round in 0..rounds {
                        let payload = format!("w{writer}r{round}");
                        barrier.wait();
                        tally.record(&mux.submit(session, payload.as_bytes()));
                        barrier.wait();
                    }
                })
        })
        .collect::<Result<_, _>>()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to spawn writer: {err}")))?;

    let mut out = ContendOutput {
        schema_id: "ttydiag/cli/v1/contention-report",
        writers: args.writers,
        rounds: args.rounds,
        wins_per_endpoint: vec![0; ENDPOINT_COUNT],
        ..ContendOutput::default()
    };

    for round in 0..args.rounds {
        barrier.wait();
        barrier.wait();

        let [accepted, pending, no_slot, other] = tally.take();
        out.accepted += accepted;
        out.rejected_pending += pending;
        out.rejected_no_slot += no_slot;
        out.rejected_other += other;

        let mut forwarded = 0;
        while let Ok(event) = events.try_recv() {
            let ChannelEvent::ReadDone { endpoint, request } = event else {
                continue;
            };
            forwarded += 1;
            out.wins_per_endpoint[endpoint] += 1;
            if let Err(err) = channel.deliver(&request) {
                tracing::warn!(round, endpoint, error = %err, "response not delivered");
                channel.abandon();
            }
            match ports[endpoint].read() {
                Some(chunk) if chunk.data.as_ref() == request.as_bytes() => {}
                _ => out.misrouted_responses += 1,
            }
            channel.arm(request);
        }

        if accepted != 1 || forwarded != 1 {
            tracing::warn!(round, accepted, forwarded, "slot contention invariant violated");
            out.violations += 1;
        }
    }

    out.panicked_writers = join_writers(writers);
    for session in sessions {
        mux.close(session);
    }
    channel.deregister();

    print_report(&out, format);
    if !out.is_clean() {
        return Ok(FAILURE);
    }
    Ok(SUCCESS)
}

impl ContendOutput {
    fn failures(&self) -> usize {
        self.violations + self.misrouted_responses + self.panicked_writers
    }

    fn is_clean(&self) -> bool {
        self.failures() == 0
    }
}

/// Join every writer, returning how many panicked.
fn join_writers(writers: Vec<thread::JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for (writer, handle) in writers.into_iter().enumerate() {
        if handle.join().is_err() {
            tracing::error!(writer, "writer thread panicked");
            panicked += 1;
        }
    }
    panicked
}

fn print_report(out: &ContendOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let wins = out
                .wins_per_endpoint
                .iter()
                .enumerate()
                .map(|(endpoint, wins)| format!("{endpoint}:{wins}"))
                .collect::<Vec<_>>()
                .join(" ");
            print_grid(
                &["WRITERS", "ROUNDS", "ACCEPTED", "BUSY", "NO SLOT", "WINS", "VIOLATIONS"],
                vec![vec![
                    out.writers.to_string(),
                    out.rounds.to_string(),
                    out.accepted.to_string(),
                    out.rejected_pending.to_string(),
                    out.rejected_no_slot.to_string(),
                    wins,
                    out.failures().to_string(),
                ]],
            );
        }
        OutputFormat::Raw => {
            println!("{}", if out.is_clean() { "pass" } else { "fail" });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_by_reason_and_resets() {
        let tally = RoundTally::default();
        tally.record(&Ok(3));
        tally.record(&Err(MuxError::NotReady(NotReadyReason::ResponsePending)));
        tally.record(&Err(MuxError::NotReady(NotReadyReason::ResponsePending)));
        tally.record(&Err(MuxError::NotReady(NotReadyReason::NoSlot)));
        tally.record(&Err(MuxError::Disconnected(1)));

        assert_eq!(tally.take(), [1, 2, 1, 1]);
        assert_eq!(tally.take(), [0, 0, 0, 0]);
    }

    #[test]
    fn panicked_writer_is_counted_and_fails_report() {
        let writers = vec![
            thread::spawn(|| {}),
            thread::spawn(|| panic!("writer gave up")),
        ];
        let mut out = ContendOutput {
            panicked_writers: join_writers(writers),
            ..ContendOutput::default()
        };
        assert_eq!(out.panicked_writers, 1);
        assert!(!out.is_clean());

        out.panicked_writers = 0;
        assert!(out.is_clean());
    }
}
