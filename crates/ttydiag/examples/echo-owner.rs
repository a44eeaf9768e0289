//! Hand-written diag owner answering both endpoints.
//!
//! Run with:
//!   cargo run --example echo-owner
//!
//! Two terminal threads write through their own endpoint; the owner thread
//! upper-cases each request and sends it back.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ttydiag::mux::{event_queue, ChannelEvent, DiagRequest, Multiplexer};
use ttydiag::transport::{MemoryDriver, MemoryPort};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mux = Multiplexer::new(Arc::new(MemoryDriver::new()))?;
    let (sender, events) = event_queue();
    let channel = mux.register(sender)?;
    channel.arm(DiagRequest::with_capacity(256));

    let owner = thread::spawn(move || {
        let mut answered = 0;
        while answered < 4 {
            let Ok(event) = events.recv_timeout(Duration::from_secs(5)) else {
                break;
            };
            match event {
                ChannelEvent::ReadDone {
                    endpoint,
                    mut request,
                } => {
                    let upper = request.as_bytes().to_ascii_uppercase();
                    eprintln!("owner: {} bytes from endpoint {endpoint}", upper.len());
                    if request.fill(&upper).is_err() || channel.deliver(&request).is_err() {
                        channel.abandon();
                    }
                    channel.arm(request);
                }
                ChannelEvent::WriteDone { .. } => answered += 1,
                ChannelEvent::Connect { endpoint } => eprintln!("owner: endpoint {endpoint} open"),
            }
        }
        channel.deregister();
    });

    let terminals: Vec<_> = (0..2)
        .map(|index| {
            let mux = mux.clone();
            thread::spawn(move || -> Result<(), String> {
                let port = Arc::new(MemoryPort::new());
                let session = mux.open(index, port.clone()).map_err(|e| e.to_string())?;
                for n in 0..2 {
                    let message = format!("hello {n} from terminal {index}");
                    while let Err(err) = mux.submit(session, message.as_bytes()) {
                        if !err.is_retryable() {
                            return Err(err.to_string());
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                    if let Some(chunk) = port.wait_for(Duration::from_secs(5)) {
                        println!("terminal {index}: {}", String::from_utf8_lossy(&chunk.data));
                    }
                }
                mux.close(session);
                Ok(())
            })
        })
        .collect();

    for terminal in terminals {
        terminal.join().map_err(|_| "terminal thread panicked")??;
    }
    owner.join().map_err(|_| "owner thread panicked")?;
    Ok(())
}
