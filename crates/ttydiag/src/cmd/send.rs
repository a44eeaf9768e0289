use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use ttydiag::mux::{Multiplexer, MuxError, SessionHandle};
use ttydiag::responder::{Responder, ResponderConfig, ResponsePolicy};
use ttydiag::transport::{InboundChunk, MemoryPort};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{
    io_error, mux_error, responder_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{
    now_unix_seconds, payload_preview, print_json, print_raw, print_table, OutputFormat,
};

const RETRY_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Serialize)]
struct ExchangeOutput {
    schema_id: &'static str,
    endpoint: usize,
    device_node: String,
    responder: &'static str,
    request_size: usize,
    response_size: Option<usize>,
    response: Option<String>,
    break_received: bool,
    timestamp: String,
}

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    if payload.is_empty() {
        return Err(CliError::new(USAGE, "payload must not be empty"));
    }

    let (_driver, mux) = args.driver.multiplexer()?;
    let responder = Responder::spawn(
        &mux,
        ResponderConfig {
            slot_capacity: args.capacity,
            policy: args.responder,
        },
    )
    .map_err(|err| responder_error("responder start failed", err))?;

    let port = Arc::new(MemoryPort::new());
    let session = mux
        .open(args.endpoint, port.clone())
        .map_err(|err| mux_error("open failed", err))?;

    let exchanged = submit_with_retry(&mux, session, &payload, timeout)
        .map_err(|err| mux_error("submit failed", err))
        .map(|_| collect_response(&port, timeout));

    mux.close(session);
    let stats = responder.shutdown();
    tracing::debug!(
        requests = stats.requests,
        responses = stats.responses,
        "exchange finished"
    );
    let response = exchanged?;

    let out = ExchangeOutput {
        schema_id: "ttydiag/cli/v1/exchange",
        endpoint: args.endpoint,
        device_node: mux.config().device_node(args.endpoint),
        responder: args.responder.as_str(),
        request_size: payload.len(),
        response_size: response.data.as_ref().map(Vec::len),
        response: response.data.as_deref().map(payload_preview),
        break_received: response.break_received,
        timestamp: now_unix_seconds(),
    };
    print_exchange(&out, response.data.as_deref(), format);

    if out.response.is_none() && args.responder != ResponsePolicy::Silent {
        return Err(CliError::new(TIMEOUT, format!("no response within {timeout:?}")));
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

/// Submit, retrying while the channel reports it is not ready.
fn submit_with_retry(
    mux: &Multiplexer,
    session: SessionHandle,
    payload: &[u8],
    timeout: Duration,
) -> Result<usize, MuxError> {
    let deadline = Instant::now() + timeout;
    loop {
        match mux.submit(session, payload) {
            Err(err) if err.is_retryable() && Instant::now() < deadline => {
                std::thread::sleep(RETRY_INTERVAL);
            }
            other => return other,
        }
    }
}

#[derive(Debug, Default)]
struct Response {
    data: Option<Vec<u8>>,
    break_received: bool,
}

/// Gather everything pushed to `port` until the first data chunk arrives or
/// `timeout` elapses. Later chunks already pushed are included.
fn collect_response(port: &MemoryPort, timeout: Duration) -> Response {
    let mut response = Response::default();
    let Some(first) = port.wait_for(timeout) else {
        return response;
    };
    let chunks = std::iter::once(first).chain(port.read_all());
    for chunk in chunks {
        absorb(&mut response, chunk);
    }
    response
}

fn absorb(response: &mut Response, chunk: InboundChunk) {
    if chunk.is_break() {
        response.break_received = true;
        return;
    }
    response
        .data
        .get_or_insert_with(Vec::new)
        .extend_from_slice(&chunk.data);
}

fn print_exchange(out: &ExchangeOutput, raw: Option<&[u8]>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            ["FIELD", "VALUE"],
            [
                ("endpoint", format!("{} ({})", out.endpoint, out.device_node)),
                ("responder", out.responder.to_string()),
                ("request size", out.request_size.to_string()),
                (
                    "response size",
                    out.response_size
                        .map_or_else(|| "-".to_string(), |n| n.to_string()),
                ),
                (
                    "response",
                    out.response.clone().unwrap_or_else(|| "<none>".to_string()),
                ),
                ("break", out.break_received.to_string()),
            ],
        ),
        OutputFormat::Pretty => {
            println!(
                "endpoint={} ({}) sent={} received={} payload={}",
                out.endpoint,
                out.device_node,
                out.request_size,
                out.response_size.unwrap_or(0),
                out.response.as_deref().unwrap_or("<none>")
            );
            if out.break_received {
                println!("break marker received");
            }
        }
        OutputFormat::Raw => {
            if let Some(data) = raw {
                print_raw(data);
            }
        }
    }
}
