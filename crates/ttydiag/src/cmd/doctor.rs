use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use ttydiag::mux::{
    event_queue, ChannelEvent, DiagChannel, DiagRequest, Multiplexer, MuxError, NotReadyReason,
    SessionHandle, ENDPOINT_COUNT,
};
use ttydiag::transport::{DeviceEvent, MemoryDriver, MemoryPort};

use crate::cmd::{DoctorArgs, DriverArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

const EVENT_TIMEOUT: Duration = Duration::from_secs(1);
const PROBE_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    schema_id: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

/// Loopback rig the protocol checks run against, built up step by step.
#[derive(Default)]
struct Loopback {
    driver: Option<Arc<MemoryDriver>>,
    mux: Option<Multiplexer>,
    channel: Option<DiagChannel>,
    events: Option<Receiver<ChannelEvent>>,
    ports: Vec<Arc<MemoryPort>>,
    sessions: Vec<SessionHandle>,
}

type Step = fn(&mut Loopback, &DriverArgs) -> Result<String, String>;

const STEPS: [(&str, Step); 7] = [
    ("driver_install", driver_install),
    ("owner_register", owner_register),
    ("endpoint_open", endpoint_open),
    ("round_trip", round_trip),
    ("busy_rejection", busy_rejection),
    ("oversize_rejection", oversize_rejection),
    ("break_on_deregister", break_on_deregister),
];

pub fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let mut checks = run_checks(&args.driver);
    checks.push(compiled_features_check());

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let overall = if has_fail { "fail" } else { "pass" };

    let output = DoctorOutput {
        schema_id: "ttydiag/cli/v1/doctor-report",
        checks,
        overall,
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

/// Run every protocol step in order. Once a step fails the rest are skipped,
/// since each builds on the state the previous one left behind.
fn run_checks(args: &DriverArgs) -> Vec<CheckResult> {
    let mut rig = Loopback::default();
    let mut failed = false;
    STEPS
        .iter()
        .map(|(name, step)| {
            let (status, detail) = if failed {
                (CheckStatus::Skip, "earlier check failed".to_string())
            } else {
                match step(&mut rig, args) {
                    Ok(detail) => (CheckStatus::Pass, detail),
                    Err(detail) => {
                        failed = true;
                        (CheckStatus::Fail, detail)
                    }
                }
            };
            CheckResult {
                name: name.to_string(),
                status,
                detail,
            }
        })
        .collect()
}

fn driver_install(rig: &mut Loopback, args: &DriverArgs) -> Result<String, String> {
    let driver = Arc::new(MemoryDriver::new());
    let mux = Multiplexer::with_config(driver.clone(), args.to_config()).map_err(describe)?;
    let detail = format!(
        "{} installed (major {})",
        mux.config().driver_name,
        mux.config().major
    );
    rig.driver = Some(driver);
    rig.mux = Some(mux);
    Ok(detail)
}

fn owner_register(rig: &mut Loopback, _args: &DriverArgs) -> Result<String, String> {
    let (mux, driver) = (rig.mux()?, rig.driver()?);
    let (sender, events) = event_queue();
    let channel = mux.register(sender).map_err(describe)?;
    let nodes = driver.device_nodes();
    if nodes.len() != ENDPOINT_COUNT {
        return Err(format!("expected {ENDPOINT_COUNT} device nodes, found {nodes:?}"));
    }
    rig.channel = Some(channel);
    rig.events = Some(events);
    Ok(format!("device nodes {}", nodes.join(", ")))
}

fn endpoint_open(rig: &mut Loopback, _args: &DriverArgs) -> Result<String, String> {
    let mux = rig.mux()?.clone();
    for index in 0..ENDPOINT_COUNT {
        let port = Arc::new(MemoryPort::new());
        let session = mux.open(index, port.clone()).map_err(describe)?;
        match rig.next_event()? {
            ChannelEvent::Connect { endpoint } if endpoint == index => {}
            other => return Err(format!("expected connect on {index}, got {}", other.name())),
        }
        rig.ports.push(port);
        rig.sessions.push(session);
    }
    Ok(format!("{ENDPOINT_COUNT} endpoints open, owner notified"))
}

fn round_trip(rig: &mut Loopback, _args: &DriverArgs) -> Result<String, String> {
    rig.channel()?
        .arm(DiagRequest::with_capacity(PROBE_CAPACITY));
    rig.mux()?
        .submit(rig.session(0)?, b"ping")
        .map_err(describe)?;
    let request = rig.expect_read_done(0)?;
    if request.as_bytes() != b"ping" {
        return Err("owner received different bytes than were written".to_string());
    }
    rig.channel()?.deliver(&request).map_err(describe)?;
    let echoed = rig.ports[0].read_bytes();
    if echoed.as_ref() != b"ping" {
        return Err(format!("endpoint 0 received {} bytes", echoed.len()));
    }
    rig.channel()?.arm(request);
    Ok("request forwarded and response routed back".to_string())
}

fn busy_rejection(rig: &mut Loopback, _args: &DriverArgs) -> Result<String, String> {
    let mux = rig.mux()?.clone();
    mux.submit(rig.session(0)?, b"first").map_err(describe)?;
    let request = rig.expect_read_done(0)?;

    let result = match mux.submit(rig.session(1)?, b"second") {
        Err(MuxError::NotReady(NotReadyReason::ResponsePending)) => {
            Ok("second writer rejected while a response is pending".to_string())
        }
        Ok(_) => Err("second request accepted while one was in flight".to_string()),
        Err(err) => Err(format!("unexpected error: {err}")),
    };

    let channel = rig.channel()?;
    channel.abandon();
    channel.arm(request);
    result
}

fn oversize_rejection(rig: &mut Loopback, _args: &DriverArgs) -> Result<String, String> {
    let mux = rig.mux()?.clone();
    let session = rig.session(1)?;
    let oversized = vec![b'x'; PROBE_CAPACITY + 1];
    match mux.submit(session, &oversized) {
        Err(MuxError::MessageTooLarge { size, capacity }) => {
            if mux.space_available(session) != PROBE_CAPACITY {
                return Err("rejected write disturbed the armed slot".to_string());
            }
            Ok(format!("{size}-byte write rejected by {capacity}-byte slot"))
        }
        Ok(_) => Err("oversized write accepted".to_string()),
        Err(err) => Err(format!("unexpected error: {err}")),
    }
}

fn break_on_deregister(rig: &mut Loopback, _args: &DriverArgs) -> Result<String, String> {
    rig.mux()?
        .submit(rig.session(1)?, b"unanswered")
        .map_err(describe)?;
    rig.expect_read_done(1)?;

    let channel = rig
        .channel
        .take()
        .ok_or_else(|| "owner not registered".to_string())?;
    channel.deregister();

    let broke = rig.ports[1].read_all().iter().any(|chunk| chunk.is_break());
    if !broke {
        return Err("waiting endpoint got no break marker".to_string());
    }
    let removed: Vec<usize> = rig
        .driver()?
        .events()
        .into_iter()
        .filter_map(|event| match event {
            DeviceEvent::Unregistered(index) => Some(index),
            DeviceEvent::Registered(_) => None,
        })
        .collect();
    let expected: Vec<usize> = (0..ENDPOINT_COUNT).rev().collect();
    if removed != expected {
        return Err(format!("device nodes removed in order {removed:?}"));
    }

    let mux = rig.mux()?.clone();
    for session in rig.sessions.drain(..) {
        mux.close(session);
    }
    Ok("break delivered, device nodes removed".to_string())
}

impl Loopback {
    fn mux(&self) -> Result<&Multiplexer, String> {
        self.mux.as_ref().ok_or_else(|| "driver not installed".to_string())
    }

    fn driver(&self) -> Result<&MemoryDriver, String> {
        self.driver
            .as_deref()
            .ok_or_else(|| "driver not installed".to_string())
    }

    fn channel(&self) -> Result<&DiagChannel, String> {
        self.channel
            .as_ref()
            .ok_or_else(|| "owner not registered".to_string())
    }

    fn session(&self, index: usize) -> Result<SessionHandle, String> {
        self.sessions
            .get(index)
            .copied()
            .ok_or_else(|| format!("endpoint {index} not open"))
    }

    fn next_event(&self) -> Result<ChannelEvent, String> {
        self.events
            .as_ref()
            .ok_or_else(|| "owner not registered".to_string())?
            .recv_timeout(EVENT_TIMEOUT)
            .map_err(|_| "owner notification not received".to_string())
    }

    /// Next forwarded request, skipping write-done notifications.
    fn expect_read_done(&self, expected: usize) -> Result<DiagRequest, String> {
        loop {
            match self.next_event()? {
                ChannelEvent::ReadDone { endpoint, request } if endpoint == expected => {
                    return Ok(request)
                }
                ChannelEvent::WriteDone { .. } => continue,
                other => {
                    return Err(format!(
                        "expected read_done on {expected}, got {} on {}",
                        other.name(),
                        other.endpoint()
                    ))
                }
            }
        }
    }
}

fn describe(err: MuxError) -> String {
    err.to_string()
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "async") {
        features.push("async");
    }
    if cfg!(feature = "cli") {
        features.push("cli");
    }

    CheckResult {
        name: "compiled_features".to_string(),
        status: CheckStatus::Info,
        detail: features.join(", "),
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("ttydiag doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<22} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_args() -> DriverArgs {
        DriverArgs {
            device_name: "ttydiag".to_string(),
            major: 185,
            minor_start: 0,
        }
    }

    #[test]
    fn loopback_checks_all_pass() {
        let checks = run_checks(&default_args());
        assert_eq!(checks.len(), STEPS.len());
        for check in &checks {
            assert_eq!(check.status, CheckStatus::Pass, "{}: {}", check.name, check.detail);
        }
    }

    #[test]
    fn failure_skips_later_steps() {
        let mut rig = Loopback::default();
        let err = owner_register(&mut rig, &default_args()).unwrap_err();
        assert_eq!(err, "driver not installed");
    }

    #[test]
    fn doctor_output_has_overall_status() {
        let checks = vec![CheckResult {
            name: "x".to_string(),
            status: CheckStatus::Pass,
            detail: "ok".to_string(),
        }];
        let output = DoctorOutput {
            schema_id: "x",
            checks,
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
    }
}
