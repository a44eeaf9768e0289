#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn ttydiag(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ttydiag"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .env_remove("TTYDIAG_DEVICE_NAME")
        .env_remove("TTYDIAG_MAJOR")
        .env_remove("TTYDIAG_MINOR_START")
        .output()
        .expect("ttydiag should run")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("stdout should be one JSON document")
}

#[test]
fn send_echoes_through_endpoint() {
    let output = ttydiag(&["--format", "json", "send", "--endpoint", "1", "--data", "status?"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["endpoint"], 1);
    assert_eq!(json["device_node"], "ttydiag1");
    assert_eq!(json["request_size"], 7);
    assert_eq!(json["response"], "status?");
    assert_eq!(json["break_received"], false);
}

#[test]
fn send_reverse_responder_in_raw_format() {
    let output = ttydiag(&["--format", "raw", "send", "--data", "abc", "--responder", "reverse"]);

    assert!(output.status.success());
    assert_eq!(output.stdout, b"cba");
}

#[test]
fn send_silent_responder_reports_no_response() {
    let output = ttydiag(&[
        "--format",
        "json",
        "send",
        "--data",
        "ping",
        "--responder",
        "silent",
        "--timeout",
        "200ms",
    ]);

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert!(json["response"].is_null());
}

#[test]
fn send_oversized_payload_returns_data_invalid() {
    let output = ttydiag(&["send", "--data", "0123456789", "--capacity", "4"]);

    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("message too large"));
}

#[test]
fn send_bad_endpoint_returns_usage() {
    let output = ttydiag(&["send", "--endpoint", "5", "--data", "x"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn send_reads_payload_file() {
    let path = std::env::temp_dir().join(format!("ttydiag-payload-{}.bin", std::process::id()));
    std::fs::write(&path, b"from file").expect("payload file should be writable");

    let output = ttydiag(&[
        "--format",
        "json",
        "send",
        "--file",
        path.to_str().expect("temp path should be utf-8"),
    ]);
    let _ = std::fs::remove_file(&path);

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["response"], "from file");
}

#[test]
fn contend_reports_single_winner_per_round() {
    let output = ttydiag(&["--format", "json", "contend", "--writers", "6", "--rounds", "25"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["accepted"], 25);
    assert_eq!(json["violations"], 0);
    assert_eq!(json["misrouted_responses"], 0);
    assert_eq!(json["panicked_writers"], 0);
    assert_eq!(json["rejected_pending"], 25 * 5);
}

#[test]
fn info_lists_device_nodes() {
    let output = ttydiag(&["--format", "json", "info", "--minor-start", "2"]);

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["driver_name"], "tty_diag");
    assert_eq!(json["endpoint_count"], 2);
    assert_eq!(json["endpoints"][0]["device_node"], "ttydiag0");
    assert_eq!(json["endpoints"][0]["minor"], 2);
    assert_eq!(json["endpoints"][1]["minor"], 3);
    assert_eq!(json["registered_nodes"][1], "ttydiag1");
}

#[test]
fn info_reads_device_name_from_env() {
    let output = Command::new(env!("CARGO_BIN_EXE_ttydiag"))
        .args(["--format", "raw", "info"])
        .env("TTYDIAG_DEVICE_NAME", "diagx")
        .output()
        .expect("ttydiag should run");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "diagx0\ndiagx1\n");
}

#[test]
fn doctor_passes_loopback_checks() {
    let output = ttydiag(&["--format", "json", "doctor"]);

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["overall"], "pass");
    assert_eq!(json["schema_id"], "ttydiag/cli/v1/doctor-report");
}

#[test]
fn version_prints_package_version() {
    let output = ttydiag(&["version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("ttydiag {}", env!("CARGO_PKG_VERSION")));
}
