use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use ttydiag::mux::{DriverConfig, Multiplexer};
use ttydiag::responder::{ResponsePolicy, DEFAULT_SLOT_CAPACITY};
use ttydiag::transport::{MemoryDriver, DIAG_MAJOR};

use crate::exit::{mux_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod contend;
pub mod doctor;
pub mod info;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write one request through an endpoint and print the owner's response.
    Send(SendArgs),
    /// Race writers for the request slot and verify only one wins each round.
    Contend(ContendArgs),
    /// Show driver configuration and device nodes.
    Info(InfoArgs),
    /// Run a loopback self-check of the relay protocol.
    Doctor(DoctorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Contend(args) => contend::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Terminal driver registration flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct DriverArgs {
    /// Device-node name prefix.
    #[arg(long, env = "TTYDIAG_DEVICE_NAME", default_value = "ttydiag")]
    pub device_name: String,
    /// Character-device major number.
    #[arg(long, env = "TTYDIAG_MAJOR", default_value_t = DIAG_MAJOR)]
    pub major: u32,
    /// First minor number.
    #[arg(long, env = "TTYDIAG_MINOR_START", default_value_t = 0)]
    pub minor_start: u32,
}

impl DriverArgs {
    pub fn to_config(&self) -> DriverConfig {
        DriverConfig {
            device_name: self.device_name.clone(),
            major: self.major,
            minor_start: self.minor_start,
            ..DriverConfig::default()
        }
    }

    /// An in-process multiplexer over the memory terminal layer.
    pub fn multiplexer(&self) -> CliResult<(Arc<MemoryDriver>, Multiplexer)> {
        let driver = Arc::new(MemoryDriver::new());
        let mux = Multiplexer::with_config(driver.clone(), self.to_config())
            .map_err(|err| mux_error("driver install failed", err))?;
        Ok((driver, mux))
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub driver: DriverArgs,
    /// Endpoint to write through.
    #[arg(long, short = 'e', default_value_t = 0)]
    pub endpoint: usize,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Capacity of the owner's request slot in bytes.
    #[arg(long, default_value_t = DEFAULT_SLOT_CAPACITY)]
    pub capacity: usize,
    /// How the built-in owner answers.
    #[arg(long, value_enum, default_value_t = ResponsePolicy::Echo)]
    pub responder: ResponsePolicy,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ContendArgs {
    #[command(flatten)]
    pub driver: DriverArgs,
    /// Number of writer threads, spread over the endpoints.
    #[arg(long, short = 'w', default_value_t = 4)]
    pub writers: usize,
    /// Number of rounds; every writer submits once per round.
    #[arg(long, short = 'r', default_value_t = 100)]
    pub rounds: usize,
    /// Capacity of the owner's request slot in bytes.
    #[arg(long, default_value_t = 64)]
    pub capacity: usize,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    #[command(flatten)]
    pub driver: DriverArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
    }

    #[test]
    fn driver_args_fill_config() {
        let args = DriverArgs {
            device_name: "diagtty".to_string(),
            major: 200,
            minor_start: 3,
        };
        let config = args.to_config();
        assert_eq!(config.device_node(1), "diagtty1");
        assert_eq!(config.minor(1), 4);
        assert_eq!(config.major, 200);
        assert_eq!(config.driver_name, "tty_diag");
    }
}
