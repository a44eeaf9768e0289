mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "ttydiag",
    version,
    about = "Diag packet relay harness over in-memory terminals"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        env = "TTYDIAG_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use ttydiag::responder::ResponsePolicy;

    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "ttydiag",
            "send",
            "--endpoint",
            "1",
            "--data",
            "hello",
            "--responder",
            "reverse",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.endpoint, 1);
                assert_eq!(args.responder, ResponsePolicy::Reverse);
                assert_eq!(args.driver.device_name, "ttydiag");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "ttydiag",
            "send",
            "--data",
            "hello",
            "--file",
            "/tmp/payload.bin",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn send_requires_a_payload() {
        let err = Cli::try_parse_from(["ttydiag", "send"]).expect_err("payload is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_contend_subcommand() {
        let cli = Cli::try_parse_from(["ttydiag", "contend", "--writers", "6", "--rounds", "10"])
            .expect("contend args should parse");
        match cli.command {
            Command::Contend(args) => {
                assert_eq!(args.writers, 6);
                assert_eq!(args.rounds, 10);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_driver_flags() {
        let cli = Cli::try_parse_from(["ttydiag", "info", "--device-name", "diag", "--major", "200"])
            .expect("info args should parse");
        match cli.command {
            Command::Info(args) => {
                assert_eq!(args.driver.to_config().device_node(0), "diag0");
                assert_eq!(args.driver.major, 200);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
