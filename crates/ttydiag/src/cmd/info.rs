use serde::Serialize;
use ttydiag::mux::{ChannelEvent, DriverConfig, ENDPOINT_COUNT};

use crate::cmd::InfoArgs;
use crate::exit::{mux_error, CliResult, SUCCESS};
use crate::output::{print_grid, print_json, OutputFormat};

#[derive(Serialize)]
struct EndpointInfo {
    index: usize,
    device_node: String,
    minor: u32,
}

#[derive(Serialize)]
struct SettingsInfo {
    baud: u32,
    data_bits: u8,
    receiver_enabled: bool,
    ignore_break: bool,
    output_processing: bool,
    canonical: bool,
    echo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    termios: Option<TermiosFlags>,
}

#[derive(Serialize)]
struct TermiosFlags {
    c_iflag: String,
    c_oflag: String,
    c_cflag: Option<String>,
    c_lflag: String,
}

#[derive(Serialize)]
struct InfoOutput {
    schema_id: &'static str,
    driver_name: String,
    major: u32,
    minor_start: u32,
    endpoint_count: usize,
    endpoints: Vec<EndpointInfo>,
    registered_nodes: Vec<String>,
    settings: SettingsInfo,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let (driver, mux) = args.driver.multiplexer()?;

    // Device nodes only exist while an owner is registered.
    let channel = mux
        .register(|_: ChannelEvent| {})
        .map_err(|err| mux_error("owner registration failed", err))?;
    let registered_nodes = driver.device_nodes();
    let status = mux.status();
    channel.deregister();

    let config = mux.config();
    let out = InfoOutput {
        schema_id: "ttydiag/cli/v1/driver-info",
        driver_name: config.driver_name.clone(),
        major: config.major,
        minor_start: config.minor_start,
        endpoint_count: ENDPOINT_COUNT,
        endpoints: status
            .endpoints
            .into_iter()
            .map(|ep| EndpointInfo {
                minor: config.minor(ep.index),
                index: ep.index,
                device_node: ep.device_node,
            })
            .collect(),
        registered_nodes,
        settings: settings_info(config),
    };

    print_info(&out, format);
    Ok(SUCCESS)
}

fn settings_info(config: &DriverConfig) -> SettingsInfo {
    let s = &config.settings;
    SettingsInfo {
        baud: s.baud,
        data_bits: s.data_bits,
        receiver_enabled: s.receiver_enabled,
        ignore_break: s.ignore_break,
        output_processing: s.output_processing,
        canonical: s.canonical,
        echo: s.echo,
        termios: termios_flags(config),
    }
}

#[cfg(unix)]
fn termios_flags(config: &DriverConfig) -> Option<TermiosFlags> {
    let s = &config.settings;
    Some(TermiosFlags {
        c_iflag: format!("{:#o}", s.c_iflag()),
        c_oflag: format!("{:#o}", s.c_oflag()),
        c_cflag: s.c_cflag().map(|flags| format!("{flags:#o}")),
        c_lflag: format!("{:#o}", s.c_lflag()),
    })
}

#[cfg(not(unix))]
fn termios_flags(_config: &DriverConfig) -> Option<TermiosFlags> {
    None
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            println!(
                "Driver: {} (major {}, minor start {})",
                out.driver_name, out.major, out.minor_start
            );
            print_grid(
                &["ENDPOINT", "DEVICE", "MINOR"],
                out.endpoints
                    .iter()
                    .map(|ep| {
                        vec![
                            ep.index.to_string(),
                            ep.device_node.clone(),
                            ep.minor.to_string(),
                        ]
                    })
                    .collect(),
            );
            print_settings(&out.settings);
        }
        OutputFormat::Pretty => {
            println!("Driver Info:");
            println!("  Driver:           {}", out.driver_name);
            println!("  Major:            {}", out.major);
            println!("  Endpoints:        {}", out.endpoint_count);
            for ep in &out.endpoints {
                println!("  Device node:      {} (minor {})", ep.device_node, ep.minor);
            }
            print_settings(&out.settings);
        }
        OutputFormat::Raw => {
            for ep in &out.endpoints {
                println!("{}", ep.device_node);
            }
        }
    }
}

fn print_settings(s: &SettingsInfo) {
    println!(
        "  Line:             {} baud, {} data bits, receiver {}, ignore break {}",
        s.baud,
        s.data_bits,
        on_off(s.receiver_enabled),
        on_off(s.ignore_break)
    );
    println!(
        "  Modes:            output processing {}, canonical {}, echo {}",
        on_off(s.output_processing),
        on_off(s.canonical),
        on_off(s.echo)
    );
    if let Some(t) = &s.termios {
        println!(
            "  termios:          iflag={} oflag={} cflag={} lflag={}",
            t.c_iflag,
            t.c_oflag,
            t.c_cflag.as_deref().unwrap_or("unsupported"),
            t.c_lflag
        );
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}
