use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use flashbridge_lib::bridge::ProgrammerServerBuilder;
use flashbridge_lib::config::BridgeConfig;
use flashbridge_lib::serial::SerialPortDevice;

const PROGRESS_POLL: Duration = Duration::from_millis(200);

/// Serve the bridge protocol on stdin/stdout for a flashing tool that
/// cannot open the serial port itself.
#[derive(Debug, Parser)]
#[command(name = "flashbridge", version, about)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port to bridge (overrides config)
    #[arg(short, long)]
    port: Option<String>,

    /// Initial baud rate (overrides config)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Log filter, e.g. `info` or `flashbridge_lib=debug` (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.validate()?;

    // stdout carries protocol frames; logs go to stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
        .target(env_logger::Target::Stderr)
        .init();

    let port_name = config.port.clone().context("no serial port given (--port or config)")?;
    let device = SerialPortDevice::open(&port_name, config.baud_rate, config.open_timeout())
        .with_context(|| format!("opening {}", port_name))?;
    let device_name = device.port_name().to_string();

    let server = ProgrammerServerBuilder::new(device, std::io::stdin(), std::io::stdout())
        .options(config.server.clone())
        .build();
    log::info!("session {} bridging {}", server.session_id(), device_name);
    server.start().context("starting programmer server")?;

    let mut last = server.progress();
    while server.is_running() {
        std::thread::sleep(PROGRESS_POLL);
        let now = server.progress();
        if now != last {
            log::info!("progress {}% ({} ms elapsed)", now.percent, now.elapsed_ms);
            last = now;
        }
    }

    server.close().context("stopping programmer server")?;
    log::info!("bridge for {} finished", port_name);
    Ok(())
}
