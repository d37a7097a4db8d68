/* guncon2d: userspace driver for the Namco GunCon 2 light gun.
 *
 * udev reports the gun, the daemon claims its USB interface, decodes the
 * interrupt reports and feeds them to virtual input devices. Calibration
 * and power management are exposed on the system bus. */

mod calibration;
mod config;
mod dbus;
mod device;
mod poller;
mod report;
mod session;
mod sink;
mod transport;
mod udev_monitor;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{DaemonConfig, DEFAULT_CONFIG_PATH};
use sink::SinkKind;

/// guncon2d: GunCon 2 light gun daemon.
#[derive(Parser)]
#[command(name = "guncon2d", version, about)]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Event sink, overriding `Sink=` from the configuration.
    #[arg(long, value_enum)]
    sink: Option<SinkKind>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("guncon2d {} starting", env!("CARGO_PKG_VERSION"));

    let config = DaemonConfig::load(&args.config);
    let sink_kind = args.sink.unwrap_or(config.sink);
    info!("Using {:?} sink", sink_kind);

    let (device_tx, device_rx) = mpsc::channel(32);
    let _monitor = udev_monitor::spawn(device_tx).context("Failed to start udev monitor")?;

    dbus::run_server(device_rx, config, sink_kind).await?;

    info!("guncon2d stopped");
    Ok(())
}
