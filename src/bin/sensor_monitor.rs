/// Headless sensor monitor
///
/// Opens the sensor port, starts the stream and prints every mapped label.
/// Run with: cargo run --bin sensor_monitor -- --port /dev/ttyUSB0

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use mathassist::config_loader::{load_config_or_default, EnvDefaults};
use mathassist::serial_reader::{available_ports, label_channel, spawn_reader};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial port of the sensor (falls back to MATH_ASSIST_PORT)
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the detected serial ports and exit
    #[arg(long)]
    list: bool,
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    mathassist::init_logging(args.debug);

    if args.list {
        for port in available_ports() {
            println!("{}", port);
        }
        return Ok(());
    }

    let config = load_config_or_default(args.config.as_deref())?;
    let port = args.port
        .or(EnvDefaults::from_env().port)
        .ok_or_else(|| anyhow!("No serial port given: pass --port or set MATH_ASSIST_PORT"))?;

    let (tx, rx) = label_channel(config.serial.label_queue_depth, None);
    let handle = spawn_reader(&port, &config.serial, tx)?;
    println!("Connected to sensor on {} at {} baud", port, config.serial.baud_rate);

    while let Some(label) = rx.recv() {
        println!("Mapped Label: {}", label);
    }

    let summary = handle.join()?;
    println!(
        "Stream ended: {} labels, {} malformed records, {} bad judgments",
        summary.delivered, summary.malformed, summary.bad_judgments
    );
    Ok(())
}
