use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use racecapture_bridge::gps::{serial::DEFAULT_BAUD_RATE, NmeaSerialProvider};
use racecapture_bridge::{
    BluetoothConfig, BluetoothMode, ConnectionConfig, ConnectionManager, GpsConfig, GpsConnection,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "racecapture-bridge", version, about = "Bluetooth serial bridge for RaceCapture devices")]
struct Cli {
    /// Connect over an unauthenticated RFCOMM channel instead of the secure service
    #[arg(long, global = true)]
    insecure: bool,

    /// Simulate a paired device over TCP, as NAME=HOST:PORT (repeatable)
    #[arg(long = "sim-device", value_name = "NAME=ADDR", global = true, value_parser = parse_sim_device)]
    sim_devices: Vec<(String, String)>,

    /// Connection timeout in milliseconds
    #[arg(long, global = true, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List paired devices
    Devices,
    /// Open a line terminal to a device
    Terminal {
        /// Device name as paired
        name: String,
    },
    /// Print fixes from an NMEA receiver
    Gps {
        /// Serial port of the receiver
        #[arg(long)]
        port: String,
        #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
        baud: u32,
    },
}

fn parse_sim_device(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((name, addr)) if !name.is_empty() && !addr.is_empty() => {
            Ok((name.to_string(), addr.to_string()))
        }
        _ => Err(format!("expected NAME=ADDR, got {:?}", arg)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Gps { ref port, baud } => run_gps(port, baud).await,
        Command::Devices => {
            let manager = build_manager(&cli);
            let names = manager.list_known_device_names().await;
            if names.is_empty() {
                warn!("No paired devices found");
            }
            for name in names {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Terminal { ref name } => {
            let manager = build_manager(&cli);
            run_terminal(&manager, name).await
        }
    }
}

fn build_manager(cli: &Cli) -> ConnectionManager {
    let bluetooth = BluetoothConfig {
        mode: if cli.sim_devices.is_empty() {
            BluetoothMode::Rfcomm
        } else {
            BluetoothMode::TcpSimulation
        },
        simulated_devices: cli.sim_devices.clone(),
    };
    let (directory, channels) = bluetooth.collaborators();
    info!("Bluetooth backend: {}", channels.name());

    let config = ConnectionConfig {
        connect_timeout: Duration::from_millis(cli.timeout_ms),
        allow_insecure_connections: cli.insecure,
        ..Default::default()
    };
    ConnectionManager::new(config, directory, channels)
}

async fn run_terminal(manager: &ConnectionManager, name: &str) -> Result<()> {
    manager.open(name).await?;
    info!("Connected to {} (Ctrl-C to quit)", name);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = manager.read_line() => match line {
                Some(line) => println!("{}", line),
                None => {
                    warn!("Device closed the connection");
                    break;
                }
            },
            input = stdin.next_line() => match input.context("failed to read stdin")? {
                Some(input) => {
                    if !manager.write(&format!("{}\r\n", input)).await {
                        error!("Write failed, link closed");
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    manager.close().await;
    Ok(())
}

async fn run_gps(port: &str, baud: u32) -> Result<()> {
    let gps = GpsConnection::new(GpsConfig::default());
    gps.configure(Arc::new(NmeaSerialProvider::new(port, baud))).await;
    gps.start().await?;

    let mut ticker = tokio::time::interval(GpsConfig::default().update_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !gps.is_running().await {
                    bail!("GPS receiver on {} stopped", port);
                }
                match gps.current_location().await {
                    Some(fix) => println!(
                        "{:.6},{:.6} alt={:?} speed={:?} sats={:?} status={:?}",
                        fix.latitude,
                        fix.longitude,
                        fix.altitude_m,
                        fix.speed_mps,
                        fix.satellites,
                        gps.current_status().await
                    ),
                    None => info!("Waiting for fix ({:?})", gps.current_status().await),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    gps.stop().await;
    Ok(())
}
