//! NetSIO Hub binary entry point.
//!
//! Parses the command line, initializes logging, binds both endpoints,
//! and runs until interrupted. The hub keeps no state across restarts.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use netsio_hub::{HostEndpoint, Hub, HubConfig, PeripheralEndpoint, PeripheralLink};

/// Connects NetSIO (SIO over UDP) peripherals with an Atari emulator's
/// custom-device TCP protocol on localhost.
#[derive(Parser, Debug)]
#[command(name = "netsio-hub", version, about)]
struct Cli {
    /// TCP port used by the emulator's NetSIO custom device
    #[arg(long = "port", default_value_t = netsio_hub::config::DEFAULT_HOST_PORT)]
    port: u16,

    /// UDP port used by NetSIO peripherals
    #[arg(long = "netsio-port", default_value_t = netsio_hub::config::DEFAULT_NETSIO_PORT)]
    netsio_port: u16,

    /// Switch to serial port mode: device to use for peripheral
    /// communication instead of UDP
    #[arg(long)]
    serial: Option<String>,

    /// Print debug output
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    println!("NetSIO HUB {}", env!("CARGO_PKG_VERSION"));

    let config = HubConfig {
        host_port: cli.port,
        netsio_port: cli.netsio_port,
        serial_port: cli.serial,
        debug: cli.debug,
        ..HubConfig::default()
    };

    if let Some(ref device) = config.serial_port {
        // The serial transport ships separately; the hub core only knows
        // the UDP path.
        anyhow::bail!(
            "serial port mode ({device}) is not available in this build; \
             use the UDP NetSIO port instead"
        );
    }

    let periph = PeripheralEndpoint::bind(&config).await?;
    println!("Listening for NetSIO packets on port {}", config.netsio_port);

    let hub = Hub::new(config.clone(), Arc::clone(&periph) as Arc<dyn PeripheralLink>);
    let _periph_tasks = periph.run(Arc::clone(&hub));

    let host = HostEndpoint::bind(&config).await?;
    println!("Listening for the emulator on TCP port {}", config.host_port);
    let _host_task = tokio::spawn(host.run(Arc::clone(&hub)));

    tokio::signal::ctrl_c().await?;
    println!("\nStopped from keyboard");
    Ok(())
}
