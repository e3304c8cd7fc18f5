use std::sync::Arc;

use bluez_proxies::{
    thermometer::Thermometer1, Address, BusAddress, ChangeEvent, DbusTransport,
};
use color_eyre::{eyre::WrapErr as _, Result};
use tracing::{info, warn};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Bluetooth address of the thermometer, e.g. 00:11:22:33:44:55.
    address: Address,
    /// Adapter the device is connected through.
    #[arg(long, env = "BLUEZ_ADAPTER", default_value = "hci0")]
    adapter_id: String,
    /// `system`, `session` or a D-Bus address.
    #[arg(long, env = "BLUEZ_BUS_ADDRESS", default_value = "system")]
    bus: BusAddress,
}

pub async fn run(args: Args) -> Result<()> {
    let transport = DbusTransport::connect(&args.bus)
        .await
        .wrap_err_with(|| format!("failed to connect to the {:?} bus", args.bus))?;
    let thermometer = Thermometer1::new(Arc::new(transport), &args.adapter_id, &args.address)
        .await
        .wrap_err_with(|| format!("failed to load thermometer {}", args.address))?;

    let props = thermometer.properties()?;
    info!(
        handle = %thermometer.handle(),
        intermediate = props.intermediate,
        interval = props.interval,
        maximum = props.maximum,
        minimum = props.minimum,
        "thermometer properties"
    );

    let mut events = thermometer.watch_properties().await?;
    info!("watching for changes, press Ctrl-C to stop");
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.wrap_err("failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    warn!("watcher stopped");
                    break;
                };
                print_event(&event);
            }
        }
    }

    thermometer.close().await;

    Ok(())
}

fn print_event(event: &ChangeEvent) {
    match event.name.as_str() {
        "Intermediate" => match event.value_as::<bool>() {
            Ok(value) => info!("Intermediate changed to {value}"),
            Err(e) => warn!("{e}"),
        },
        name => match event.value_as::<u16>() {
            Ok(value) => info!("{name} changed to {value}"),
            Err(e) => warn!("{e}"),
        },
    }
}
