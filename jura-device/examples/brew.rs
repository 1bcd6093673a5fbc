//! Command-line tool for Jura machines.
//!
//! Scans for nearby machines, lists the products a machine offers and
//! brews one, optionally overriding strength or water amount.

use clap::{Parser, Subcommand};
use std::time::Duration;

use jura_ble::{BleLink, COMMAND_WINDOW, find_machine, scan};
use jura_catalog::AttrKey;
use jura_device::{Attribute, Device};

#[derive(Parser)]
#[command(name = "brew")]
#[command(about = "Control Jura coffee machines over BLE")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for Jura machines
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// List the products of a machine
    Products {
        /// Machine name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Brew a product
    Brew {
        /// Machine name or address to connect to
        #[arg(short, long)]
        device: Option<String>,
        /// Product name, e.g. "Espresso"
        product: String,
        /// Coffee strength option, e.g. "6" or "Strong"
        #[arg(short, long)]
        strength: Option<String>,
        /// Water amount in ml
        #[arg(short, long)]
        water: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { duration } => {
            for machine in scan(duration).await? {
                let model = machine
                    .model_code
                    .and_then(|code| jura_catalog::machine(code).ok())
                    .map(|m| m.model)
                    .unwrap_or_else(|| "unknown model".to_string());
                println!(
                    "{} ({}) {} rssi={:?}",
                    machine.name, machine.address, model, machine.rssi
                );
            }
        }
        Commands::Products { device } => {
            let device = connect(device.as_deref()).await?;
            println!("{}", device.model());
            if let Some(Attribute::Options { options, .. }) = device.attribute(AttrKey::Product) {
                for name in options {
                    println!("  {name}");
                }
            }
        }
        Commands::Brew { device, product, strength, water } => {
            let device = connect(device.as_deref()).await?;
            device.select_product(&product)?;
            if let Some(strength) = strength {
                device.select_option(AttrKey::CoffeeStrength, &strength)?;
            }
            if let Some(water) = water {
                device.set_value(AttrKey::WaterAmount, water);
            }
            device.brew()?;
            println!("brewing {product} on {}", device.model());

            // give the session a chance to deliver before winding down
            tokio::time::sleep(COMMAND_WINDOW + Duration::from_secs(1)).await;
            device.ping_cancel();
        }
    }

    Ok(())
}

async fn connect(target: Option<&str>) -> Result<Device, Box<dyn std::error::Error>> {
    let (peripheral, manufacturer_data) = find_machine(target).await?;
    let device = Device::new("Jura", BleLink::new(peripheral), &manufacturer_data)?;
    Ok(device)
}
