//! Basic example: List nearby BLE devices and show which look like a KICKR
//!
//! Run with: cargo run --example scan_trainers

use kickr_gears::ble::{BleLocator, RadioAdapter};
use kickr_gears::{Result, TrainerProfile};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kickr_gears=debug".parse().unwrap()),
        )
        .init();

    println!("Scanning for trainers...");
    println!("Make sure the bike is powered on and not connected to another app!\n");

    let adapter = RadioAdapter::init().await?;
    let profile = TrainerProfile::kickr_bike();
    let locator = BleLocator::new(adapter.clone(), &profile);

    let found = locator.survey(Duration::from_secs(10)).await?;

    if found.is_empty() {
        println!("No devices advertised.");
    }

    for advertisement in &found {
        let verdict = match locator.filter().check(advertisement) {
            Some(reason) => format!("MATCH ({:?})", reason),
            None => "-".to_string(),
        };
        println!(
            "{:<28} {:>5} dBm  {:<14} {}",
            advertisement.display_name(),
            advertisement
                .rssi
                .map(|r| r.to_string())
                .unwrap_or_else(|| "?".to_string()),
            verdict,
            advertisement.identifier
        );
        for service in &advertisement.services {
            println!("    service {}", service);
        }
    }

    adapter.shutdown().await?;
    Ok(())
}
