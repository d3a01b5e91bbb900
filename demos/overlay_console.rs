//! Console stand-in for the overlay: prints gear, grade and status
//!
//! Run with: cargo run --example overlay_console
//! or, with a config file: cargo run --features serde --example overlay_console -- kickr.json

use kickr_gears::{Result, TelemetryConfig, TelemetryEngine, TelemetryUpdate};
use std::io::Write;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let config = load_config()?;

    println!("KICKR Gears");
    println!("===========\n");
    println!("Press Ctrl+C to exit.\n");

    let engine = TelemetryEngine::start(config).await?;
    let mut updates = engine.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nExiting...");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let update = updates.borrow_and_update().clone();
                render(&update);
            }
        }
    }

    engine.shutdown().await?;
    Ok(())
}

fn render(update: &TelemetryUpdate) {
    let gear = update
        .gear()
        .map(|g| g.to_string())
        .unwrap_or_else(|| "--".to_string());
    let grade = update
        .grade()
        .map(|g| g.to_string())
        .unwrap_or_else(|| "--".to_string());
    let locked = match update.sample.as_ref().and_then(|s| s.locked) {
        Some(true) => " [locked]",
        _ => "",
    };

    print!(
        "\r\x1B[2KGear {:>7}  Grade {:>7}{}  {}",
        gear,
        grade,
        locked,
        update.status_text()
    );
    let _ = std::io::stdout().flush();
}

#[cfg(feature = "serde")]
fn load_config() -> Result<TelemetryConfig> {
    match std::env::args().nth(1) {
        Some(path) => TelemetryConfig::load(path),
        None => Ok(TelemetryConfig::default()),
    }
}

#[cfg(not(feature = "serde"))]
fn load_config() -> Result<TelemetryConfig> {
    Ok(TelemetryConfig::default())
}
