//! Keep a session open and print every state change.
//!
//! Run with:
//!   cargo run --example watch_machine -- <name> <token>
//!
//! Press Ctrl+C to stop.

use nespresso_ble::{DeviceConfig, Error, MachineController, Result, SessionConfig, Watchdog};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("nespresso_ble=debug")
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (name, token) = match (args.first(), args.get(1)) {
        (Some(name), Some(token)) => (name.clone(), token.clone()),
        _ => {
            eprintln!("Usage: watch_machine <name> <token>");
            return Err(Error::InvalidConfig {
                field: "name",
                reason: "missing arguments".to_string(),
            });
        }
    };

    let device = DeviceConfig::new(name).with_token(token);
    let (model, serial) = device.model_and_serial()?;
    let max_capsules = device.validate()?.max_capsule_count;
    println!("Watching {} (serial {})", model, serial);

    let config = SessionConfig::default();
    let machine = MachineController::with_platform(&device, config.clone()).await?;

    let _status = machine.events().on_status(|status| {
        println!("Status: {}", status);
        for error in status.error_messages() {
            println!("  ! {}", error);
        }
    });
    let _slider = machine.events().on_slider(|slider| {
        println!("Slider: {}", slider);
    });
    let _capsules = machine.events().on_capsules(move |count| {
        println!(
            "Capsules: {} ({}% of stock{})",
            count,
            count.level_percent(max_capsules),
            if count.is_low(max_capsules) { ", low" } else { "" }
        );
    });

    if let Err(e) = machine.connect().await {
        println!("Initial connect failed: {}", e);
    }

    let watchdog = Watchdog::spawn(machine.clone(), config.watchdog_period);

    tokio::signal::ctrl_c().await.ok();

    println!("\nStopping...");
    drop(watchdog);
    machine.shutdown().await;
    Ok(())
}
