//! Brew one beverage and print the machine's answer.
//!
//! Run with:
//!   cargo run --example brew -- <name> <token> [beverage] [temperature]
//!
//! For example:
//!   cargo run --example brew -- Expert_DB1234 0a1b2c3d-4e5f6a7b Lungo High

use nespresso_ble::{
    BrewOutcome, CoffeeType, DeviceConfig, Error, MachineController, Result, SessionConfig,
    TemperatureType,
};

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
            eprintln!("Usage: brew <name> <token> [beverage] [temperature]");
            return Err(Error::InvalidConfig {
                field: "name",
                reason: "missing arguments".to_string(),
            });
        }
    };
    let coffee: CoffeeType = args.get(2).map(String::as_str).unwrap_or("Lungo").parse()?;

    let mut device = DeviceConfig::new(name).with_token(token);
    device.temperature = args
        .get(3)
        .map(|value| TemperatureType::from_config(value))
        .unwrap_or_default();

    let machine = MachineController::with_platform(&device, SessionConfig::default()).await?;

    println!("Connecting to {}...", machine.identity().name);
    machine.connect().await?;

    if let Some(status) = machine.last_status() {
        println!("Status: {}", status);
    }
    if let Some(count) = machine.last_capsule_count() {
        println!("Capsules: {}", count);
    }

    println!("Brewing {} at {} temperature...", coffee, device.temperature);
    match machine.brew_configured(coffee).await? {
        BrewOutcome::NotAttempted => println!("Machine is not ready to brew"),
        BrewOutcome::Completed(status) if status.is_success() => println!("Brewing!"),
        BrewOutcome::Completed(status) => println!("Machine refused: {}", status),
    }

    machine.shutdown().await;
    Ok(())
}
