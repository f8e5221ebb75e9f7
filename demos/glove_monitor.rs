//! Real-time glove monitoring example
//!
//! Run with: cargo run --example glove_monitor
//!
//! Set `RUST_LOG=glove_ble=debug` to follow connection state changes.

use glove_ble::{
    BtleplugTransport, FusionBridge, GloveRegistry, GloveState, Handedness, RegistryConfig, Result,
    UuidCatalog,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    println!("Glove Monitor");
    println!("=============\n");
    println!("Looking for bonded gloves...\n");

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Arc::new(BtleplugTransport::new(tx).await?);

    let registry = Arc::new(GloveRegistry::new(
        transport.clone(),
        UuidCatalog::default(),
        FusionBridge::Unavailable,
        RegistryConfig::default(),
    ));
    registry.start(rx);

    println!("Press Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nExiting...");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                display_gloves(&registry);
            }
        }
    }

    registry.shutdown().await?;
    transport.stop_scanning().await?;

    Ok(())
}

fn display_gloves(registry: &GloveRegistry) {
    // Clear screen and move cursor to top
    print!("\x1B[2J\x1B[1;1H");

    println!("=== Glove Monitor ===\n");

    if registry.count() == 0 {
        println!("No gloves found yet.");
        return;
    }

    for index in 0..registry.count() {
        match registry.get(index) {
            Ok(state) if !state.excluded => display_glove(index, &state),
            _ => {}
        }
    }

    for hand in [Handedness::Left, Handedness::Right] {
        match registry.get_by_hand(hand) {
            Some((index, _)) => println!("{} hand: glove {}", hand, index),
            None => println!("{} hand: --", hand),
        }
    }
}

fn display_glove(index: usize, state: &GloveState) {
    let hand = state
        .handedness()
        .map(|h| h.to_string())
        .unwrap_or_else(|| "?".to_string());

    println!(
        "Glove {} [{}] {} hand, {}",
        index, state.address, hand, state.connection_state
    );

    if !state.is_ready() {
        println!();
        return;
    }

    let euler = state.euler().to_degrees();
    println!(
        "  Roll {:7.1}  Pitch {:7.1}  Yaw {:7.1}  (packet {})",
        euler.x, euler.y, euler.z, state.packet_number
    );

    let linear = state.linear_acceleration();
    println!(
        "  Linear acceleration: {:6.2} {:6.2} {:6.2} g",
        linear.x, linear.y, linear.z
    );

    let fingers: Vec<String> = state
        .fingers
        .iter()
        .map(|f| format!("{:4.0}%", f * 100.0))
        .collect();
    println!("  Fingers (thumb..pinky): {}\n", fingers.join(" "));
}
