//! Stream a slow amplitude ramp to one WSS unit.
//!
//! Initializes the unit, waits for streaming, ramps channel 1 from 0 to
//! 2 mA and back while printing controller events, then shuts down.
//!
//! # Requirements
//!
//! - A WSS dongle and one powered unit (address 1)
//! - Electrodes on a test load, not on a person
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=wss_device=debug cargo run -p wss --example stream_demo -- /dev/ttyUSB0
//! ```

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wss::device::ControllerBuilder;
use wss::{ControllerEvent, ControllerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let serial_port = std::env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    println!("Connecting to WSS dongle on {}...", serial_port);

    let controller = ControllerBuilder::new()
        .serial_port(&serial_port)
        .unit_count(1)
        .build()?;

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ControllerEvent::StateChanged { from, to } => println!("state: {} -> {}", from, to),
                ControllerEvent::SetupFailed { target, label, reason } => {
                    println!("setup failed on {}: {} ({})", target, label, reason)
                }
                ControllerEvent::SetupStepCompleted { .. } => {}
                other => println!("{:?}", other),
            }
        }
    });

    controller.initialize().await?;
    controller
        .wait_for_state(ControllerState::Streaming, Duration::from_secs(10))
        .await?;
    println!("Streaming. Ramping channel 1...");

    let steps: Vec<f32> = (0..=20).chain((0..20).rev()).map(|i| i as f32 * 0.1).collect();
    for ma in steps {
        controller.set_stimulation(1, ma, 200, 25)?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    controller.shutdown().await?;
    println!("Done.");
    Ok(())
}
