//! # wss -- Host-side control of wearable stimulation units
//!
//! `wss` is an asynchronous Rust library for driving WSS stimulation units
//! through their USB radio dongle. It configures the units, starts
//! stimulation, and then streams per-channel amplitude, pulse width and
//! inter-pulse interval at a fixed cadence.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use wss::ControllerState;
//! use wss::device::ControllerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let controller = ControllerBuilder::new()
//!         .serial_port("/dev/ttyUSB0")
//!         .unit_count(1)
//!         .build()?;
//!
//!     controller.initialize().await?;
//!     controller
//!         .wait_for_state(ControllerState::Streaming, Duration::from_secs(5))
//!         .await?;
//!
//!     controller.set_stimulation(1, 1.5, 200, 25)?;
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//!
//!     controller.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate              | Purpose                                           |
//! |--------------------|---------------------------------------------------|
//! | `wss-core`         | Errors, [`Transport`] trait, addresses, opcodes, states, events |
//! | `wss-transport`    | Serial transport for the USB dongle               |
//! | `wss-protocol`     | Frame codec, command builders, protocol client    |
//! | `wss-device`       | Device controller: setup queue and streaming loop |
//! | **`wss`**          | This facade crate -- re-exports everything        |
//!
//! ## Feature Flags
//!
//! | Feature  | Enables                                                      | Default |
//! |----------|--------------------------------------------------------------|---------|
//! | `serial` | [`transport`] module and `ControllerBuilder::build` (`tokio-serial`) | yes |
//!
//! Without `serial`, controllers are built over any [`Transport`] with
//! `ControllerBuilder::build_with_transport`.
//!
//! ## Events
//!
//! The controller reports state changes and setup progress through a
//! broadcast channel:
//!
//! ```no_run
//! use wss::ControllerEvent;
//! # async fn example(controller: &wss::device::DeviceController) {
//! let mut events = controller.subscribe();
//! while let Ok(event) = events.recv().await {
//!     if let ControllerEvent::StateChanged { from, to } = event {
//!         println!("{from} -> {to}");
//!     }
//! }
//! # }
//! ```

pub use wss_core::*;

/// Wire protocol: frame codec, command builders and [`ProtocolClient`].
///
/// [`ProtocolClient`]: protocol::ProtocolClient
pub mod protocol {
    pub use wss_protocol::*;
}

/// Device controller and its builder.
pub mod device {
    pub use wss_device::*;
}

/// Serial transport for the WSS USB dongle.
#[cfg(feature = "serial")]
pub mod transport {
    pub use wss_transport::*;
}
