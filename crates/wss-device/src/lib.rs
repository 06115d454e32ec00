//! Device controller for WSS stimulation units.
//!
//! This crate drives one or more units behind a single link on top of
//! [`wss_protocol`]:
//!
//! - **DeviceController** ([`controller`]) -- lifecycle state machine,
//!   configuration edits and the hand-off between setup and streaming.
//! - **Setup queue** ([`setup`]) -- per-unit ordered configuration steps
//!   and the default setup sequence.
//! - **Streaming loop** -- periodic fire-and-forget drive updates, sending
//!   inter-pulse intervals only when they change.
//! - **Channels** ([`channels`]) -- cached per-channel drive values.
//! - **Amplitude mapping** ([`amplitude`]) -- milliamps to device units.
//! - **ControllerBuilder** ([`builder`]) -- fluent configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use wss_core::ControllerState;
//! use wss_device::ControllerBuilder;
//!
//! # async fn example() -> wss_core::Result<()> {
//! let controller = ControllerBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .build()?;
//!
//! controller.initialize().await?;
//! controller
//!     .wait_for_state(ControllerState::Streaming, Duration::from_secs(5))
//!     .await?;
//!
//! // 2 mA, 200 us, every 25 ms on channel 1.
//! controller.set_stimulation(1, 2.0, 200, 25)?;
//!
//! controller.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod amplitude;
pub mod builder;
pub mod channels;
pub mod controller;
pub mod setup;
pub(crate) mod stream;

pub use builder::{ControllerBuilder, StimDefaults};
pub use channels::ChannelState;
pub use controller::DeviceController;
pub use setup::{SetupProgress, SetupStep};
