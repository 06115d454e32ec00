//! wss-core: Core traits, types, and error definitions for wsslib.
//!
//! This crate defines the abstractions shared by the protocol client and the
//! device controller. Applications can depend on these types without pulling
//! in a serial port implementation.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`Target`] / [`CommandId`] -- bus addresses and opcodes
//! - [`ControllerState`] / [`ControllerEvent`] -- controller lifecycle
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{DeviceError, Error, Result};
pub use events::ControllerEvent;
pub use transport::Transport;
pub use types::*;
