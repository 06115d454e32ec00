//! Transport implementations for wsslib.
//!
//! This crate provides [`SerialTransport`], the concrete
//! [`Transport`](wss_core::Transport) for the USB serial dongle that bridges
//! the host to the WSS wireless bus.

pub mod serial;

pub use serial::{
    DEFAULT_BAUD_RATE, DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits,
};
