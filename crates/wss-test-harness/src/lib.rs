//! wss-test-harness: Test utilities and mock transports for wsslib.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! protocol client and device controller without a stimulator attached.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
