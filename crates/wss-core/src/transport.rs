//! Transport trait for stimulator communication.
//!
//! The [`Transport`] trait abstracts over the physical link to a WSS unit
//! (in practice a USB serial dongle bridging to the wireless bus). The
//! protocol engine in `wss-protocol` operates on a `Transport` rather than
//! directly on a serial port, so the same client runs against real hardware
//! and against `MockTransport` from `wss-test-harness`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a stimulator.
///
/// Implementations move raw bytes only. Framing, checksums and reply
/// correlation are handled by the protocol layer that consumes this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open (or reopen) the underlying link.
    ///
    /// Calling `connect()` on an already connected transport is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// Send raw bytes to the device.
    ///
    /// Implementations should block until all bytes have been written to
    /// the underlying transport.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Will wait up to `timeout`
    /// for data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if no data is received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
