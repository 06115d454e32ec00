//! Mock transport for deterministic testing of the protocol stack.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs, an optional responder closure, and a
//! [`MockHandle`] that stays with the test after the transport itself has
//! been moved into a client. The handle can inspect everything that was
//! sent and inject bytes as if the device had produced them.
//!
//! # Example
//!
//! ```
//! use wss_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! // Pre-load: when the client sends this request, return this response.
//! mock.expect(&[0xC0, 0x00, 0x81, 0x40, 0x01, 0x00, 0x3D, 0xC0],
//!             &[0xC0, 0x81, 0x00, 0x40, 0x01, 0x00, 0x3D, 0xC0]);
//! let handle = mock.handle();
//! assert_eq!(handle.remaining_expectations(), 1);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use wss_core::error::{Error, Result};
use wss_core::transport::Transport;

/// Closure deciding the device's answer to a sent byte string.
///
/// Returning `None` keeps the device silent for that send.
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes made available to `receive()` when the request matches.
    response: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Fallback used once `expectations` is empty.
    responder: Option<Responder>,
    /// Bytes waiting to be returned by `receive()`.
    rx: VecDeque<u8>,
    /// Whether the transport is "connected".
    connected: bool,
    /// When set, `connect()` fails with a transport error.
    fail_connect: bool,
    /// Log of all bytes sent through this transport.
    sent_log: Vec<Vec<u8>>,
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<MockState>>,
    rx_ready: Arc<Notify>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_rx(&self, data: &[u8]) {
        self.lock().rx.extend(data.iter().copied());
        self.rx_ready.notify_one();
    }
}

/// A mock [`Transport`] for testing without hardware.
///
/// On `send()`, the sent data is recorded and matched against the next
/// expectation; a mismatch is a [`Error::Protocol`]. Once the expectation
/// queue is empty the responder closure (if any) decides the answer, and
/// with neither present the send succeeds silently.
///
/// `receive()` waits up to its timeout for bytes queued by an expectation,
/// the responder, or [`MockHandle::inject`].
pub struct MockTransport {
    shared: Shared,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        let state = MockState {
            connected: true,
            ..MockState::default()
        };
        MockTransport {
            shared: Shared {
                state: Arc::new(Mutex::new(state)),
                rx_ready: Arc::new(Notify::new()),
            },
        }
    }

    /// Add an expected request/response pair.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.shared.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Install a responder consulted for every send once the expectation
    /// queue is exhausted.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.shared.lock().responder = Some(Box::new(responder));
    }

    /// Make subsequent `connect()` calls fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.lock().fail_connect = fail;
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().connected = connected;
        self.shared.rx_ready.notify_one();
    }

    /// Return a handle that observes and drives this transport after it has
    /// been boxed and handed to a client.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: self.shared.clone(),
        }
    }

    /// Queue bytes for `receive()` as if the device had sent them.
    pub fn inject(&self, data: &[u8]) {
        self.shared.push_rx(data);
    }

    /// Return a copy of all data that has been sent through this transport.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.shared.lock().expectations.len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Test-side view of a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    shared: Shared,
}

impl MockHandle {
    /// Queue bytes for `receive()` as if the device had sent them.
    pub fn inject(&self, data: &[u8]) {
        self.shared.push_rx(data);
    }

    /// Return a copy of all data that has been sent, one entry per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent_log.clone()
    }

    /// Number of `send()` calls recorded so far.
    pub fn sent_count(&self) -> usize {
        self.shared.lock().sent_log.len()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.shared.lock().expectations.len()
    }

    /// Set the connected state; see [`MockTransport::set_connected`].
    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().connected = connected;
        self.shared.rx_ready.notify_one();
    }

    /// Whether the transport currently reports itself connected.
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.fail_connect {
            return Err(Error::Transport("mock connect failure".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut responder = {
            let mut state = self.shared.lock();
            if !state.connected {
                return Err(Error::NotConnected);
            }

            state.sent_log.push(data.to_vec());

            if let Some(expectation) = state.expectations.pop_front() {
                if data != expectation.request.as_slice() {
                    return Err(Error::Protocol(format!(
                        "unexpected send data: expected {:02X?}, got {:02X?}",
                        expectation.request, data
                    )));
                }
                drop(state);
                self.shared.push_rx(&expectation.response);
                return Ok(());
            }

            match state.responder.take() {
                Some(r) => r,
                None => return Ok(()),
            }
        };

        // Run the responder outside the lock so it may inspect the handle.
        let reply = responder(data);
        self.shared.lock().responder.get_or_insert(responder);
        if let Some(reply) = reply {
            self.shared.push_rx(&reply);
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.shared.lock();
                if !state.connected {
                    return Err(Error::NotConnected);
                }
                if !state.rx.is_empty() {
                    let n = state.rx.len().min(buf.len());
                    for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }

            // notify_one() stores a permit, so an inject between the check
            // above and this await is not lost.
            if tokio::time::timeout_at(deadline, self.shared.rx_ready.notified())
                .await
                .is_err()
            {
                return Err(Error::Timeout);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        state.connected = false;
        state.rx.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}
