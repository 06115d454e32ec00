//! IO task for the WSS protocol client.
//!
//! A single task owns the transport. Callers hand it encoded frames over a
//! command channel; in between, the task reads whatever the device sends,
//! feeds it through a [`FrameDecoder`] and dispatches every decoded frame
//! to the pending-request table.
//!
//! Reply correlation lives in [`PendingTable`], not here: the task never
//! waits for a specific reply, so fire-and-forget streaming frames and
//! request/response frames share the link without blocking each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use wss_core::error::{Error, Result};
use wss_core::transport::Transport;
use wss_core::types::{CommandId, HOST_ADDR, Target, command_name};

use crate::commands::parse_switch_reply;
use crate::device_error::{ErrorEnvelope, parse_error_frame};
use crate::frame::{Frame, FrameDecoder};
use crate::pending::PendingTable;

/// Command channel depth. Streaming sends are small and frequent.
const CMD_CHANNEL_CAPACITY: usize = 64;

/// Size of a single transport read.
const READ_CHUNK: usize = 256;

/// A request sent from client methods to the IO task.
pub(crate) enum Request {
    /// Write an encoded frame to the transport.
    Send {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// State shared between the client and its IO task.
#[derive(Clone)]
pub(crate) struct IoShared {
    pub pending: Arc<PendingTable>,
    /// Last stimulation state the device reported.
    pub started: Arc<AtomicBool>,
    /// Cleared when the IO task exits for any reason.
    pub link_up: Arc<AtomicBool>,
}

/// Handle to a running IO task.
pub(crate) struct ClientIo {
    pub cmd_tx: mpsc::Sender<Request>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Box<dyn Transport>>,
}

impl ClientIo {
    /// Stop the IO task and recover the transport.
    pub async fn shutdown(self) -> Result<Box<dyn Transport>> {
        self.cancel.cancel();
        self.task.await.map_err(|e| {
            warn!(error = %e, "IO task did not exit cleanly");
            Error::ConnectionLost
        })
    }
}

/// Write `bytes` through the IO task and wait for the write to finish.
pub(crate) async fn send_frame(cmd_tx: &mpsc::Sender<Request>, bytes: Vec<u8>) -> Result<()> {
    let (reply_tx, reply_rx) = oneshot::channel();
    cmd_tx
        .send(Request::Send {
            bytes,
            reply: reply_tx,
        })
        .await
        .map_err(|_| Error::NotConnected)?;
    reply_rx.await.map_err(|_| Error::ConnectionLost)?
}

/// Spawn the IO task. The task owns `transport` until it exits.
pub(crate) fn spawn_io_task(
    transport: Box<dyn Transport>,
    shared: IoShared,
    poll_interval: Duration,
) -> ClientIo {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(CMD_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    shared.link_up.store(true, Ordering::SeqCst);
    let task = tokio::spawn(io_loop(
        transport,
        shared,
        cmd_rx,
        cancel.clone(),
        poll_interval,
    ));

    ClientIo {
        cmd_tx,
        cancel,
        task,
    }
}

/// The main IO loop.
///
/// Uses `tokio::select! { biased; }` to prioritize:
/// 1. Cancellation
/// 2. Outgoing frames
/// 3. Reading and dispatching inbound frames
async fn io_loop(
    mut transport: Box<dyn Transport>,
    shared: IoShared,
    mut cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
    poll_interval: Duration,
) -> Box<dyn Transport> {
    debug!("IO task started");
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break;
            }

            req = cmd_rx.recv() => {
                match req {
                    Some(Request::Send { bytes, reply }) => {
                        trace!(len = bytes.len(), data = ?bytes, "sending frame");
                        let result = transport.send(&bytes).await;
                        let fatal = result.is_err();
                        let _ = reply.send(result);
                        if fatal {
                            warn!("transport send failed, stopping IO task");
                            break;
                        }
                    }
                    None => {
                        debug!("all command senders dropped, exiting IO task");
                        break;
                    }
                }
            }

            read = transport.receive(&mut buf, poll_interval) => {
                match read {
                    Ok(n) => {
                        for frame in decoder.decode(&buf[..n]) {
                            dispatch_frame(frame, &shared);
                        }
                    }
                    Err(Error::Timeout) => {}
                    Err(e) => {
                        warn!(error = %e, "transport receive failed, stopping IO task");
                        break;
                    }
                }
            }
        }
    }

    shared.link_up.store(false, Ordering::SeqCst);
    shared.pending.fail_all(|| Error::ConnectionLost);
    debug!("IO task stopped");
    transport
}

/// Route one decoded frame to the waiter it answers.
pub(crate) fn dispatch_frame(frame: Frame, shared: &IoShared) {
    let sender = frame.sender();
    trace!(
        sender,
        data = ?frame.payload(),
        "received frame"
    );

    if sender == HOST_ADDR {
        trace!("ignoring our own frame echoed by the bridge");
        return;
    }

    match parse_error_frame(&frame) {
        ErrorEnvelope::Error(err) => {
            debug!(sender, error = %err, "device error reply");
            let cmd = err.command;
            deliver(shared, sender, cmd, Err(Error::Device(err)));
        }
        ErrorEnvelope::Truncated => {
            warn!(
                sender,
                data = ?frame.payload(),
                "truncated device error reply, dropping"
            );
        }
        ErrorEnvelope::NotError => {
            let Some(cmd) = frame.command() else {
                trace!("frame without payload, dropping");
                return;
            };
            if cmd == CommandId::StimulationSwitch.as_byte() {
                if let Ok(on) = parse_switch_reply(frame.data()) {
                    shared.started.store(on, Ordering::SeqCst);
                }
            }
            deliver(shared, sender, cmd, Ok(frame));
        }
    }
}

/// Complete the waiter for `(sender, cmd)`, falling back to a broadcast
/// request for the same command.
fn deliver(shared: &IoShared, sender: u8, cmd: u8, result: Result<Frame>) {
    let Some(result) = shared.pending.complete((sender, cmd), result) else {
        return;
    };
    let broadcast = Target::Broadcast.as_byte();
    if sender != broadcast && shared.pending.complete((broadcast, cmd), result).is_none() {
        return;
    }
    trace!(
        sender,
        cmd = %command_name(cmd),
        "unpaired reply"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use wss_core::DeviceError;

    fn shared() -> IoShared {
        IoShared {
            pending: Arc::new(PendingTable::new()),
            started: Arc::new(AtomicBool::new(false)),
            link_up: Arc::new(AtomicBool::new(true)),
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_sender_and_command() {
        let s = shared();
        let (_, rx) = s.pending.register((0x81, 0x4A));
        dispatch_frame(Frame::new(0x81, 0x00, &[0x4A, 0x00]), &s);
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn dispatch_routes_device_error_to_offending_command() {
        let s = shared();
        let (_, rx) = s.pending.register((0x82, 0x44));
        dispatch_frame(Frame::new(0x82, 0x00, &[0x05, 0x02, 0x19, 0x44]), &s);
        match rx.await.unwrap() {
            Err(Error::Device(DeviceError { code, command, .. })) => {
                assert_eq!(code, 0x19);
                assert_eq!(command, 0x44);
            }
            other => panic!("expected device error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_falls_back_to_broadcast_waiter() {
        let s = shared();
        let (_, rx) = s.pending.register((0x8F, 0x07));
        dispatch_frame(Frame::new(0x83, 0x00, &[0x07, 0x02, 0x01, 0x02]), &s);
        let frame = rx.await.unwrap().unwrap();
        assert_eq!(frame.sender(), 0x83);
    }

    #[test]
    fn dispatch_switch_reply_sets_started() {
        let s = shared();
        dispatch_frame(Frame::new(0x81, 0x00, &[0x0B, 0x01, 0x01]), &s);
        assert!(s.started.load(Ordering::SeqCst));
        dispatch_frame(Frame::new(0x81, 0x00, &[0x0B, 0x01, 0x00]), &s);
        assert!(!s.started.load(Ordering::SeqCst));
    }

    #[test]
    fn dispatch_ignores_host_echo_and_truncated_errors() {
        let s = shared();
        let (_, _rx) = s.pending.register((0x81, 0x05));
        dispatch_frame(Frame::new(0x00, 0x81, &[0x44, 0x00]), &s);
        dispatch_frame(Frame::new(0x81, 0x00, &[0x05, 0x01, 0x19]), &s);
        assert_eq!(s.pending.len(), 1);
    }
}
