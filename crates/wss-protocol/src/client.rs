//! Request/response client for WSS stimulators.
//!
//! [`ProtocolClient`] turns [`Command`]s into frames, sends them through the
//! IO task and correlates replies by `(target, command)`. Two call shapes
//! are offered:
//!
//! - [`ProtocolClient::request`] waits for exactly one reply (or a device
//!   error, timeout or cancellation).
//! - [`ProtocolClient::send_no_reply`] writes the frame and returns; used by
//!   the high-rate streaming path.
//!
//! # Example
//!
//! ```no_run
//! use wss_core::Target;
//! use wss_protocol::{ClientOptions, ProtocolClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(transport: Box<dyn wss_core::Transport>) -> wss_core::Result<()> {
//! let client = ProtocolClient::new(transport, ClientOptions::default());
//! client.connect().await?;
//! let reply = client.echo(Target::Unit1, 0x12, 0x34, &CancellationToken::new()).await?;
//! assert_eq!(reply.data(), &[0x12, 0x34]);
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use wss_core::error::{Error, Result};
use wss_core::transport::Transport;
use wss_core::types::{HOST_ADDR, Target};

use crate::commands::{
    self, BoardCommand, ChannelDrive, Command, ConfigBlock, ContactConfig, EventConfig, EventEdit,
    GroupState, StreamVariant,
};
use crate::frame::{self, Frame};
use crate::io::{self, ClientIo, IoShared, Request};
use crate::pending::PendingTable;

/// Default command timeout (2 seconds).
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default transport read timeout inside the IO task.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Options for configuring a [`ProtocolClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long a request waits for its reply.
    pub command_timeout: Duration,
    /// Read timeout the IO task uses while idle.
    pub poll_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Where the transport currently lives.
enum Link {
    /// Not connected; the client holds the transport.
    Idle(Box<dyn Transport>),
    /// Connected; the IO task holds the transport.
    Running(ClientIo),
}

/// Protocol client for one WSS link.
///
/// All methods take `&self`; the client is meant to be shared behind an
/// `Arc` between the setup worker and the streaming loop.
pub struct ProtocolClient {
    /// `None` only if the IO task panicked and took the transport with it.
    link: Mutex<Option<Link>>,
    shared: IoShared,
    options: ClientOptions,
}

impl ProtocolClient {
    /// Create a client over `transport`. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn new(transport: Box<dyn Transport>, options: ClientOptions) -> Self {
        ProtocolClient {
            link: Mutex::new(Some(Link::Idle(transport))),
            shared: IoShared {
                pending: Arc::new(PendingTable::new()),
                started: Arc::new(AtomicBool::new(false)),
                link_up: Arc::new(AtomicBool::new(false)),
            },
            options,
        }
    }

    /// Open the transport and start the IO task.
    ///
    /// Connecting an already connected client is a no-op. A client whose
    /// IO task stopped after a transport fault reconnects.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;

        let mut transport = match link.take() {
            Some(Link::Running(io)) if self.shared.link_up.load(Ordering::SeqCst) => {
                *link = Some(Link::Running(io));
                return Ok(());
            }
            Some(Link::Running(io)) => {
                tracing::debug!("recovering transport from stopped IO task");
                io.shutdown().await?
            }
            Some(Link::Idle(t)) => t,
            None => return Err(Error::NotConnected),
        };

        if let Err(e) = transport.connect().await {
            tracing::error!(error = %e, "transport connect failed");
            *link = Some(Link::Idle(transport));
            return Err(e);
        }

        self.shared.started.store(false, Ordering::SeqCst);
        let io = io::spawn_io_task(transport, self.shared.clone(), self.options.poll_interval);
        *link = Some(Link::Running(io));
        tracing::info!("protocol client connected");
        Ok(())
    }

    /// Stop the IO task and close the transport.
    ///
    /// Outstanding requests fail with [`Error::ConnectionLost`]. Calling
    /// `disconnect()` on a disconnected client is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        let mut link = self.link.lock().await;

        let mut transport = match link.take() {
            Some(Link::Running(io)) => match io.shutdown().await {
                Ok(t) => t,
                Err(e) => {
                    self.shared.pending.fail_all(|| Error::ConnectionLost);
                    return Err(e);
                }
            },
            Some(Link::Idle(t)) => {
                *link = Some(Link::Idle(t));
                return Ok(());
            }
            None => return Ok(()),
        };

        if let Err(e) = transport.close().await {
            tracing::warn!(error = %e, "transport close failed (continuing anyway)");
        }
        *link = Some(Link::Idle(transport));

        self.shared.link_up.store(false, Ordering::SeqCst);
        self.shared.started.store(false, Ordering::SeqCst);
        self.shared.pending.fail_all(|| Error::ConnectionLost);
        tracing::info!("protocol client disconnected");
        Ok(())
    }

    /// Whether the IO task is running.
    pub fn is_connected(&self) -> bool {
        self.shared.link_up.load(Ordering::SeqCst)
    }

    /// Whether the device last reported stimulation as running.
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    /// Number of requests currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// The command timeout this client was built with.
    pub fn command_timeout(&self) -> Duration {
        self.options.command_timeout
    }

    async fn sender(&self) -> Result<mpsc::Sender<Request>> {
        match self.link.lock().await.as_ref() {
            Some(Link::Running(io)) if self.is_connected() => Ok(io.cmd_tx.clone()),
            _ => Err(Error::NotConnected),
        }
    }

    /// Send `command` to `target` and wait for its reply.
    ///
    /// Fails with [`Error::Device`] if the device rejects the command,
    /// [`Error::Timeout`] if no reply arrives within the command timeout,
    /// and [`Error::Cancelled`] if `cancel` fires first. On every failure
    /// the waiter is removed, so a late reply is logged as unpaired rather
    /// than completing some later request.
    pub async fn request(
        &self,
        target: Target,
        command: Command,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        let cmd_tx = self.sender().await?;
        let key = (target.as_byte(), command.id.as_byte());
        let bytes = frame::encode(HOST_ADDR, target.as_byte(), &command.payload());

        // Registered before sending so a fast reply cannot slip past.
        let (_guard, reply_rx) = self.shared.pending.register_guarded(key);

        tracing::trace!(target = %target, cmd = %command.id, len = command.data.len(), "request");
        send_or_cancel(&cmd_tx, bytes, cancel).await?;

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(Error::Cancelled),

            reply = tokio::time::timeout(self.options.command_timeout, reply_rx) => match reply {
                Ok(Ok(result)) => result,
                // Sender dropped: the IO task exited.
                Ok(Err(_)) => Err(Error::ConnectionLost),
                Err(_) => {
                    tracing::debug!(target = %target, cmd = %command.id, "request timed out");
                    Err(Error::Timeout)
                }
            },
        }
    }

    /// Send `command` to `target` without waiting for a reply.
    ///
    /// Returns once the frame has been written to the transport, or with
    /// [`Error::Cancelled`] if `cancel` fires first.
    pub async fn send_no_reply(
        &self,
        target: Target,
        command: Command,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let cmd_tx = self.sender().await?;
        let bytes = frame::encode(HOST_ADDR, target.as_byte(), &command.payload());
        send_or_cancel(&cmd_tx, bytes, cancel).await
    }

    // ---------------------------------------------------------------
    // Typed commands
    // ---------------------------------------------------------------

    pub async fn module_query(
        &self,
        target: Target,
        query: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_module_query(query), cancel).await
    }

    pub async fn request_analog(
        &self,
        target: Target,
        channel: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_request_analog(channel), cancel).await
    }

    pub async fn reset(&self, target: Target, cancel: &CancellationToken) -> Result<Frame> {
        self.request(target, commands::cmd_reset(), cancel).await
    }

    /// Echo two bytes off the device; a cheap link check.
    pub async fn echo(
        &self,
        target: Target,
        a: u8,
        b: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_echo(a, b), cancel).await
    }

    pub async fn board_command(
        &self,
        target: Target,
        command: BoardCommand,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_board(command), cancel).await
    }

    /// Read the battery voltage in millivolts.
    pub async fn battery(&self, target: Target, cancel: &CancellationToken) -> Result<u16> {
        let reply = self.board_command(target, BoardCommand::Battery, cancel).await?;
        commands::parse_battery_reply(reply.data())
    }

    /// Start or stop stimulation. Returns the state the device reports.
    pub async fn stimulation_switch(
        &self,
        target: Target,
        on: bool,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let reply = self.request(target, commands::cmd_stimulation_switch(on), cancel).await?;
        commands::parse_switch_reply(reply.data())
    }

    pub async fn clear(&self, target: Target, cancel: &CancellationToken) -> Result<Frame> {
        self.request(target, commands::cmd_clear(), cancel).await
    }

    pub async fn request_config(
        &self,
        target: Target,
        block: ConfigBlock,
        id: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_request_config(block, id), cancel).await
    }

    pub async fn create_contact_config(
        &self,
        target: Target,
        id: u8,
        config: &ContactConfig,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_create_contact_config(id, config)?, cancel).await
    }

    pub async fn delete_contact_config(
        &self,
        target: Target,
        id: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_delete_contact_config(id)?, cancel).await
    }

    pub async fn create_event(
        &self,
        target: Target,
        event: &EventConfig,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_create_event(event)?, cancel).await
    }

    pub async fn delete_event(
        &self,
        target: Target,
        id: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_delete_event(id)?, cancel).await
    }

    pub async fn add_event_to_schedule(
        &self,
        target: Target,
        event: u8,
        schedule: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_add_event_to_schedule(event, schedule)?, cancel).await
    }

    pub async fn remove_event_from_schedule(
        &self,
        target: Target,
        event: u8,
        schedule: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(
            target,
            commands::cmd_remove_event_from_schedule(event, schedule)?,
            cancel,
        )
        .await
    }

    pub async fn move_event_to_schedule(
        &self,
        target: Target,
        event: u8,
        schedule: u8,
        delay_ms: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(
            target,
            commands::cmd_move_event_to_schedule(event, schedule, delay_ms)?,
            cancel,
        )
        .await
    }

    pub async fn edit_event(
        &self,
        target: Target,
        event: u8,
        edit: EventEdit,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_edit_event(event, edit)?, cancel).await
    }

    pub async fn create_schedule(
        &self,
        target: Target,
        id: u8,
        sync: u8,
        period_ms: u32,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_create_schedule(id, sync, period_ms)?, cancel).await
    }

    pub async fn delete_schedule(
        &self,
        target: Target,
        id: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_delete_schedule(id)?, cancel).await
    }

    pub async fn sync_group(
        &self,
        target: Target,
        sync: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_sync_group(sync), cancel).await
    }

    pub async fn change_group_state(
        &self,
        target: Target,
        sync: u8,
        state: GroupState,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_change_group_state(sync, state), cancel).await
    }

    pub async fn change_schedule_config(
        &self,
        target: Target,
        id: u8,
        sync: u8,
        period_ms: u32,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(
            target,
            commands::cmd_change_schedule_config(id, sync, period_ms)?,
            cancel,
        )
        .await
    }

    pub async fn reset_schedule(
        &self,
        target: Target,
        id: u8,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_reset_schedule(id)?, cancel).await
    }

    pub async fn custom_waveform(
        &self,
        target: Target,
        slot: u8,
        chunk: u8,
        points: &[u16],
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.request(target, commands::cmd_custom_waveform(slot, chunk, points)?, cancel).await
    }

    /// Push drive values for the three channels of `target` (fire-and-forget).
    pub async fn stream(
        &self,
        target: Target,
        variant: StreamVariant,
        channels: &[ChannelDrive; 3],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.send_no_reply(target, commands::cmd_stream(variant, channels), cancel)
            .await
    }
}

/// Hand `bytes` to the IO task unless `cancel` fires first.
///
/// A write stalled behind other traffic does not hold the caller.
async fn send_or_cancel(
    cmd_tx: &mpsc::Sender<Request>,
    bytes: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => Err(Error::Cancelled),
        sent = io::send_frame(cmd_tx, bytes) => sent,
    }
}
