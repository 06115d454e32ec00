//! DeviceController -- lifecycle, setup sequencing and streaming for a set
//! of WSS units sharing one link.
//!
//! The controller owns a [`ProtocolClient`] and runs two background
//! activities on top of it:
//!
//! - a **setup worker** that sends queued configuration steps one at a
//!   time and waits for each reply, and
//! - a **streaming loop** that pushes cached drive values to every unit at
//!   a fixed period without waiting for replies.
//!
//! The two never overlap. Queuing configuration while streaming pauses the
//! loop first; it restarts once every target's queue is empty.
//!
//! ```text
//! Disconnected -> Connecting -> SettingUp -> Ready -> Started -> Streaming
//!                                   ^                               |
//!                                   +------- configuration edit ----+
//! ```
//!
//! A connect failure, a device error during setup, exhausted retries or a
//! transport fault while streaming moves the controller to `Error`, stops
//! the loop and disconnects. Only [`DeviceController::initialize`] leaves
//! `Error`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use wss_core::error::{Error, Result};
use wss_core::events::ControllerEvent;
use wss_core::transport::Transport;
use wss_core::types::{CHANNELS_PER_UNIT, ControllerState, Target};
use wss_protocol::commands::{
    self, BoardCommand, ChannelDrive, Command, ConfigBlock, EventEdit, StreamVariant,
    WAVEFORM_CHUNK_POINTS,
};
use wss_protocol::{ClientOptions, ProtocolClient};

use crate::builder::StimDefaults;
use crate::channels::{ChannelAddr, ChannelState, ChannelTable};
use crate::setup::{self, SetupProgress, SetupQueue, SetupStep};
use crate::stream::StreamTask;

/// Shape id of the first custom waveform slot. Slot `n` is selected with
/// shape `CUSTOM_SHAPE_BASE + n`.
pub const CUSTOM_SHAPE_BASE: u8 = 11;

/// Capacity of the controller event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Resolved controller settings.
#[derive(Debug, Clone)]
pub(crate) struct ControllerConfig {
    pub targets: Vec<Target>,
    pub stream_period: Duration,
    pub max_setup_retries: u32,
    pub defaults: StimDefaults,
    pub client: ClientOptions,
}

/// State guarded by the setup gate.
struct Gate {
    queue: SetupQueue,
    /// A setup worker is alive and will look at the queue again.
    worker_running: bool,
    /// The loop was paused for an edit and restarts when the queue drains.
    resume_streaming: bool,
    stream: Option<StreamTask>,
}

struct Inner {
    client: Arc<ProtocolClient>,
    channels: Arc<ChannelTable>,
    config: ControllerConfig,
    state: watch::Sender<ControllerState>,
    events: broadcast::Sender<ControllerEvent>,
    gate: Mutex<Gate>,
    /// Timeouts absorbed by setup since the last reset.
    retries: AtomicU32,
    /// Cancels in-flight setup requests on shutdown or failure.
    session: StdMutex<CancellationToken>,
}

/// Controller for one or more WSS units behind a single link.
///
/// Cloning is cheap; every clone drives the same controller.
#[derive(Clone)]
pub struct DeviceController {
    inner: Arc<Inner>,
}

impl DeviceController {
    pub(crate) fn new(transport: Box<dyn Transport>, config: ControllerConfig) -> Self {
        let defaults = &config.defaults;
        let initial = ChannelState {
            amplitude_ma: defaults.amplitude_ma,
            pulse_width_us: defaults.pulse_width_us,
            ipi_ms: defaults.ipi_ms,
        };
        let (state, _) = watch::channel(ControllerState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        DeviceController {
            inner: Arc::new(Inner {
                client: Arc::new(ProtocolClient::new(transport, config.client.clone())),
                channels: Arc::new(ChannelTable::new(config.targets.len(), initial)),
                gate: Mutex::new(Gate {
                    queue: SetupQueue::new(&config.targets),
                    worker_running: false,
                    resume_streaming: false,
                    stream: None,
                }),
                config,
                state,
                events,
                retries: AtomicU32::new(0),
                session: StdMutex::new(CancellationToken::new()),
            }),
        }
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Connect and queue the default setup for every configured unit.
    ///
    /// Returns once the setup is queued; the controller reaches
    /// [`ControllerState::Streaming`] when it has run. Initializing an
    /// active controller is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        let seed = setup::default_sequence(&inner.config.defaults)?;

        let mut gate = inner.gate.lock().await;
        match inner.state() {
            ControllerState::Disconnected => {}
            ControllerState::Error => inner.set_state(ControllerState::Disconnected),
            other => {
                warn!(state = %other, "initialize ignored, controller already active");
                return Ok(());
            }
        }

        inner.set_state(ControllerState::Connecting);
        inner.new_session();
        if let Err(e) = inner.client.connect().await {
            error!(error = %e, "connect failed");
            inner.set_state(ControllerState::Error);
            return Err(e);
        }

        gate.queue.clear();
        gate.resume_streaming = false;
        inner.retries.store(0, Ordering::SeqCst);
        for &target in &inner.config.targets {
            for step in &seed {
                gate.queue.push(target, step.clone());
            }
        }
        debug!(
            units = inner.config.targets.len(),
            steps = gate.queue.pending(),
            "default setup queued"
        );

        inner.set_state(ControllerState::SettingUp);
        inner.ensure_worker(&mut gate);
        Ok(())
    }

    /// Stop streaming, zero the outputs and disconnect.
    ///
    /// Safe to call repeatedly and on a controller that never started.
    pub async fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        let mut gate = inner.gate.lock().await;

        gate.queue.clear();
        gate.resume_streaming = false;
        if let Some(stream) = gate.stream.take() {
            stream.stop().await;
        }
        inner.cancel_session();

        let state = inner.state();
        if !inner.client.is_connected()
            && matches!(state, ControllerState::Disconnected | ControllerState::Error)
        {
            debug!(state = %state, "shutdown: nothing to do");
            return Ok(());
        }

        if inner.client.is_connected() {
            inner.zero_outputs().await;
        }
        if let Err(e) = inner.client.disconnect().await {
            warn!(error = %e, "disconnect failed during shutdown (continuing anyway)");
        }
        if state != ControllerState::Error {
            inner.set_state(ControllerState::Disconnected);
        }
        drop(gate);

        info!("controller shut down");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Stimulation control
    // ---------------------------------------------------------------

    /// Turn stimulation on for every unit.
    ///
    /// From `Ready` this queues the start command. During a setup pass the
    /// start is queued behind the pending steps, unless the pass already
    /// ends with one. While stimulation is running, or while connecting, it
    /// does nothing. From `Disconnected` or `Error` it re-initializes, which
    /// ends with a start.
    pub async fn start_stimulation(&self) -> Result<()> {
        let state = self.state();
        match state {
            ControllerState::Ready => {
                self.inner.retries.store(0, Ordering::SeqCst);
                self.inner.enqueue_start().await
            }
            ControllerState::SettingUp => self.inner.enqueue_start().await,
            ControllerState::Started | ControllerState::Streaming => {
                warn!("start ignored, stimulation already running");
                Ok(())
            }
            ControllerState::Connecting => {
                warn!("start ignored while connecting, setup ends with a start");
                Ok(())
            }
            ControllerState::Disconnected | ControllerState::Error => {
                info!(state = %state, "start requested, re-initializing");
                self.initialize().await
            }
        }
    }

    /// Turn stimulation off for every unit.
    pub async fn stop_stimulation(&self) -> Result<()> {
        let state = self.state();
        match state {
            ControllerState::Started | ControllerState::Streaming | ControllerState::SettingUp => {
                let steps = self.inner.for_each_target("stop stimulation", || {
                    Ok(commands::cmd_stimulation_switch(false))
                })?;
                self.inner.enqueue(steps).await
            }
            _ => {
                warn!(state = %state, "stop ignored, stimulation not running");
                Ok(())
            }
        }
    }

    /// Set the drive values the streaming loop sends for `channel`.
    ///
    /// Channels are numbered from 1 across all units. The change goes out
    /// with the next loop iteration; nothing is queued.
    pub fn set_stimulation(
        &self,
        channel: usize,
        amplitude_ma: f32,
        pulse_width_us: u16,
        ipi_ms: u16,
    ) -> Result<()> {
        if !amplitude_ma.is_finite() || amplitude_ma < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "amplitude_ma {amplitude_ma} must be finite and non-negative"
            )));
        }
        if ipi_ms == 0 {
            return Err(Error::InvalidParameter("ipi_ms must be non-zero".into()));
        }
        self.inner.channels.set(
            channel,
            ChannelState {
                amplitude_ma,
                pulse_width_us,
                ipi_ms,
            },
        )?;
        trace!(channel, amplitude_ma, pulse_width_us, ipi_ms, "channel drive updated");
        Ok(())
    }

    /// Current cached drive values of `channel`.
    pub fn channel(&self, channel: usize) -> Result<ChannelState> {
        self.inner.channels.get(channel)
    }

    // ---------------------------------------------------------------
    // Configuration edits
    // ---------------------------------------------------------------

    /// Change the gap between the stimulation and recharge phases of
    /// `channel`, in microseconds.
    pub async fn set_inter_phase_delay(&self, channel: usize, ipd_us: u32) -> Result<()> {
        let (target, addr) = self.inner.resolve(channel)?;
        let command = commands::cmd_edit_event(addr.local, EventEdit::InterPhaseDelay(ipd_us))?;
        let label = format!("set inter-phase delay {}", addr.local);
        self.inner
            .enqueue(vec![(target, SetupStep::new(command, label))])
            .await
    }

    /// Change the burst ratio of `channel`.
    pub async fn set_burst_ratio(&self, channel: usize, ratio: u8) -> Result<()> {
        let (target, addr) = self.inner.resolve(channel)?;
        let command = commands::cmd_edit_event(addr.local, EventEdit::Ratio(ratio))?;
        let label = format!("set burst ratio {}", addr.local);
        self.inner
            .enqueue(vec![(target, SetupStep::new(command, label))])
            .await
    }

    /// Upload a custom waveform to `slot` on every unit.
    ///
    /// The points are sent in chunks of [`WAVEFORM_CHUNK_POINTS`].
    pub async fn upload_waveform(&self, slot: u8, points: &[u16]) -> Result<()> {
        if points.is_empty() {
            return Err(Error::InvalidParameter("waveform points must not be empty".into()));
        }
        let chunks: Vec<&[u16]> = points.chunks(WAVEFORM_CHUNK_POINTS).collect();
        if chunks.len() > usize::from(u8::MAX) + 1 {
            return Err(Error::InvalidParameter(format!(
                "waveform of {} points needs more than 256 chunks",
                points.len()
            )));
        }

        let mut chunk_cmds = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            chunk_cmds.push(commands::cmd_custom_waveform(slot, index as u8, chunk)?);
        }

        let mut steps = Vec::new();
        for &target in &self.inner.config.targets {
            for (index, command) in chunk_cmds.iter().enumerate() {
                let label = format!("upload waveform {slot} chunk {index}");
                steps.push((target, SetupStep::new(command.clone(), label)));
            }
        }
        self.inner.enqueue(steps).await
    }

    /// Select the stimulation shape of `channel`.
    ///
    /// Built-in shapes have ids below [`CUSTOM_SHAPE_BASE`]; uploaded
    /// waveforms follow it. The recharge phase keeps its default shape.
    pub async fn select_waveform(&self, channel: usize, shape: u8) -> Result<()> {
        let (target, addr) = self.inner.resolve(channel)?;
        let edit = EventEdit::Shape {
            stim: shape,
            recharge: self.inner.config.defaults.recharge_shape,
        };
        let command = commands::cmd_edit_event(addr.local, edit)?;
        let label = format!("select shape {shape} for event {}", addr.local);
        self.inner
            .enqueue(vec![(target, SetupStep::new(command, label))])
            .await
    }

    /// Persist the current configuration on every unit.
    pub async fn save_settings(&self) -> Result<()> {
        let steps = self.inner.for_each_target("save settings", || {
            Ok(commands::cmd_board(BoardCommand::SaveSettings))
        })?;
        self.inner.enqueue(steps).await
    }

    /// Restore the persisted configuration on every unit.
    pub async fn load_settings(&self) -> Result<()> {
        let steps = self.inner.for_each_target("load settings", || {
            Ok(commands::cmd_board(BoardCommand::LoadSettings))
        })?;
        self.inner.enqueue(steps).await
    }

    /// Ask `target` to report a configuration block. The reply is logged.
    pub async fn request_config(&self, target: Target, block: ConfigBlock, id: u8) -> Result<()> {
        if !self.inner.config.targets.contains(&target) {
            return Err(Error::InvalidParameter(format!(
                "target {target} is not configured"
            )));
        }
        let command = commands::cmd_request_config(block, id);
        let label = format!("request {block:?} {id}");
        self.inner
            .enqueue(vec![(target, SetupStep::new(command, label))])
            .await
    }

    // ---------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------

    pub fn state(&self) -> ControllerState {
        self.inner.state()
    }

    /// Subscribe to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until the controller reaches `state`.
    ///
    /// Fails with [`Error::Timeout`] if it does not get there in time, and
    /// with [`Error::InvalidState`] if it enters `Error` first.
    pub async fn wait_for_state(&self, state: ControllerState, timeout: Duration) -> Result<()> {
        let mut rx = self.inner.state.subscribe();
        let wait = rx.wait_for(|s| *s == state || *s == ControllerState::Error);
        let reached = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(reached)) => *reached,
            Ok(Err(_)) => return Err(Error::NotConnected),
            Err(_) => return Err(Error::Timeout),
        };
        if reached != state {
            return Err(Error::InvalidState(format!(
                "controller entered Error while waiting for {state}"
            )));
        }
        Ok(())
    }

    /// Step list and cursor of `target`'s setup queue.
    pub async fn setup_progress(&self, target: Target) -> Option<SetupProgress> {
        self.inner.gate.lock().await.queue.progress(target)
    }

    /// Units this controller drives, in channel order.
    pub fn targets(&self) -> &[Target] {
        &self.inner.config.targets
    }

    /// The underlying protocol client, for diagnostics.
    pub fn client(&self) -> &ProtocolClient {
        &self.inner.client
    }
}

impl Inner {
    fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    fn set_state(&self, to: ControllerState) {
        let from = self.state.send_replace(to);
        if from != to {
            info!(%from, %to, "controller state changed");
            let _ = self.events.send(ControllerEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    fn session(&self) -> CancellationToken {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn new_session(&self) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = CancellationToken::new();
    }

    fn cancel_session(&self) {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).cancel();
    }

    fn resolve(&self, channel: usize) -> Result<(Target, ChannelAddr)> {
        let addr = self.channels.locate(channel)?;
        let target = self.config.targets.get(addr.unit).copied().ok_or_else(|| {
            Error::InvalidParameter(format!("channel {channel} has no unit"))
        })?;
        Ok((target, addr))
    }

    fn for_each_target(
        &self,
        label: &str,
        make: impl Fn() -> Result<Command>,
    ) -> Result<Vec<(Target, SetupStep)>> {
        self.config
            .targets
            .iter()
            .map(|&target| Ok((target, SetupStep::new(make()?, label))))
            .collect()
    }

    /// Append steps, pausing the streaming loop if it runs, and make sure a
    /// worker picks them up.
    async fn enqueue(self: &Arc<Self>, steps: Vec<(Target, SetupStep)>) -> Result<()> {
        let mut gate = self.gate.lock().await;
        self.enqueue_locked(&mut gate, steps).await
    }

    /// Queue a start for every unit whose pending steps do not already
    /// end with one.
    async fn enqueue_start(self: &Arc<Self>) -> Result<()> {
        let mut gate = self.gate.lock().await;
        if matches!(
            self.state(),
            ControllerState::Started | ControllerState::Streaming
        ) {
            warn!("start ignored, stimulation already running");
            return Ok(());
        }
        let steps: Vec<(Target, SetupStep)> = self
            .config
            .targets
            .iter()
            .filter(|&&target| gate.queue.pending_switch(target) != Some(true))
            .map(|&target| {
                let command = commands::cmd_stimulation_switch(true);
                (target, SetupStep::new(command, "start stimulation"))
            })
            .collect();
        if steps.is_empty() {
            warn!("start ignored, a start is already queued");
            return Ok(());
        }
        self.enqueue_locked(&mut gate, steps).await
    }

    async fn enqueue_locked(
        self: &Arc<Self>,
        gate: &mut Gate,
        steps: Vec<(Target, SetupStep)>,
    ) -> Result<()> {
        let state = self.state();
        if !matches!(
            state,
            ControllerState::Ready
                | ControllerState::Started
                | ControllerState::Streaming
                | ControllerState::SettingUp
        ) {
            return Err(Error::InvalidState(format!(
                "cannot queue configuration while {state}"
            )));
        }

        if let Some(stream) = gate.stream.take() {
            stream.stop().await;
            gate.resume_streaming = true;
            debug!("streaming paused for configuration");
            self.emit(ControllerEvent::StreamingPaused);
        }

        for (target, step) in steps {
            debug!(target = %target, step = %step.label, "setup step queued");
            gate.queue.push(target, step);
        }
        self.set_state(ControllerState::SettingUp);
        self.ensure_worker(gate);
        Ok(())
    }

    fn ensure_worker(self: &Arc<Self>, gate: &mut Gate) {
        if gate.worker_running {
            return;
        }
        gate.worker_running = true;
        tokio::spawn(Arc::clone(self).run_setup());
    }

    /// Setup worker: send queued steps until every target's queue is empty.
    async fn run_setup(self: Arc<Self>) {
        debug!("setup pass started");
        loop {
            let (target, step, epoch) = {
                let mut gate = self.gate.lock().await;
                match gate.queue.next() {
                    Some((target, step)) => (target, step, gate.queue.epoch()),
                    None => {
                        debug_assert!(gate.queue.is_drained());
                        gate.worker_running = false;
                        self.on_queue_drained(&mut gate);
                        debug!("setup pass finished");
                        return;
                    }
                }
            };

            trace!(target = %target, step = %step.label, "sending setup step");
            let cancel = self.session();
            match self.client.request(target, step.command.clone(), &cancel).await {
                Ok(reply) => {
                    trace!(
                        target = %target,
                        step = %step.label,
                        data = ?reply.data(),
                        "setup step done"
                    );
                    let mut gate = self.gate.lock().await;
                    if gate.queue.epoch() == epoch {
                        gate.queue.advance(target);
                        drop(gate);
                        self.emit(ControllerEvent::SetupStepCompleted {
                            target,
                            label: step.label,
                        });
                    }
                }
                Err(Error::Timeout) => {
                    let attempt = self.retries.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt > self.config.max_setup_retries {
                        self.fail(target, step.label, epoch, Error::Timeout).await;
                    } else {
                        warn!(
                            target = %target,
                            step = %step.label,
                            attempt,
                            max = self.config.max_setup_retries,
                            "setup step timed out, retrying"
                        );
                    }
                }
                Err(Error::Cancelled) => {
                    debug!(target = %target, step = %step.label, "setup step cancelled");
                }
                Err(Error::InvalidParameter(msg)) => {
                    warn!(
                        target = %target,
                        step = %step.label,
                        error = %msg,
                        "skipping invalid setup step"
                    );
                    let mut gate = self.gate.lock().await;
                    if gate.queue.epoch() == epoch {
                        gate.queue.advance(target);
                    }
                }
                Err(e) => {
                    self.fail(target, step.label, epoch, e).await;
                }
            }
        }
    }

    /// Every queue is empty: settle the state and restart streaming if the
    /// device is running.
    fn on_queue_drained(self: &Arc<Self>, gate: &mut Gate) {
        let resume = std::mem::take(&mut gate.resume_streaming);
        if self.state() != ControllerState::SettingUp {
            return;
        }

        if !self.client.is_started() {
            if resume {
                debug!("stimulation stopped by the edit, not resuming stream");
            }
            self.set_state(ControllerState::Ready);
            return;
        }

        if resume {
            self.start_stream(gate);
            self.set_state(ControllerState::Streaming);
            debug!("streaming resumed");
            self.emit(ControllerEvent::StreamingResumed);
        } else {
            self.set_state(ControllerState::Ready);
            self.set_state(ControllerState::Started);
            self.start_stream(gate);
            self.set_state(ControllerState::Streaming);
        }
    }

    fn start_stream(self: &Arc<Self>, gate: &mut Gate) {
        if gate.stream.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        gate.stream = Some(StreamTask::spawn(
            Arc::clone(&self.client),
            Arc::clone(&self.channels),
            self.config.targets.clone(),
            self.config.stream_period,
            move |err| {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move { inner.fail_streaming(err).await });
                }
            },
        ));
    }

    /// A setup step failed for good.
    async fn fail(&self, target: Target, label: String, epoch: u64, err: Error) {
        let mut gate = self.gate.lock().await;
        if gate.queue.epoch() != epoch {
            debug!(error = %err, "ignoring failure from an abandoned setup pass");
            return;
        }
        error!(target = %target, step = %label, error = %err, "setup failed");
        self.emit(ControllerEvent::SetupFailed {
            target,
            label,
            reason: err.to_string(),
        });
        self.enter_error(&mut gate).await;
    }

    async fn fail_streaming(&self, err: Error) {
        let mut gate = self.gate.lock().await;
        if matches!(
            self.state(),
            ControllerState::Disconnected | ControllerState::Error
        ) {
            return;
        }
        error!(error = %err, "link failed while streaming");
        self.enter_error(&mut gate).await;
    }

    async fn enter_error(&self, gate: &mut Gate) {
        gate.queue.clear();
        gate.resume_streaming = false;
        if let Some(stream) = gate.stream.take() {
            stream.stop().await;
        }
        self.set_state(ControllerState::Error);
        self.cancel_session();
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "disconnect after failure failed");
        }
    }

    /// Best-effort zero amplitude on every unit.
    async fn zero_outputs(&self) {
        // The session token is already cancelled at this point.
        let cancel = CancellationToken::new();
        for (unit, &target) in self.config.targets.iter().enumerate() {
            let Some(states) = self.channels.unit(unit) else {
                continue;
            };
            let drives: [ChannelDrive; CHANNELS_PER_UNIT] = states.map(|s| ChannelDrive {
                amplitude: 0,
                pulse_width: s.pulse_width_us,
                ipi: s.ipi_ms,
            });
            if let Err(e) = self
                .client
                .stream(target, StreamVariant::All, &drives, &cancel)
                .await
            {
                debug!(target = %target, error = %e, "could not zero outputs");
            }
        }
    }
}
