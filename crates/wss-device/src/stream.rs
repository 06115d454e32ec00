//! Streaming loop.
//!
//! Once stimulation runs, the loop pushes every unit's cached drive values
//! as fire-and-forget StreamChange frames, one unit per period. The
//! inter-pulse interval group is only included when it differs from what
//! was last written for that unit.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use wss_core::error::Error;
use wss_core::types::{CHANNELS_PER_UNIT, Target};
use wss_protocol::ProtocolClient;
use wss_protocol::commands::{ChannelDrive, StreamVariant};

use crate::amplitude::ma_to_device_units;
use crate::channels::{ChannelState, ChannelTable};

/// How long a stop waits for the loop to notice its token before aborting.
pub const STOP_GRACE: Duration = Duration::from_millis(500);

/// Handle to a running streaming loop.
pub(crate) struct StreamTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamTask {
    /// Start the loop. `on_fault` runs once if a send fails; the loop has
    /// already stopped by then.
    pub fn spawn<F>(
        client: Arc<ProtocolClient>,
        channels: Arc<ChannelTable>,
        targets: Vec<Target>,
        period: Duration,
        on_fault: F,
    ) -> Self
    where
        F: FnOnce(Error) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(stream_loop(
            client,
            channels,
            targets,
            period,
            cancel.clone(),
            on_fault,
        ));
        StreamTask { cancel, task }
    }

    /// Cancel the loop and wait for it to exit, aborting after
    /// [`STOP_GRACE`].
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if tokio::time::timeout(STOP_GRACE, &mut self.task).await.is_err() {
            warn!("streaming loop did not stop in time, aborting");
            self.task.abort();
        }
    }
}

impl Drop for StreamTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn drive(state: &ChannelState) -> ChannelDrive {
    ChannelDrive {
        amplitude: ma_to_device_units(state.amplitude_ma),
        pulse_width: state.pulse_width_us,
        ipi: state.ipi_ms,
    }
}

/// Pick the update variant for one unit given the interval values last
/// written to it.
pub(crate) fn choose_variant(
    last_ipi: Option<[u16; CHANNELS_PER_UNIT]>,
    current: [u16; CHANNELS_PER_UNIT],
) -> StreamVariant {
    if last_ipi == Some(current) {
        StreamVariant::NoIpi
    } else {
        StreamVariant::All
    }
}

async fn stream_loop<F>(
    client: Arc<ProtocolClient>,
    channels: Arc<ChannelTable>,
    targets: Vec<Target>,
    period: Duration,
    cancel: CancellationToken,
    on_fault: F,
) where
    F: FnOnce(Error),
{
    debug!(units = targets.len(), period_ms = period.as_millis() as u64, "streaming loop started");
    let mut last_ipi: Vec<Option<[u16; CHANNELS_PER_UNIT]>> = vec![None; targets.len()];

    loop {
        for (unit, &target) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("streaming loop stopped");
                return;
            }

            let Some(states) = channels.unit(unit) else {
                continue;
            };
            let drives = states.map(|s| drive(&s));
            let ipis = states.map(|s| s.ipi_ms);
            let variant = choose_variant(last_ipi[unit], ipis);

            match client.stream(target, variant, &drives, &cancel).await {
                Ok(()) => {
                    trace!(target = %target, ?variant, "stream update sent");
                    if variant == StreamVariant::All {
                        last_ipi[unit] = Some(ipis);
                    }
                }
                Err(Error::Cancelled) => {
                    debug!("streaming loop stopped");
                    return;
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "stream update failed, stopping loop");
                    on_fault(e);
                    return;
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("streaming loop stopped");
                    return;
                }
                _ = tokio::time::sleep(period) => {}
            }
        }
    }
}
