//! Cached per-channel drive values.
//!
//! Channels are numbered from 1 across all configured units: channels 1-3
//! belong to the first unit, 4-6 to the second and so on. The table is
//! written by [`DeviceController::set_stimulation`] and read once per
//! iteration by the streaming loop.
//!
//! [`DeviceController::set_stimulation`]: crate::DeviceController::set_stimulation

use std::sync::{Mutex, MutexGuard};

use wss_core::error::{Error, Result};
use wss_core::types::CHANNELS_PER_UNIT;

/// Drive values of one channel as the caller set them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelState {
    /// Amplitude in milliamps, mapped to device units at send time.
    pub amplitude_ma: f32,
    /// Pulse width in microseconds.
    pub pulse_width_us: u16,
    /// Inter-pulse interval in milliseconds.
    pub ipi_ms: u16,
}

/// Position of a channel on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAddr {
    /// Index into the controller's target list.
    pub unit: usize,
    /// Channel on that unit, 1-based (also its event and schedule id).
    pub local: u8,
}

pub(crate) struct ChannelTable {
    slots: Mutex<Vec<[ChannelState; CHANNELS_PER_UNIT]>>,
}

impl ChannelTable {
    pub fn new(units: usize, initial: ChannelState) -> Self {
        ChannelTable {
            slots: Mutex::new(vec![[initial; CHANNELS_PER_UNIT]; units]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<[ChannelState; CHANNELS_PER_UNIT]>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channel_count(&self) -> usize {
        self.lock().len() * CHANNELS_PER_UNIT
    }

    /// Resolve a 1-based channel number.
    pub fn locate(&self, channel: usize) -> Result<ChannelAddr> {
        let count = self.channel_count();
        if channel == 0 || channel > count {
            return Err(Error::InvalidParameter(format!(
                "channel {channel} out of range 1..={count}"
            )));
        }
        let index = channel - 1;
        Ok(ChannelAddr {
            unit: index / CHANNELS_PER_UNIT,
            local: (index % CHANNELS_PER_UNIT) as u8 + 1,
        })
    }

    pub fn set(&self, channel: usize, state: ChannelState) -> Result<()> {
        let addr = self.locate(channel)?;
        self.lock()[addr.unit][usize::from(addr.local) - 1] = state;
        Ok(())
    }

    pub fn get(&self, channel: usize) -> Result<ChannelState> {
        let addr = self.locate(channel)?;
        Ok(self.lock()[addr.unit][usize::from(addr.local) - 1])
    }

    /// Copy of the three channels of one unit.
    pub fn unit(&self, unit: usize) -> Option<[ChannelState; CHANNELS_PER_UNIT]> {
        self.lock().get(unit).copied()
    }
}
