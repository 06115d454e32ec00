//! ControllerBuilder -- fluent builder for [`DeviceController`] instances.
//!
//! Separates configuration from construction so that callers can pick the
//! units on the bus, the streaming cadence, retry policy and stimulation
//! defaults before anything touches the link. Nothing is opened here; the
//! connection is made by [`DeviceController::initialize`].
//!
//! # Example
//!
//! ```no_run
//! use wss_device::ControllerBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> wss_core::Result<()> {
//! let controller = ControllerBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .unit_count(2)
//!     .stream_period(Duration::from_millis(10))
//!     .build()?;
//! controller.initialize().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::time::Duration;

use wss_core::error::{Error, Result};
use wss_core::transport::Transport;
use wss_core::types::Target;
use wss_protocol::ClientOptions;
use wss_protocol::client::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_POLL_INTERVAL};
#[cfg(feature = "serial")]
use wss_transport::{DEFAULT_BAUD_RATE, SerialConfig, SerialTransport};

use crate::controller::{ControllerConfig, DeviceController};
use crate::setup;

/// Default interval between streaming updates.
pub const DEFAULT_STREAM_PERIOD: Duration = Duration::from_millis(10);

/// Default number of setup timeouts tolerated before giving up.
pub const DEFAULT_MAX_SETUP_RETRIES: u32 = 3;

/// Values every channel starts with after initialization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StimDefaults {
    /// Amplitude in milliamps.
    pub amplitude_ma: f32,
    /// Pulse width of both phases in microseconds.
    pub pulse_width_us: u16,
    /// Gap between the phases in microseconds.
    pub ipd_us: u16,
    /// Inter-pulse interval in milliseconds; also the schedule period.
    pub ipi_ms: u16,
    pub burst_ratio: u8,
    pub stim_shape: u8,
    pub recharge_shape: u8,
}

impl Default for StimDefaults {
    fn default() -> Self {
        StimDefaults {
            amplitude_ma: 0.0,
            pulse_width_us: 50,
            ipd_us: 10,
            ipi_ms: 50,
            burst_ratio: 1,
            stim_shape: 0,
            recharge_shape: 0,
        }
    }
}

/// Fluent builder for [`DeviceController`].
///
/// Defaults drive a single unit at 115200 baud with a 10 ms streaming
/// period, so the simplest usage is:
///
/// ```ignore
/// let controller = ControllerBuilder::new()
///     .serial_port("/dev/ttyUSB0")
///     .build()?;
/// ```
pub struct ControllerBuilder {
    targets: Vec<Target>,
    unit_count: Option<usize>,
    #[cfg(feature = "serial")]
    serial_port: Option<String>,
    #[cfg(feature = "serial")]
    baud_rate: u32,
    command_timeout: Duration,
    poll_interval: Duration,
    stream_period: Duration,
    max_setup_retries: u32,
    defaults: StimDefaults,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        ControllerBuilder {
            targets: vec![Target::Unit1],
            unit_count: None,
            #[cfg(feature = "serial")]
            serial_port: None,
            #[cfg(feature = "serial")]
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stream_period: DEFAULT_STREAM_PERIOD,
            max_setup_retries: DEFAULT_MAX_SETUP_RETRIES,
            defaults: StimDefaults::default(),
        }
    }

    /// Drive exactly these units, in this channel order.
    pub fn targets(mut self, targets: &[Target]) -> Self {
        self.targets = targets.to_vec();
        self.unit_count = None;
        self
    }

    /// Drive the first `n` units (1..=3).
    pub fn unit_count(mut self, n: usize) -> Self {
        self.unit_count = Some(n);
        self
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    #[cfg(feature = "serial")]
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the default baud rate (115200).
    #[cfg(feature = "serial")]
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set how long a request waits for its reply (default: 2s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the read timeout of the client's IO task (default: 50ms).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the delay between streaming updates (default: 10ms).
    pub fn stream_period(mut self, period: Duration) -> Self {
        self.stream_period = period;
        self
    }

    /// Set how many setup timeouts are retried before the controller
    /// fails (default: 3).
    pub fn max_setup_retries(mut self, n: u32) -> Self {
        self.max_setup_retries = n;
        self
    }

    pub fn defaults(mut self, defaults: StimDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    fn resolve_targets(&self) -> Result<Vec<Target>> {
        let targets = match self.unit_count {
            Some(n) if (1..=Target::UNITS.len()).contains(&n) => Target::UNITS[..n].to_vec(),
            Some(n) => {
                return Err(Error::InvalidParameter(format!(
                    "unit_count {n} out of range 1..={}",
                    Target::UNITS.len()
                )));
            }
            None => self.targets.clone(),
        };

        if targets.is_empty() {
            return Err(Error::InvalidParameter("targets must not be empty".into()));
        }
        if targets.contains(&Target::Broadcast) {
            return Err(Error::InvalidParameter(
                "targets cannot include the broadcast address".into(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = targets.iter().find(|t| !seen.insert(**t)) {
            return Err(Error::InvalidParameter(format!("target {dup} listed twice")));
        }
        Ok(targets)
    }

    fn config(&self) -> Result<ControllerConfig> {
        let targets = self.resolve_targets()?;

        if self.stream_period.is_zero() {
            return Err(Error::InvalidParameter("stream_period must be non-zero".into()));
        }
        if self.command_timeout.is_zero() {
            return Err(Error::InvalidParameter("command_timeout must be non-zero".into()));
        }
        let amplitude = self.defaults.amplitude_ma;
        if !amplitude.is_finite() || amplitude < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "default amplitude_ma {amplitude} must be finite and non-negative"
            )));
        }
        // Every default must also be encodable.
        setup::default_sequence(&self.defaults)?;

        Ok(ControllerConfig {
            targets,
            stream_period: self.stream_period,
            max_setup_retries: self.max_setup_retries,
            defaults: self.defaults,
            client: ClientOptions {
                command_timeout: self.command_timeout,
                poll_interval: self.poll_interval,
            },
        })
    }

    /// Build a [`DeviceController`] with a caller-provided transport.
    ///
    /// This is the entry point for testing (pass a `MockTransport` from
    /// `wss-test-harness`).
    pub fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<DeviceController> {
        let config = self.config()?;
        Ok(DeviceController::new(transport, config))
    }

    /// Build a [`DeviceController`] over a serial port.
    ///
    /// Requires that [`serial_port()`](Self::serial_port) has been called.
    /// The port is opened by [`DeviceController::initialize`].
    #[cfg(feature = "serial")]
    pub fn build(self) -> Result<DeviceController> {
        let port = self
            .serial_port
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("serial_port is required for build()".into()))?;
        let serial = SerialConfig {
            baud_rate: self.baud_rate,
            ..SerialConfig::default()
        };
        let transport = SerialTransport::new(port, serial);
        self.build_with_transport(Box::new(transport))
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
