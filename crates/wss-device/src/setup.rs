//! Setup queue.
//!
//! Configuration traffic runs as an ordered list of request/response steps
//! per target. Each list keeps its history; a cursor marks the next step
//! to send, so progress can be inspected while a pass is running.

use wss_core::error::Result;
use wss_core::types::{CHANNELS_PER_UNIT, CommandId, Target};
use wss_protocol::commands::{self, Command, ContactConfig, EventConfig, EventEdit};

use crate::amplitude::ma_to_device_units;
use crate::builder::StimDefaults;

/// Sync signal shared by every schedule the controller creates.
pub const SYNC_SIGNAL: u8 = 0xAA;

/// Spacing between the events of neighbouring channels, in milliseconds.
const EVENT_STAGGER_MS: u8 = 2;

/// One queued, reply-awaited configuration command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupStep {
    pub command: Command,
    /// Short description used in logs and events.
    pub label: String,
}

impl SetupStep {
    pub fn new(command: Command, label: impl Into<String>) -> Self {
        SetupStep {
            command,
            label: label.into(),
        }
    }
}

/// Snapshot of one target's step list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupProgress {
    pub target: Target,
    /// Labels of every step appended since the list was last cleared.
    pub labels: Vec<String>,
    /// Number of steps that completed.
    pub completed: usize,
}

impl SetupProgress {
    pub fn is_done(&self) -> bool {
        self.completed == self.labels.len()
    }
}

struct TargetSteps {
    target: Target,
    steps: Vec<SetupStep>,
    cursor: usize,
}

/// Per-target step lists in target order.
pub(crate) struct SetupQueue {
    lists: Vec<TargetSteps>,
    /// Bumped by every [`clear`](Self::clear).
    epoch: u64,
}

impl SetupQueue {
    pub fn new(targets: &[Target]) -> Self {
        SetupQueue {
            lists: targets
                .iter()
                .map(|&target| TargetSteps {
                    target,
                    steps: Vec::new(),
                    cursor: 0,
                })
                .collect(),
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn list_mut(&mut self, target: Target) -> Option<&mut TargetSteps> {
        self.lists.iter_mut().find(|l| l.target == target)
    }

    /// Append `step` to `target`'s list. Unknown targets are ignored.
    pub fn push(&mut self, target: Target, step: SetupStep) -> bool {
        match self.list_mut(target) {
            Some(list) => {
                list.steps.push(step);
                true
            }
            None => false,
        }
    }

    /// The next pending step, first target first.
    pub fn next(&self) -> Option<(Target, SetupStep)> {
        self.lists.iter().find_map(|l| {
            l.steps.get(l.cursor).map(|step| (l.target, step.clone()))
        })
    }

    /// Mark the current step of `target` as done.
    pub fn advance(&mut self, target: Target) {
        if let Some(list) = self.list_mut(target) {
            if list.cursor < list.steps.len() {
                list.cursor += 1;
            }
        }
    }

    pub fn is_drained(&self) -> bool {
        self.lists.iter().all(|l| l.cursor >= l.steps.len())
    }

    /// The state the last not-yet-completed on/off switch of `target`
    /// will leave the unit in, if one is queued.
    pub fn pending_switch(&self, target: Target) -> Option<bool> {
        let list = self.lists.iter().find(|l| l.target == target)?;
        list.steps[list.cursor..]
            .iter()
            .rev()
            .find(|s| s.command.id == CommandId::StimulationSwitch)
            .map(|s| s.command.data.first() == Some(&1))
    }

    pub fn pending(&self) -> usize {
        self.lists.iter().map(|l| l.steps.len() - l.cursor).sum()
    }

    /// Drop every list's steps and rewind the cursors.
    pub fn clear(&mut self) {
        for list in &mut self.lists {
            list.steps.clear();
            list.cursor = 0;
        }
        self.epoch += 1;
    }

    pub fn progress(&self, target: Target) -> Option<SetupProgress> {
        self.lists.iter().find(|l| l.target == target).map(|l| SetupProgress {
            target,
            labels: l.steps.iter().map(|s| s.label.clone()).collect(),
            completed: l.cursor,
        })
    }
}

/// The initial configuration of one unit.
///
/// Clears the unit, then builds schedule, contact configuration and event
/// for each channel before synchronizing the group and starting it.
pub fn default_sequence(defaults: &StimDefaults) -> Result<Vec<SetupStep>> {
    let amplitude = ma_to_device_units(defaults.amplitude_ma);
    let mut steps = vec![SetupStep::new(commands::cmd_clear(), "clear")];

    for ch in 1..=CHANNELS_PER_UNIT as u8 {
        let event = EventConfig {
            id: ch,
            delay_ms: (ch - 1) * EVENT_STAGGER_MS,
            contact: ch,
            stim_shape: defaults.stim_shape,
            recharge_shape: defaults.recharge_shape,
            stim_amplitude: amplitude,
            recharge_amplitude: amplitude,
            stim_pw_us: u32::from(defaults.pulse_width_us),
            ipd_us: u32::from(defaults.ipd_us),
            recharge_pw_us: u32::from(defaults.pulse_width_us),
        };
        steps.push(SetupStep::new(
            commands::cmd_create_schedule(ch, SYNC_SIGNAL, u32::from(defaults.ipi_ms))?,
            format!("create schedule {ch}"),
        ));
        steps.push(SetupStep::new(
            commands::cmd_create_contact_config(ch, &ContactConfig::bipolar(ch)?)?,
            format!("create contact config {ch}"),
        ));
        steps.push(SetupStep::new(
            commands::cmd_create_event(&event)?,
            format!("create event {ch}"),
        ));
        steps.push(SetupStep::new(
            commands::cmd_edit_event(ch, EventEdit::Ratio(defaults.burst_ratio))?,
            format!("set burst ratio {ch}"),
        ));
        steps.push(SetupStep::new(
            commands::cmd_add_event_to_schedule(ch, ch)?,
            format!("add event {ch} to schedule {ch}"),
        ));
    }

    steps.push(SetupStep::new(commands::cmd_sync_group(SYNC_SIGNAL), "sync group"));
    steps.push(SetupStep::new(
        commands::cmd_stimulation_switch(true),
        "start stimulation",
    ));
    Ok(steps)
}
