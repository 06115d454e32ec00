//! Core types shared by every layer of the WSS stack.
//!
//! These are the protocol-level vocabulary: device addresses ([`Target`]),
//! command opcodes ([`CommandId`]) and the controller lifecycle
//! ([`ControllerState`]). All wire values are fixed one-byte constants.

use std::fmt;

/// Address byte the host uses as `sender` on every outgoing frame.
pub const HOST_ADDR: u8 = 0x00;

/// Number of stimulation channels on a single WSS unit.
pub const CHANNELS_PER_UNIT: usize = 3;

/// Device address on the WSS bus.
///
/// A target is a routing key, not an owner: every frame names one as its
/// destination and replies name one as their sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    /// All units on the bus.
    Broadcast,
    /// First stimulation unit.
    Unit1,
    /// Second stimulation unit.
    Unit2,
    /// Third stimulation unit.
    Unit3,
}

impl Target {
    /// The individually addressable units, in bus order.
    pub const UNITS: [Target; 3] = [Target::Unit1, Target::Unit2, Target::Unit3];

    /// Wire value of this address.
    pub fn as_byte(self) -> u8 {
        match self {
            Target::Broadcast => 0x8F,
            Target::Unit1 => 0x81,
            Target::Unit2 => 0x82,
            Target::Unit3 => 0x83,
        }
    }

    /// Parse a wire address. Returns `None` for bytes that are not a WSS
    /// device address (including [`HOST_ADDR`]).
    pub fn from_byte(b: u8) -> Option<Target> {
        match b {
            0x8F => Some(Target::Broadcast),
            0x81 => Some(Target::Unit1),
            0x82 => Some(Target::Unit2),
            0x83 => Some(Target::Unit3),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Target::Broadcast => "Broadcast",
            Target::Unit1 => "Unit1",
            Target::Unit2 => "Unit2",
            Target::Unit3 => "Unit3",
        };
        write!(f, "{s}")
    }
}

/// Command opcode: the first byte of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    ModuleQuery,
    RequestAnalog,
    Reset,
    Error,
    Echo,
    BoardCommands,
    StimulationSwitch,
    StreamChangeAll,
    StreamChangeNoIpi,
    StreamChangeNoPw,
    StreamChangeNoPa,
    Clear,
    RequestConfig,
    CreateContactConfig,
    DeleteContactConfig,
    CreateEvent,
    DeleteEvent,
    AddEventToSchedule,
    RemoveEventFromSchedule,
    MoveEventToSchedule,
    EditEventConfig,
    CreateSchedule,
    DeleteSchedule,
    SyncGroup,
    ChangeGroupState,
    ChangeScheduleConfig,
    ResetSchedule,
    CustomWaveform,
}

impl CommandId {
    /// Wire value of this opcode.
    pub fn as_byte(self) -> u8 {
        match self {
            CommandId::ModuleQuery => 0x01,
            CommandId::RequestAnalog => 0x02,
            CommandId::Reset => 0x04,
            CommandId::Error => 0x05,
            CommandId::Echo => 0x07,
            CommandId::BoardCommands => 0x09,
            CommandId::StimulationSwitch => 0x0B,
            CommandId::StreamChangeAll => 0x30,
            CommandId::StreamChangeNoIpi => 0x31,
            CommandId::StreamChangeNoPw => 0x32,
            CommandId::StreamChangeNoPa => 0x33,
            CommandId::Clear => 0x40,
            CommandId::RequestConfig => 0x41,
            CommandId::CreateContactConfig => 0x42,
            CommandId::DeleteContactConfig => 0x43,
            CommandId::CreateEvent => 0x44,
            CommandId::DeleteEvent => 0x45,
            CommandId::AddEventToSchedule => 0x46,
            CommandId::RemoveEventFromSchedule => 0x47,
            CommandId::MoveEventToSchedule => 0x48,
            CommandId::EditEventConfig => 0x49,
            CommandId::CreateSchedule => 0x4A,
            CommandId::DeleteSchedule => 0x4B,
            CommandId::SyncGroup => 0x4C,
            CommandId::ChangeGroupState => 0x4D,
            CommandId::ChangeScheduleConfig => 0x4E,
            CommandId::ResetSchedule => 0x4F,
            CommandId::CustomWaveform => 0x9D,
        }
    }

    /// Parse an opcode byte. Returns `None` for unknown opcodes.
    pub fn from_byte(b: u8) -> Option<CommandId> {
        let id = match b {
            0x01 => CommandId::ModuleQuery,
            0x02 => CommandId::RequestAnalog,
            0x04 => CommandId::Reset,
            0x05 => CommandId::Error,
            0x07 => CommandId::Echo,
            0x09 => CommandId::BoardCommands,
            0x0B => CommandId::StimulationSwitch,
            0x30 => CommandId::StreamChangeAll,
            0x31 => CommandId::StreamChangeNoIpi,
            0x32 => CommandId::StreamChangeNoPw,
            0x33 => CommandId::StreamChangeNoPa,
            0x40 => CommandId::Clear,
            0x41 => CommandId::RequestConfig,
            0x42 => CommandId::CreateContactConfig,
            0x43 => CommandId::DeleteContactConfig,
            0x44 => CommandId::CreateEvent,
            0x45 => CommandId::DeleteEvent,
            0x46 => CommandId::AddEventToSchedule,
            0x47 => CommandId::RemoveEventFromSchedule,
            0x48 => CommandId::MoveEventToSchedule,
            0x49 => CommandId::EditEventConfig,
            0x4A => CommandId::CreateSchedule,
            0x4B => CommandId::DeleteSchedule,
            0x4C => CommandId::SyncGroup,
            0x4D => CommandId::ChangeGroupState,
            0x4E => CommandId::ChangeScheduleConfig,
            0x4F => CommandId::ResetSchedule,
            0x9D => CommandId::CustomWaveform,
            _ => return None,
        };
        Some(id)
    }

    /// Returns `true` for the streaming opcodes, which the device never
    /// acknowledges in a way the host waits for.
    pub fn is_stream_update(self) -> bool {
        matches!(
            self,
            CommandId::StreamChangeAll
                | CommandId::StreamChangeNoIpi
                | CommandId::StreamChangeNoPw
                | CommandId::StreamChangeNoPa
        )
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug names already read well ("CreateEvent", "SyncGroup").
        write!(f, "{self:?}")
    }
}

/// Render an opcode byte for logs and error messages, named when known.
pub fn command_name(b: u8) -> String {
    match CommandId::from_byte(b) {
        Some(id) => format!("{id} (0x{b:02X})"),
        None => format!("unknown command 0x{b:02X}"),
    }
}

/// Lifecycle state of a device controller.
///
/// ```text
/// Disconnected -> Connecting -> SettingUp -> Ready -> Started -> Streaming
///                                   ^                               |
///                                   +------- configuration edit ----+
/// any failure -> Error -> (explicit initialize) -> Disconnected -> ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Disconnected,
    Connecting,
    SettingUp,
    Ready,
    Started,
    Streaming,
    Error,
}

impl ControllerState {
    /// Returns `true` while a transport connection is held.
    pub fn is_connected(self) -> bool {
        !matches!(self, ControllerState::Disconnected | ControllerState::Error)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
