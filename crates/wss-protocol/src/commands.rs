//! WSS command builders and reply parsers.
//!
//! This module constructs the payload of every WSS command: the opcode, the
//! length byte, and the data section laid out field by field. All functions
//! are pure; [`crate::client::ProtocolClient`] frames and sends the result.
//!
//! Builders validate their parameters before producing anything and fail
//! with [`Error::InvalidParameter`] naming the offending field.
//!
//! # Field widths
//!
//! Timing fields (pulse widths, inter-phase delay, periods, waveform points)
//! are written as a group. If every value of the group fits in one byte the
//! group is written with one byte per value; otherwise every value of the
//! group is written as a 16-bit big-endian word. The device tells the two
//! apart by the payload length byte.

use wss_core::{CommandId, Error, Result};

use crate::frame::MAX_DATA_LEN;

/// Maximum number of points carried by one custom-waveform chunk.
pub const WAVEFORM_CHUNK_POINTS: usize = 8;

/// Number of custom waveform slots on the device.
pub const WAVEFORM_SLOTS: u8 = 3;

/// Number of electrodes addressed by a contact configuration.
pub const ELECTRODES: usize = 4;

/// A command ready to be framed: opcode plus data section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Opcode.
    pub id: CommandId,
    /// Data bytes following the length byte.
    pub data: Vec<u8>,
}

impl Command {
    /// Build a command, checking the data fits behind a one-byte length.
    pub fn new(id: CommandId, data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_DATA_LEN {
            return Err(Error::InvalidParameter(format!(
                "{id} data length {} exceeds {MAX_DATA_LEN}",
                data.len()
            )));
        }
        Ok(Command { id, data })
    }

    /// Payload bytes: `[cmd][len][data...]`.
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.push(self.id.as_byte());
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
        out
    }

    // Builders below construct data sections no longer than a few dozen
    // bytes, so they skip the length check.
    fn short(id: CommandId, data: Vec<u8>) -> Self {
        Command { id, data }
    }
}

// ---------------------------------------------------------------
// Parameter types
// ---------------------------------------------------------------

/// Role of one electrode during a stimulation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElectrodeRole {
    #[default]
    Off,
    Source,
    Sink,
}

impl ElectrodeRole {
    fn bits(self) -> u8 {
        match self {
            ElectrodeRole::Off => 0b00,
            ElectrodeRole::Source => 0b01,
            ElectrodeRole::Sink => 0b10,
        }
    }
}

/// Electrode routing for the stimulation and recharge phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContactConfig {
    pub stim: [ElectrodeRole; ELECTRODES],
    pub recharge: [ElectrodeRole; ELECTRODES],
}

impl ContactConfig {
    /// Bipolar routing for a logical channel: electrode `channel` sources
    /// during stimulation and sinks during recharge, with the common return
    /// electrode doing the opposite.
    ///
    /// `channel` is 1-based and must be 1..=3; electrode 4 is the return.
    pub fn bipolar(channel: u8) -> Result<Self> {
        if !(1..=3).contains(&channel) {
            return Err(Error::InvalidParameter(format!(
                "channel {channel} out of range 1..=3"
            )));
        }
        let idx = usize::from(channel - 1);
        let mut cfg = ContactConfig::default();
        cfg.stim[idx] = ElectrodeRole::Source;
        cfg.stim[ELECTRODES - 1] = ElectrodeRole::Sink;
        cfg.recharge[idx] = ElectrodeRole::Sink;
        cfg.recharge[ELECTRODES - 1] = ElectrodeRole::Source;
        Ok(cfg)
    }
}

/// Pack electrode roles two bits apiece, electrode 1 in the low bits.
fn pack_roles(roles: &[ElectrodeRole; ELECTRODES]) -> u8 {
    roles
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, r)| acc | (r.bits() << (2 * i)))
}

/// Parameters of a stimulation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventConfig {
    /// Event id (non-zero).
    pub id: u8,
    /// Delay from the schedule tick, in milliseconds.
    pub delay_ms: u8,
    /// Contact configuration id the event fires through.
    pub contact: u8,
    /// Waveform shape of the stimulation phase.
    pub stim_shape: u8,
    /// Waveform shape of the recharge phase.
    pub recharge_shape: u8,
    /// Stimulation amplitude in device units.
    pub stim_amplitude: u8,
    /// Recharge amplitude in device units.
    pub recharge_amplitude: u8,
    /// Stimulation pulse width in microseconds.
    pub stim_pw_us: u32,
    /// Gap between the phases in microseconds.
    pub ipd_us: u32,
    /// Recharge pulse width in microseconds.
    pub recharge_pw_us: u32,
}

/// A single change to an existing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventEdit {
    Delay(u8),
    Shape { stim: u8, recharge: u8 },
    Amplitude { stim: u8, recharge: u8 },
    PulseWidth { stim_us: u32, recharge_us: u32 },
    InterPhaseDelay(u32),
    /// Stimulation-to-recharge amplitude ratio (burst ratio).
    Ratio(u8),
}

impl EventEdit {
    fn code(&self) -> u8 {
        match self {
            EventEdit::Delay(_) => 0x00,
            EventEdit::Shape { .. } => 0x01,
            EventEdit::Amplitude { .. } => 0x02,
            EventEdit::PulseWidth { .. } => 0x03,
            EventEdit::InterPhaseDelay(_) => 0x04,
            EventEdit::Ratio(_) => 0x05,
        }
    }
}

/// Group state for [`cmd_change_group_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Stop,
    Start,
}

/// Sub-commands of BoardCommands (0x09).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardCommand {
    SaveSettings,
    LoadSettings,
    Battery,
    Version,
}

impl BoardCommand {
    fn as_byte(self) -> u8 {
        match self {
            BoardCommand::SaveSettings => 0x01,
            BoardCommand::LoadSettings => 0x02,
            BoardCommand::Battery => 0x03,
            BoardCommand::Version => 0x04,
        }
    }
}

/// Configuration block kinds readable with RequestConfig (0x41).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigBlock {
    ContactConfig,
    Event,
    Schedule,
}

impl ConfigBlock {
    fn as_byte(self) -> u8 {
        match self {
            ConfigBlock::ContactConfig => 0x00,
            ConfigBlock::Event => 0x01,
            ConfigBlock::Schedule => 0x02,
        }
    }
}

/// Which value groups a streaming update carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamVariant {
    /// Amplitude, pulse width and inter-pulse interval.
    All,
    /// Amplitude and pulse width.
    NoIpi,
    /// Amplitude and inter-pulse interval.
    NoPw,
    /// Pulse width and inter-pulse interval.
    NoPa,
}

impl StreamVariant {
    pub fn command_id(self) -> CommandId {
        match self {
            StreamVariant::All => CommandId::StreamChangeAll,
            StreamVariant::NoIpi => CommandId::StreamChangeNoIpi,
            StreamVariant::NoPw => CommandId::StreamChangeNoPw,
            StreamVariant::NoPa => CommandId::StreamChangeNoPa,
        }
    }
}

/// Drive values for one channel of a streaming update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelDrive {
    /// Amplitude in device units.
    pub amplitude: u8,
    /// Pulse width in microseconds.
    pub pulse_width: u16,
    /// Inter-pulse interval in milliseconds.
    pub ipi: u16,
}

// ---------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------

fn non_zero(name: &str, value: u8) -> Result<u8> {
    if value == 0 {
        return Err(Error::InvalidParameter(format!("{name} must be non-zero")));
    }
    Ok(value)
}

fn word(name: &str, value: u32) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        Error::InvalidParameter(format!("{name} {value} exceeds {}", u16::MAX))
    })
}

/// Append a group of values, one byte each if all fit, else 16-bit BE each.
fn put_group(out: &mut Vec<u8>, values: &[u16]) {
    if values.iter().all(|&v| v <= u8::MAX as u16) {
        out.extend(values.iter().map(|&v| v as u8));
    } else {
        for v in values {
            out.extend_from_slice(&v.to_be_bytes());
        }
    }
}

// ---------------------------------------------------------------
// Diagnostic and board commands
// ---------------------------------------------------------------

/// ModuleQuery (0x01). Data: `[query]`.
pub fn cmd_module_query(query: u8) -> Command {
    Command::short(CommandId::ModuleQuery, vec![query])
}

/// RequestAnalog (0x02). Data: `[channel]`.
pub fn cmd_request_analog(channel: u8) -> Command {
    Command::short(CommandId::RequestAnalog, vec![channel])
}

/// Reset (0x04). No data.
pub fn cmd_reset() -> Command {
    Command::short(CommandId::Reset, Vec::new())
}

/// Echo (0x07). Data: `[a, b]`, returned verbatim by the device.
pub fn cmd_echo(a: u8, b: u8) -> Command {
    Command::short(CommandId::Echo, vec![a, b])
}

/// BoardCommands (0x09). Data: `[sub]`.
pub fn cmd_board(command: BoardCommand) -> Command {
    Command::short(CommandId::BoardCommands, vec![command.as_byte()])
}

/// StimulationSwitch (0x0B). Data: `[1]` to start, `[0]` to stop.
pub fn cmd_stimulation_switch(on: bool) -> Command {
    Command::short(CommandId::StimulationSwitch, vec![on as u8])
}

// ---------------------------------------------------------------
// Configuration commands
// ---------------------------------------------------------------

/// Clear (0x40). Data: `[0x00]`, erasing every contact, event and schedule.
pub fn cmd_clear() -> Command {
    Command::short(CommandId::Clear, vec![0x00])
}

/// RequestConfig (0x41). Data: `[kind, id]`.
pub fn cmd_request_config(block: ConfigBlock, id: u8) -> Command {
    Command::short(CommandId::RequestConfig, vec![block.as_byte(), id])
}

/// CreateContactConfig (0x42). Data: `[id, stim_roles, recharge_roles]`.
pub fn cmd_create_contact_config(id: u8, config: &ContactConfig) -> Result<Command> {
    let id = non_zero("contact id", id)?;
    Ok(Command::short(
        CommandId::CreateContactConfig,
        vec![id, pack_roles(&config.stim), pack_roles(&config.recharge)],
    ))
}

/// DeleteContactConfig (0x43). Data: `[id]`.
pub fn cmd_delete_contact_config(id: u8) -> Result<Command> {
    let id = non_zero("contact id", id)?;
    Ok(Command::short(CommandId::DeleteContactConfig, vec![id]))
}

/// CreateEvent (0x44).
///
/// Data: `[id, delay, contact, stim_shape, recharge_shape, stim_amp,
/// recharge_amp]` followed by the group `[stim_pw, ipd, recharge_pw]`.
pub fn cmd_create_event(event: &EventConfig) -> Result<Command> {
    let id = non_zero("event id", event.id)?;
    let contact = non_zero("contact id", event.contact)?;
    let timing = [
        word("stim pulse width", event.stim_pw_us)?,
        word("inter-phase delay", event.ipd_us)?,
        word("recharge pulse width", event.recharge_pw_us)?,
    ];

    let mut data = vec![
        id,
        event.delay_ms,
        contact,
        event.stim_shape,
        event.recharge_shape,
        event.stim_amplitude,
        event.recharge_amplitude,
    ];
    put_group(&mut data, &timing);
    Ok(Command::short(CommandId::CreateEvent, data))
}

/// DeleteEvent (0x45). Data: `[id]`.
pub fn cmd_delete_event(id: u8) -> Result<Command> {
    let id = non_zero("event id", id)?;
    Ok(Command::short(CommandId::DeleteEvent, vec![id]))
}

/// AddEventToSchedule (0x46). Data: `[event, schedule]`.
pub fn cmd_add_event_to_schedule(event: u8, schedule: u8) -> Result<Command> {
    let event = non_zero("event id", event)?;
    let schedule = non_zero("schedule id", schedule)?;
    Ok(Command::short(
        CommandId::AddEventToSchedule,
        vec![event, schedule],
    ))
}

/// RemoveEventFromSchedule (0x47). Data: `[event, schedule]`.
pub fn cmd_remove_event_from_schedule(event: u8, schedule: u8) -> Result<Command> {
    let event = non_zero("event id", event)?;
    let schedule = non_zero("schedule id", schedule)?;
    Ok(Command::short(
        CommandId::RemoveEventFromSchedule,
        vec![event, schedule],
    ))
}

/// MoveEventToSchedule (0x48). Data: `[event, schedule, delay]`.
pub fn cmd_move_event_to_schedule(event: u8, schedule: u8, delay_ms: u8) -> Result<Command> {
    let event = non_zero("event id", event)?;
    let schedule = non_zero("schedule id", schedule)?;
    Ok(Command::short(
        CommandId::MoveEventToSchedule,
        vec![event, schedule, delay_ms],
    ))
}

/// EditEventConfig (0x49). Data: `[event, edit_code, values...]`.
pub fn cmd_edit_event(event: u8, edit: EventEdit) -> Result<Command> {
    let event = non_zero("event id", event)?;
    let mut data = vec![event, edit.code()];
    match edit {
        EventEdit::Delay(d) => data.push(d),
        EventEdit::Shape { stim, recharge } | EventEdit::Amplitude { stim, recharge } => {
            data.push(stim);
            data.push(recharge);
        }
        EventEdit::PulseWidth {
            stim_us,
            recharge_us,
        } => {
            let group = [
                word("stim pulse width", stim_us)?,
                word("recharge pulse width", recharge_us)?,
            ];
            put_group(&mut data, &group);
        }
        EventEdit::InterPhaseDelay(us) => {
            put_group(&mut data, &[word("inter-phase delay", us)?]);
        }
        EventEdit::Ratio(r) => data.push(non_zero("burst ratio", r)?),
    }
    Ok(Command::short(CommandId::EditEventConfig, data))
}

fn schedule_data(id: u8, sync: u8, period_ms: u32) -> Result<Vec<u8>> {
    let id = non_zero("schedule id", id)?;
    let period = word("schedule period", period_ms)?;
    if period == 0 {
        return Err(Error::InvalidParameter(
            "schedule period must be non-zero".into(),
        ));
    }
    let mut data = vec![id, sync];
    put_group(&mut data, &[period]);
    Ok(data)
}

/// CreateSchedule (0x4A). Data: `[id, sync, period]`.
pub fn cmd_create_schedule(id: u8, sync: u8, period_ms: u32) -> Result<Command> {
    Ok(Command::short(
        CommandId::CreateSchedule,
        schedule_data(id, sync, period_ms)?,
    ))
}

/// DeleteSchedule (0x4B). Data: `[id]`.
pub fn cmd_delete_schedule(id: u8) -> Result<Command> {
    let id = non_zero("schedule id", id)?;
    Ok(Command::short(CommandId::DeleteSchedule, vec![id]))
}

/// SyncGroup (0x4C). Data: `[sync]`.
pub fn cmd_sync_group(sync: u8) -> Command {
    Command::short(CommandId::SyncGroup, vec![sync])
}

/// ChangeGroupState (0x4D). Data: `[sync, state]`.
pub fn cmd_change_group_state(sync: u8, state: GroupState) -> Command {
    let state = match state {
        GroupState::Stop => 0x00,
        GroupState::Start => 0x01,
    };
    Command::short(CommandId::ChangeGroupState, vec![sync, state])
}

/// ChangeScheduleConfig (0x4E). Data: `[id, sync, period]`.
pub fn cmd_change_schedule_config(id: u8, sync: u8, period_ms: u32) -> Result<Command> {
    Ok(Command::short(
        CommandId::ChangeScheduleConfig,
        schedule_data(id, sync, period_ms)?,
    ))
}

/// ResetSchedule (0x4F). Data: `[id]`.
pub fn cmd_reset_schedule(id: u8) -> Result<Command> {
    let id = non_zero("schedule id", id)?;
    Ok(Command::short(CommandId::ResetSchedule, vec![id]))
}

/// CustomWaveform (0x9D). Data: `[slot, chunk, points...]`.
///
/// A chunk carries 1..=8 points, width-selected as one group.
pub fn cmd_custom_waveform(slot: u8, chunk: u8, points: &[u16]) -> Result<Command> {
    if slot >= WAVEFORM_SLOTS {
        return Err(Error::InvalidParameter(format!(
            "waveform slot {slot} out of range 0..{WAVEFORM_SLOTS}"
        )));
    }
    if points.is_empty() || points.len() > WAVEFORM_CHUNK_POINTS {
        return Err(Error::InvalidParameter(format!(
            "waveform chunk holds {} points, expected 1..={WAVEFORM_CHUNK_POINTS}",
            points.len()
        )));
    }
    let mut data = vec![slot, chunk];
    put_group(&mut data, points);
    Ok(Command::short(CommandId::CustomWaveform, data))
}

// ---------------------------------------------------------------
// Streaming updates
// ---------------------------------------------------------------

/// Streaming update (0x30..=0x33) for the three channels of one unit.
///
/// Values are grouped by kind (all amplitudes, then all pulse widths, then
/// all intervals), skipping the kinds `variant` omits. Width selection
/// applies to the whole message.
pub fn cmd_stream(variant: StreamVariant, channels: &[ChannelDrive; 3]) -> Command {
    let amps = channels.map(|c| c.amplitude as u16);
    let pws = channels.map(|c| c.pulse_width);
    let ipis = channels.map(|c| c.ipi);

    let groups: Vec<&[u16; 3]> = match variant {
        StreamVariant::All => vec![&amps, &pws, &ipis],
        StreamVariant::NoIpi => vec![&amps, &pws],
        StreamVariant::NoPw => vec![&amps, &ipis],
        StreamVariant::NoPa => vec![&pws, &ipis],
    };
    let values: Vec<u16> = groups.into_iter().flatten().copied().collect();

    let mut data = Vec::with_capacity(values.len() * 2);
    put_group(&mut data, &values);
    Command::short(variant.command_id(), data)
}

// ---------------------------------------------------------------
// Reply parsers
// ---------------------------------------------------------------

/// Parse a StimulationSwitch reply: `true` if stimulation is running.
pub fn parse_switch_reply(data: &[u8]) -> Result<bool> {
    match data.first() {
        Some(&b) => Ok(b != 0),
        None => Err(Error::Protocol(
            "empty stimulation switch reply".into(),
        )),
    }
}

/// Parse a battery reply (BoardCommands / Battery): millivolts, big-endian.
pub fn parse_battery_reply(data: &[u8]) -> Result<u16> {
    match data {
        [_, hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(Error::Protocol(format!(
            "battery reply too short: {} bytes",
            data.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> EventConfig {
        EventConfig {
            id: 1,
            delay_ms: 0,
            contact: 1,
            stim_shape: 0,
            recharge_shape: 0,
            stim_amplitude: 0,
            recharge_amplitude: 0,
            stim_pw_us: 50,
            ipd_us: 10,
            recharge_pw_us: 50,
        }
    }

    // ---------------------------------------------------------------
    // Payload envelope
    // ---------------------------------------------------------------

    #[test]
    fn payload_has_opcode_and_length() {
        let cmd = cmd_echo(0x11, 0x22);
        assert_eq!(cmd.payload(), vec![0x07, 0x02, 0x11, 0x22]);
    }

    #[test]
    fn payload_of_empty_command() {
        assert_eq!(cmd_reset().payload(), vec![0x04, 0x00]);
    }

    #[test]
    fn command_new_rejects_oversized_data() {
        let err = Command::new(CommandId::Echo, vec![0; 256]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(Command::new(CommandId::Echo, vec![0; 255]).is_ok());
    }

    // ---------------------------------------------------------------
    // Simple commands
    // ---------------------------------------------------------------

    #[test]
    fn clear_bytes() {
        assert_eq!(cmd_clear().payload(), vec![0x40, 0x01, 0x00]);
    }

    #[test]
    fn stimulation_switch_bytes() {
        assert_eq!(cmd_stimulation_switch(true).payload(), vec![0x0B, 0x01, 0x01]);
        assert_eq!(cmd_stimulation_switch(false).payload(), vec![0x0B, 0x01, 0x00]);
    }

    #[test]
    fn board_command_bytes() {
        assert_eq!(cmd_board(BoardCommand::SaveSettings).data, vec![0x01]);
        assert_eq!(cmd_board(BoardCommand::LoadSettings).data, vec![0x02]);
        assert_eq!(cmd_board(BoardCommand::Battery).data, vec![0x03]);
        assert_eq!(cmd_board(BoardCommand::Version).id, CommandId::BoardCommands);
    }

    #[test]
    fn request_config_bytes() {
        let cmd = cmd_request_config(ConfigBlock::Event, 2);
        assert_eq!(cmd.payload(), vec![0x41, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn sync_and_group_state_bytes() {
        assert_eq!(cmd_sync_group(0xAA).payload(), vec![0x4C, 0x01, 0xAA]);
        assert_eq!(
            cmd_change_group_state(0xAA, GroupState::Start).payload(),
            vec![0x4D, 0x02, 0xAA, 0x01]
        );
    }

    // ---------------------------------------------------------------
    // Contact configuration
    // ---------------------------------------------------------------

    #[test]
    fn contact_config_packs_roles() {
        let cfg = ContactConfig::bipolar(1).unwrap();
        // stim: e1=Source(01), e4=Sink(10) -> 0b10_00_00_01
        // recharge: e1=Sink(10), e4=Source(01) -> 0b01_00_00_10
        let cmd = cmd_create_contact_config(1, &cfg).unwrap();
        assert_eq!(cmd.payload(), vec![0x42, 0x03, 0x01, 0x81, 0x42]);
    }

    #[test]
    fn contact_config_channel_three() {
        let cfg = ContactConfig::bipolar(3).unwrap();
        let cmd = cmd_create_contact_config(3, &cfg).unwrap();
        // stim: e3=Source(01<<4), e4=Sink(10<<6) -> 0x90
        // recharge: e3=Sink(10<<4), e4=Source(01<<6) -> 0x60
        assert_eq!(cmd.data, vec![0x03, 0x90, 0x60]);
    }

    #[test]
    fn contact_config_rejects_bad_channel() {
        assert!(ContactConfig::bipolar(0).is_err());
        assert!(ContactConfig::bipolar(4).is_err());
    }

    #[test]
    fn contact_config_rejects_zero_id() {
        let err = cmd_create_contact_config(0, &ContactConfig::default()).unwrap_err();
        assert!(err.to_string().contains("contact id"));
    }

    // ---------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------

    #[test]
    fn create_event_single_byte_timing() {
        let cmd = cmd_create_event(&EventConfig {
            stim_amplitude: 0x20,
            recharge_amplitude: 0x20,
            ..event()
        })
        .unwrap();
        assert_eq!(
            cmd.payload(),
            vec![0x44, 0x0A, 0x01, 0x00, 0x01, 0x00, 0x00, 0x20, 0x20, 50, 10, 50]
        );
    }

    #[test]
    fn create_event_wide_timing_widens_whole_group() {
        let cmd = cmd_create_event(&EventConfig {
            stim_pw_us: 300,
            ..event()
        })
        .unwrap();
        assert_eq!(cmd.data.len(), 7 + 6);
        assert_eq!(&cmd.data[7..], &[0x01, 0x2C, 0x00, 0x0A, 0x00, 0x32]);
        assert_eq!(cmd.payload()[1], 13);
    }

    #[test]
    fn create_event_rejects_out_of_range_pulse_width() {
        let err = cmd_create_event(&EventConfig {
            recharge_pw_us: 70_000,
            ..event()
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid parameter: recharge pulse width 70000 exceeds 65535"
        );
    }

    #[test]
    fn create_event_rejects_zero_id() {
        let err = cmd_create_event(&EventConfig { id: 0, ..event() }).unwrap_err();
        assert!(err.to_string().contains("event id"));
    }

    #[test]
    fn edit_event_variants() {
        assert_eq!(
            cmd_edit_event(2, EventEdit::Delay(5)).unwrap().data,
            vec![2, 0x00, 5]
        );
        assert_eq!(
            cmd_edit_event(2, EventEdit::Amplitude { stim: 9, recharge: 9 })
                .unwrap()
                .data,
            vec![2, 0x02, 9, 9]
        );
        assert_eq!(
            cmd_edit_event(2, EventEdit::PulseWidth { stim_us: 100, recharge_us: 400 })
                .unwrap()
                .data,
            vec![2, 0x03, 0x00, 0x64, 0x01, 0x90]
        );
        assert_eq!(
            cmd_edit_event(2, EventEdit::InterPhaseDelay(20)).unwrap().data,
            vec![2, 0x04, 20]
        );
        assert_eq!(
            cmd_edit_event(2, EventEdit::Ratio(8)).unwrap().data,
            vec![2, 0x05, 8]
        );
    }

    #[test]
    fn edit_event_rejects_zero_ratio() {
        let err = cmd_edit_event(1, EventEdit::Ratio(0)).unwrap_err();
        assert!(err.to_string().contains("burst ratio"));
    }

    #[test]
    fn schedule_membership_bytes() {
        assert_eq!(
            cmd_add_event_to_schedule(1, 2).unwrap().payload(),
            vec![0x46, 0x02, 0x01, 0x02]
        );
        assert_eq!(
            cmd_move_event_to_schedule(1, 2, 7).unwrap().payload(),
            vec![0x48, 0x03, 0x01, 0x02, 0x07]
        );
        assert!(cmd_remove_event_from_schedule(1, 0).is_err());
    }

    // ---------------------------------------------------------------
    // Schedules
    // ---------------------------------------------------------------

    #[test]
    fn create_schedule_short_period() {
        let cmd = cmd_create_schedule(1, 0xAA, 50).unwrap();
        assert_eq!(cmd.payload(), vec![0x4A, 0x03, 0x01, 0xAA, 50]);
    }

    #[test]
    fn create_schedule_long_period() {
        let cmd = cmd_create_schedule(1, 0xAA, 1000).unwrap();
        assert_eq!(cmd.payload(), vec![0x4A, 0x04, 0x01, 0xAA, 0x03, 0xE8]);
    }

    #[test]
    fn change_schedule_config_matches_create_layout() {
        let create = cmd_create_schedule(3, 0xAA, 300).unwrap();
        let change = cmd_change_schedule_config(3, 0xAA, 300).unwrap();
        assert_eq!(change.id, CommandId::ChangeScheduleConfig);
        assert_eq!(change.data, create.data);
    }

    #[test]
    fn schedule_rejects_bad_period() {
        assert!(cmd_create_schedule(1, 0xAA, 0).is_err());
        let err = cmd_create_schedule(1, 0xAA, 70_000).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid parameter: schedule period 70000 exceeds 65535"
        );
    }

    // ---------------------------------------------------------------
    // Custom waveform
    // ---------------------------------------------------------------

    #[test]
    fn custom_waveform_chunk() {
        let cmd = cmd_custom_waveform(0, 1, &[0, 10, 20, 30]).unwrap();
        assert_eq!(cmd.payload(), vec![0x9D, 0x06, 0x00, 0x01, 0, 10, 20, 30]);
    }

    #[test]
    fn custom_waveform_wide_points() {
        let cmd = cmd_custom_waveform(2, 0, &[0x0100, 0x0001]).unwrap();
        assert_eq!(cmd.data, vec![0x02, 0x00, 0x01, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn custom_waveform_validation() {
        assert!(cmd_custom_waveform(WAVEFORM_SLOTS, 0, &[1]).is_err());
        assert!(cmd_custom_waveform(0, 0, &[]).is_err());
        assert!(cmd_custom_waveform(0, 0, &[1; 9]).is_err());
        assert!(cmd_custom_waveform(0, 0, &[1; 8]).is_ok());
    }

    // ---------------------------------------------------------------
    // Streaming
    // ---------------------------------------------------------------

    fn drives() -> [ChannelDrive; 3] {
        [
            ChannelDrive { amplitude: 10, pulse_width: 50, ipi: 20 },
            ChannelDrive { amplitude: 11, pulse_width: 60, ipi: 20 },
            ChannelDrive { amplitude: 12, pulse_width: 70, ipi: 20 },
        ]
    }

    #[test]
    fn stream_all_narrow() {
        let cmd = cmd_stream(StreamVariant::All, &drives());
        assert_eq!(
            cmd.payload(),
            vec![0x30, 0x09, 10, 11, 12, 50, 60, 70, 20, 20, 20]
        );
    }

    #[test]
    fn stream_no_ipi_omits_interval_group() {
        let cmd = cmd_stream(StreamVariant::NoIpi, &drives());
        assert_eq!(cmd.payload(), vec![0x31, 0x06, 10, 11, 12, 50, 60, 70]);
    }

    #[test]
    fn stream_no_pw_and_no_pa() {
        assert_eq!(
            cmd_stream(StreamVariant::NoPw, &drives()).payload(),
            vec![0x32, 0x06, 10, 11, 12, 20, 20, 20]
        );
        assert_eq!(
            cmd_stream(StreamVariant::NoPa, &drives()).payload(),
            vec![0x33, 0x06, 50, 60, 70, 20, 20, 20]
        );
    }

    #[test]
    fn stream_wide_value_widens_whole_message() {
        let mut ch = drives();
        ch[1].pulse_width = 500;
        let cmd = cmd_stream(StreamVariant::NoIpi, &ch);
        assert_eq!(
            cmd.data,
            vec![0, 10, 0, 11, 0, 12, 0x00, 0x32, 0x01, 0xF4, 0x00, 0x46]
        );
    }

    // ---------------------------------------------------------------
    // Reply parsing
    // ---------------------------------------------------------------

    #[test]
    fn parse_switch() {
        assert!(parse_switch_reply(&[0x01]).unwrap());
        assert!(!parse_switch_reply(&[0x00]).unwrap());
        assert!(parse_switch_reply(&[]).is_err());
    }

    #[test]
    fn parse_battery() {
        assert_eq!(parse_battery_reply(&[0x03, 0x0E, 0x74]).unwrap(), 3700);
        assert!(parse_battery_reply(&[0x03]).is_err());
    }
}
