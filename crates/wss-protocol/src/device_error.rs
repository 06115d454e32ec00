//! Device error replies.
//!
//! When the stimulator refuses a command it answers with an Error (0x05)
//! frame instead of the expected reply:
//!
//! ```text
//! <unit> <host> 0x05 <len> <code> <offending cmd> [...] <checksum>
//! ```
//!
//! The reply is routed to the waiter of the offending command so the
//! original caller sees the failure.

use wss_core::{CommandId, DeviceError};

use crate::frame::Frame;

/// Describe a device error code.
pub fn describe(code: u8) -> &'static str {
    match code {
        0x00 => "No Error",
        0x01 => "Communication Error",
        0x02 => "Wrong Receiver",
        0x03 => "Checksum Error",
        0x04 => "Command Error",
        0x05 => "Parameters Error",
        0x06 => "No Setup",
        0x07 => "Incompatible",
        0x0B => "No Schedule",
        0x0C => "No Event",
        0x0D => "No Memory",
        0x0E => "Not Event",
        0x0F => "Delay Too Long",
        0x10 => "Wrong Schedule",
        0x11 => "Duration Too Short",
        0x12 => "Fault",
        0x15 => "Unfinished Event",
        0x16 => "Invalid Timing",
        0x17 => "Event Already In Schedule",
        0x18 => "Invalid Shape",
        0x19 => "Bad State",
        0x1A => "Invalid Contact",
        0x1B => "Contact In Use",
        0x80 => "Battery Low",
        0x81 => "Stimulation Not Allowed",
        _ => "Unknown error",
    }
}

/// Outcome of inspecting a frame for an error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorEnvelope {
    /// Not an Error frame.
    NotError,
    /// An Error frame too short to name a code and command.
    Truncated,
    /// A complete device error.
    Error(DeviceError),
}

/// Inspect `frame` for a device error envelope.
pub fn parse_error_frame(frame: &Frame) -> ErrorEnvelope {
    if frame.command() != Some(CommandId::Error.as_byte()) {
        return ErrorEnvelope::NotError;
    }
    match frame.data() {
        [code, command, ..] => ErrorEnvelope::Error(DeviceError {
            code: *code,
            command: *command,
            description: describe(*code),
        }),
        _ => ErrorEnvelope::Truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_known_codes() {
        assert_eq!(describe(0x02), "Wrong Receiver");
        assert_eq!(describe(0x03), "Checksum Error");
        assert_eq!(describe(0x0D), "No Memory");
        assert_eq!(describe(0x19), "Bad State");
        assert_eq!(describe(0x81), "Stimulation Not Allowed");
    }

    #[test]
    fn describe_unknown_code() {
        assert_eq!(describe(0x42), "Unknown error");
        assert_eq!(describe(0xFF), "Unknown error");
    }

    #[test]
    fn parse_complete_error() {
        let frame = Frame::new(0x81, 0x00, &[0x05, 0x02, 0x19, 0x44]);
        assert_eq!(
            parse_error_frame(&frame),
            ErrorEnvelope::Error(DeviceError {
                code: 0x19,
                command: 0x44,
                description: "Bad State",
            })
        );
    }

    #[test]
    fn parse_error_with_trailing_bytes() {
        let frame = Frame::new(0x81, 0x00, &[0x05, 0x03, 0x0D, 0x4A, 0x01]);
        match parse_error_frame(&frame) {
            ErrorEnvelope::Error(e) => {
                assert_eq!(e.code, 0x0D);
                assert_eq!(e.command, 0x4A);
            }
            other => panic!("expected error envelope, got {other:?}"),
        }
    }

    #[test]
    fn parse_truncated_error() {
        let frame = Frame::new(0x81, 0x00, &[0x05, 0x01, 0x19]);
        assert_eq!(parse_error_frame(&frame), ErrorEnvelope::Truncated);
        let frame = Frame::new(0x81, 0x00, &[0x05]);
        assert_eq!(parse_error_frame(&frame), ErrorEnvelope::Truncated);
    }

    #[test]
    fn parse_non_error_frame() {
        let frame = Frame::new(0x81, 0x00, &[0x44, 0x00]);
        assert_eq!(parse_error_frame(&frame), ErrorEnvelope::NotError);
    }
}
