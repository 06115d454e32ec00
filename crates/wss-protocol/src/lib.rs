//! WSS serial protocol for wsslib.
//!
//! This crate implements the host side of the WSS stimulator protocol:
//!
//! - **Frame codec** ([`frame`]) -- escape, checksum and terminate frames,
//!   and decode them incrementally from an unframed byte stream.
//! - **Command builders** ([`commands`]) -- bit-exact payload layouts for
//!   every opcode, with parameter validation.
//! - **Device errors** ([`device_error`]) -- classify Error replies.
//! - **Pending requests** ([`pending`]) -- FIFO reply correlation keyed by
//!   `(target, command)`.
//! - **ProtocolClient** ([`client`]) -- request/response and fire-and-forget
//!   sends over a [`Transport`](wss_core::Transport).
//!
//! # Example
//!
//! ```
//! use wss_protocol::commands::cmd_echo;
//! use wss_protocol::frame::{encode, FrameDecoder};
//!
//! let wire = encode(0x00, 0x81, &cmd_echo(0x11, 0x22).payload());
//! assert_eq!(wire, vec![0x00, 0x81, 0x07, 0x02, 0x11, 0x22, 0x42, 0xC0]);
//!
//! let mut decoder = FrameDecoder::new();
//! let frames = decoder.decode(&wire);
//! assert_eq!(frames[0].data(), &[0x11, 0x22]);
//! ```

pub mod client;
pub mod commands;
pub mod device_error;
pub mod frame;
pub(crate) mod io;
pub mod pending;

pub use client::{ClientOptions, ProtocolClient};
pub use commands::Command;
pub use frame::{Frame, FrameDecoder};
