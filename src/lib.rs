use std::io;

pub use crate::client::Client;
pub use crate::config::{ConnectOptions, OverflowPolicy};
pub use crate::connection::{parse_flex_url, ConnectionAddr, ConnectionInfo, IntoConnectionInfo};
pub use crate::discovery::{Discovery, DiscoveryEvent, RadioInfo};
pub use crate::frame::{Command, Line, LineCodec, MessageLevel};
pub use crate::object::{
    AgcMode, AudioCodec, AudioDirection, AudioStream, BitConfig, CatConfig, Change, DemodMode,
    Memory, Meter, MeterUnits, ObjectGraph, OffsetDirection, Panadapter, Slice, ToneMode,
    UsbCable, UsbCableVariant, Waterfall,
};
pub use crate::reply::Reply;
pub use crate::session::{RadioSession, SessionCounters, SessionState};
pub use crate::status::RadioMessage;
pub use crate::vita::{
    AudioFrame, ClassId, FftFrame, MeterSample, PacketClass, PacketType, VitaPacket,
    WaterfallFrame, FLEX_OUI,
};

mod client;
mod config;
mod connection;
mod discovery;
mod frame;
mod object;
mod reply;
mod session;
mod status;
mod udp;
mod util;
mod vita;

/// Default port a SmartSDR radio listens on for commands and broadcasts
/// discovery beacons on.
pub const DEFAULT_PORT: u16 = 4992;

/// Largest VITA-49 datagram a radio emits.
pub const MAX_VITA_PACKET_SIZE: usize = 16_384;

/// Generic library error type.
#[derive(thiserror::Error, Debug)]
pub enum FlexError {
    /// A line or packet was malformed beyond recovery of that record.
    #[error("{0}")]
    Protocol(String),
    /// The radio answered a command with a non-zero status code.
    #[error("command failed with status 0x{code:08x}: {message}")]
    Command { code: u32, message: String },
    /// No reply arrived within the configured reply window.
    #[error("reply timed out")]
    Timeout,
    /// The session terminated while the operation was pending.
    #[error("session disconnected")]
    Disconnected,
    /// A command was rejected before it was sent.
    #[error("{0}")]
    InvalidCommand(String),
    #[error("{0}")]
    InvalidClientConfig(String),
    #[error("{0}")]
    Tls(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A specialized library [`Result`] type.
///
/// [`Result`]: enum@std::result::Result
pub type FlexResult<T> = std::result::Result<T, FlexError>;
