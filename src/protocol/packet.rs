//! Packet types carried on the control (TCP) and data (UDP) channels.
//!
//! - Control channel: [`Packet::Handshake`], [`Packet::Config`] and the raw
//!   heartbeat marker (see [`super::codec::HEARTBEAT_MARKER`]).
//! - Data channel: [`Packet::PadTelemetry`] only.

use crate::core::types::InputFrame;
use std::fmt;

/// Which side of the connection sent a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Client,
    Server,
}

impl Endpoint {
    pub(crate) const fn to_wire(self) -> u8 {
        match self {
            Endpoint::Client => 0,
            Endpoint::Server => 1,
        }
    }

    pub(crate) const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Endpoint::Client),
            1 => Some(Endpoint::Server),
            _ => None,
        }
    }
}

/// Handshake exchanged once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub endpoint: Endpoint,
    /// Client: UDP port to stream telemetry to. Server: control port.
    pub port: u16,
    /// Heartbeat interval the server expects, in seconds (0 from clients)
    pub heartbeat_interval_secs: u32,
}

/// One telemetry push: an input frame plus the battery level at push time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PadTelemetry {
    pub frame: InputFrame,
    pub battery_percent: i32,
}

/// Every structured message on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Handshake(Handshake),
    Config { polling_interval_micros: u32 },
    PadTelemetry(PadTelemetry),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Handshake(_) => PacketKind::Handshake,
            Packet::Config { .. } => PacketKind::Config,
            Packet::PadTelemetry(_) => PacketKind::PadTelemetry,
        }
    }
}

/// Frame discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Handshake = 1,
    Config = 2,
    PadTelemetry = 3,
}

impl PacketKind {
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PacketKind::Handshake),
            2 => Some(PacketKind::Config),
            3 => Some(PacketKind::PadTelemetry),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            PacketKind::Handshake => "Handshake",
            PacketKind::Config => "Config",
            PacketKind::PadTelemetry => "PadTelemetry",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
