//! Control and data channel wire protocol

pub mod codec;
pub mod packet;

pub use codec::{
    DecodeResult, HEARTBEAT_MARKER, InvalidFrame, MAX_FRAME_LEN, MAX_TOUCH_REPORTS, encode,
    encode_heartbeat, encode_into, try_decode_one,
};
pub use packet::{Endpoint, Handshake, Packet, PacketKind, PadTelemetry};
