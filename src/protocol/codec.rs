//! Binary framing for the control and data channels
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────────────┬─────────┬───────────────────────────┐
//! │ Length (4 bytes) │ Tag (1) │ Body (Length - 1 bytes)   │
//! │ Little-endian u32│         │ variant-specific, LE      │
//! └──────────────────┴─────────┴───────────────────────────┘
//! ```
//!
//! `Length` counts the tag and the body. All numeric fields are little-endian.
//!
//! | Tag | Variant      | Body                                                  |
//! |-----|--------------|-------------------------------------------------------|
//! | 1   | Handshake    | endpoint u8, port u16, heartbeat_interval_secs u32    |
//! | 2   | Config       | polling_interval_micros u32                           |
//! | 3   | PadTelemetry | buttons u16, lx ly rx ry i16, front touch, back touch, |
//! |     |              | gyro 3×f32, accel 3×f32, timestamp u64, battery i32   |
//!
//! A touch block is a count byte followed by `count` reports of
//! `force u8, id u8, x i16, y i16`.
//!
//! # Heartbeat Marker
//!
//! The client pings the control channel with the raw 6 bytes
//! `FF FF FF FF 42 54`, without a length prefix. Read as a length, `FF FF FF FF`
//! can never be a valid frame, so the two never collide.
//!
//! # Verification
//!
//! The declared length, the tag and (for fixed-size variants) the body size are
//! checked as soon as those bytes arrive. The body is structurally verified
//! once the whole frame is buffered, before any field is handed out.

use super::packet::{Endpoint, Handshake, Packet, PacketKind, PadTelemetry};
use crate::core::types::{Buttons, InputFrame, MotionState, TouchReport, Vector3};

/// Liveness ping sent raw on the control channel
pub const HEARTBEAT_MARKER: [u8; 6] = [0xFF, 0xFF, 0xFF, 0xFF, 0x42, 0x54];

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest accepted `Length` value (tag + body)
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Touch reports per surface; extra reports are dropped on encode
pub const MAX_TOUCH_REPORTS: usize = 8;

const HANDSHAKE_BODY_LEN: usize = 1 + 2 + 4;
const CONFIG_BODY_LEN: usize = 4;
const TOUCH_REPORT_LEN: usize = 1 + 1 + 2 + 2;
// buttons + 4 sticks + 2 touch counts + motion + timestamp + battery
const PAD_FIXED_BODY_LEN: usize = 2 + 4 * 2 + 2 + 6 * 4 + 8 + 4;
// both surfaces carrying the full set of touch reports
const PAD_MAX_BODY_LEN: usize = PAD_FIXED_BODY_LEN + 2 * MAX_TOUCH_REPORTS * TOUCH_REPORT_LEN;
// offset of the front touch count inside a PadTelemetry body
const PAD_FRONT_COUNT_OFFSET: usize = 2 + 4 * 2;

/// Outcome of inspecting the front of a receive buffer
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeResult {
    /// Buffer starts with the heartbeat marker
    Heartbeat { consumed: usize },
    /// A verified frame; the caller must drop exactly `consumed` bytes
    Complete { packet: Packet, consumed: usize },
    /// Not enough bytes yet; leave the buffer untouched
    Incomplete,
    /// Bytes cannot start a valid frame; the whole buffer is untrustworthy
    Invalid(InvalidFrame),
}

/// Why a frame failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFrame {
    #[error("declared length {0} outside the accepted frame range")]
    Length(u32),

    #[error("unknown packet tag {0:#04x}")]
    UnknownTag(u8),

    #[error("{kind} body is {actual} bytes, expected {expected}")]
    BodyLength {
        kind: PacketKind,
        expected: usize,
        actual: usize,
    },

    #[error("unknown handshake endpoint {0}")]
    Endpoint(u8),

    #[error("undefined button bits {0:#06x}")]
    Buttons(u16),

    #[error("{0} touch reports exceed the per-surface limit")]
    TouchCount(u8),
}

/// Encode a packet into a fresh buffer
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    encode_into(packet, &mut out);
    out
}

/// Encode a packet into `out`, replacing its contents.
///
/// Reusing one buffer avoids an allocation per telemetry push.
pub fn encode_into(packet: &Packet, out: &mut Vec<u8>) {
    out.clear();
    out.extend_from_slice(&[0; LENGTH_PREFIX_SIZE]);
    out.push(packet.kind().tag());

    match packet {
        Packet::Handshake(hs) => {
            out.push(hs.endpoint.to_wire());
            out.extend_from_slice(&hs.port.to_le_bytes());
            out.extend_from_slice(&hs.heartbeat_interval_secs.to_le_bytes());
        }
        Packet::Config {
            polling_interval_micros,
        } => {
            out.extend_from_slice(&polling_interval_micros.to_le_bytes());
        }
        Packet::PadTelemetry(pad) => encode_pad(pad, out),
    }

    let len = (out.len() - LENGTH_PREFIX_SIZE) as u32;
    out[..LENGTH_PREFIX_SIZE].copy_from_slice(&len.to_le_bytes());
}

/// Append the heartbeat marker to `out`
pub fn encode_heartbeat(out: &mut Vec<u8>) {
    out.extend_from_slice(&HEARTBEAT_MARKER);
}

fn encode_pad(pad: &PadTelemetry, out: &mut Vec<u8>) {
    let frame = &pad.frame;
    out.extend_from_slice(&frame.buttons.bits().to_le_bytes());
    for axis in [frame.lx, frame.ly, frame.rx, frame.ry] {
        out.extend_from_slice(&axis.to_le_bytes());
    }
    encode_touch(&frame.touch_front, out);
    encode_touch(&frame.touch_back, out);
    for v in [frame.motion.gyro, frame.motion.accel] {
        out.extend_from_slice(&v.x.to_le_bytes());
        out.extend_from_slice(&v.y.to_le_bytes());
        out.extend_from_slice(&v.z.to_le_bytes());
    }
    out.extend_from_slice(&frame.timestamp.to_le_bytes());
    out.extend_from_slice(&pad.battery_percent.to_le_bytes());
}

fn encode_touch(reports: &[TouchReport], out: &mut Vec<u8>) {
    let count = reports.len().min(MAX_TOUCH_REPORTS);
    out.push(count as u8);
    for report in &reports[..count] {
        out.push(report.force);
        out.push(report.id);
        out.extend_from_slice(&report.x.to_le_bytes());
        out.extend_from_slice(&report.y.to_le_bytes());
    }
}

/// Inspect the front of `buf` for one heartbeat or one complete frame.
///
/// Call repeatedly, dropping the consumed bytes each time, until it returns
/// [`DecodeResult::Incomplete`]: a single read may carry several frames.
pub fn try_decode_one(buf: &[u8]) -> DecodeResult {
    if buf.starts_with(&HEARTBEAT_MARKER) {
        return DecodeResult::Heartbeat {
            consumed: HEARTBEAT_MARKER.len(),
        };
    }
    // A partial marker is only distinguishable once its last bytes arrive
    if buf.len() < HEARTBEAT_MARKER.len() && HEARTBEAT_MARKER.starts_with(buf) {
        return DecodeResult::Incomplete;
    }

    let Some(prefix) = buf.first_chunk::<LENGTH_PREFIX_SIZE>() else {
        return DecodeResult::Incomplete;
    };
    let declared = u32::from_le_bytes(*prefix);
    if declared == 0 || declared as usize > MAX_FRAME_LEN {
        return DecodeResult::Invalid(InvalidFrame::Length(declared));
    }

    let Some(&tag) = buf.get(LENGTH_PREFIX_SIZE) else {
        return DecodeResult::Incomplete;
    };
    let Some(kind) = PacketKind::from_tag(tag) else {
        return DecodeResult::Invalid(InvalidFrame::UnknownTag(tag));
    };

    let body_len = declared as usize - 1;
    if let Err(e) = check_body_len(kind, body_len) {
        return DecodeResult::Invalid(e);
    }

    let total = LENGTH_PREFIX_SIZE + declared as usize;
    if buf.len() < total {
        return DecodeResult::Incomplete;
    }

    let body = &buf[LENGTH_PREFIX_SIZE + 1..total];
    match verify_body(kind, body).and_then(|()| decode_body(kind, body)) {
        Ok(packet) => DecodeResult::Complete {
            packet,
            consumed: total,
        },
        Err(e) => DecodeResult::Invalid(e),
    }
}

/// Size checks that only need the header
fn check_body_len(kind: PacketKind, actual: usize) -> Result<(), InvalidFrame> {
    let (min, max) = match kind {
        PacketKind::Handshake => (HANDSHAKE_BODY_LEN, HANDSHAKE_BODY_LEN),
        PacketKind::Config => (CONFIG_BODY_LEN, CONFIG_BODY_LEN),
        PacketKind::PadTelemetry => (PAD_FIXED_BODY_LEN, PAD_MAX_BODY_LEN),
    };
    if actual < min {
        return Err(InvalidFrame::BodyLength {
            kind,
            expected: min,
            actual,
        });
    }
    if actual > max {
        return Err(InvalidFrame::BodyLength {
            kind,
            expected: max,
            actual,
        });
    }
    Ok(())
}

/// Structural verification of a complete body
fn verify_body(kind: PacketKind, body: &[u8]) -> Result<(), InvalidFrame> {
    match kind {
        PacketKind::Handshake => {
            Endpoint::from_wire(body[0]).ok_or(InvalidFrame::Endpoint(body[0]))?;
        }
        PacketKind::Config => {}
        PacketKind::PadTelemetry => {
            let bits = u16::from_le_bytes([body[0], body[1]]);
            Buttons::from_bits(bits).ok_or(InvalidFrame::Buttons(bits))?;

            let front = touch_count(body, PAD_FRONT_COUNT_OFFSET)?;
            let back_offset = PAD_FRONT_COUNT_OFFSET + 1 + front * TOUCH_REPORT_LEN;
            let back = touch_count(body, back_offset)?;

            let expected = PAD_FIXED_BODY_LEN + (front + back) * TOUCH_REPORT_LEN;
            if body.len() != expected {
                return Err(InvalidFrame::BodyLength {
                    kind,
                    expected,
                    actual: body.len(),
                });
            }
        }
    }
    Ok(())
}

fn touch_count(body: &[u8], offset: usize) -> Result<usize, InvalidFrame> {
    // The fixed-size floor guarantees the front count byte; the back count may
    // fall past the end when the front count is bogus.
    let Some(&count) = body.get(offset) else {
        return Err(InvalidFrame::BodyLength {
            kind: PacketKind::PadTelemetry,
            expected: offset + 1,
            actual: body.len(),
        });
    };
    if count as usize > MAX_TOUCH_REPORTS {
        return Err(InvalidFrame::TouchCount(count));
    }
    Ok(count as usize)
}

fn decode_body(kind: PacketKind, body: &[u8]) -> Result<Packet, InvalidFrame> {
    let mut r = Reader::new(body);
    let packet = match kind {
        PacketKind::Handshake => {
            let endpoint_byte = r.u8();
            let endpoint =
                Endpoint::from_wire(endpoint_byte).ok_or(InvalidFrame::Endpoint(endpoint_byte))?;
            Packet::Handshake(Handshake {
                endpoint,
                port: r.u16(),
                heartbeat_interval_secs: r.u32(),
            })
        }
        PacketKind::Config => Packet::Config {
            polling_interval_micros: r.u32(),
        },
        PacketKind::PadTelemetry => {
            let bits = r.u16();
            let buttons = Buttons::from_bits(bits).ok_or(InvalidFrame::Buttons(bits))?;
            let (lx, ly, rx, ry) = (r.i16(), r.i16(), r.i16(), r.i16());
            let touch_front = r.touch_block();
            let touch_back = r.touch_block();
            let gyro = r.vector3();
            let accel = r.vector3();
            let timestamp = r.u64();
            let battery_percent = r.i32();
            Packet::PadTelemetry(PadTelemetry {
                frame: InputFrame {
                    buttons,
                    lx,
                    ly,
                    rx,
                    ry,
                    touch_front,
                    touch_back,
                    motion: MotionState { gyro, accel },
                    timestamp,
                },
                battery_percent,
            })
        }
    };
    Ok(packet)
}

/// Little-endian cursor over a body that has already passed [`verify_body`]
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    fn vector3(&mut self) -> Vector3 {
        Vector3::new(self.f32(), self.f32(), self.f32())
    }

    fn touch_block(&mut self) -> Vec<TouchReport> {
        let count = self.u8() as usize;
        (0..count)
            .map(|_| TouchReport {
                force: self.u8(),
                id: self.u8(),
                x: self.i16(),
                y: self.i16(),
            })
            .collect()
    }
}
