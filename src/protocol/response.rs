//! Response decoding.
//!
//! A response frame starts with a 12-byte header followed by the ping data and
//! the `0xFC` terminator. Multi-byte values are packed 7 bits per byte, low byte
//! first.

use super::{DEGREES_PER_STEP, HEAD_POSITION_ZERO};
use crate::error::ParseFailure;
use serde::Serialize;

/// Minimum number of bytes (exclusive) a response must have to be decoded.
const MIN_RESPONSE_LEN: usize = 12;

/// Header sent by the head in orientation/IO replies, which carry no head status.
const IO_HEADER: &str = "IOX";

/// Head status fields, present unless the header is `IOX`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeadStatus {
    /// `true` when bit `0x40` of byte 6 is set.
    pub stepdirection: bool,
    /// Head position in degrees, 0° at raw value 600.
    pub headpos: f64,
    /// Range setting echoed by the head.
    pub range: u8,
    /// Profile range.
    pub profilerange: u16,
}

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Three ASCII header characters (e.g. `IGX`, `IMX`, `IOX`).
    pub header: String,
    /// Head id.
    pub headid: u8,
    /// Serial status byte.
    pub serialstatus: u8,
    /// Head status, `None` for `IOX` replies.
    #[serde(flatten)]
    pub head: Option<HeadStatus>,
    /// Number of data bytes announced in the header.
    pub databytes: u16,
    /// Lowercase hex of the data region, terminator excluded.
    pub payload: String,
}

impl Response {
    /// Head position in degrees, if this response carries one.
    pub fn headpos(&self) -> Option<f64> {
        self.head.map(|h| h.headpos)
    }
}

/// Round to one decimal place, the precision used for position comparisons.
pub fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn byte(bytes: &[u8], idx: usize) -> Result<u8, ParseFailure> {
    bytes.get(idx).copied().ok_or_else(|| {
        ParseFailure::Malformed(format!("missing byte {} (len={})", idx, bytes.len()))
    })
}

/// Decode a raw response, including its trailing terminator byte.
pub fn decode(bytes: &[u8]) -> Result<Response, ParseFailure> {
    if bytes.len() <= MIN_RESPONSE_LEN {
        return Err(ParseFailure::TooShort { len: bytes.len() });
    }

    let header = std::str::from_utf8(&bytes[0..3])
        .ok()
        .filter(|h| h.is_ascii())
        .ok_or(ParseFailure::BadEncoding)?
        .to_string();

    let headid = byte(bytes, 3)?;
    let serialstatus = byte(bytes, 4)?;

    let head = if header != IO_HEADER {
        let lo = byte(bytes, 5)?;
        let hi = byte(bytes, 6)?;
        let raw = (u16::from(hi & 0x3F) << 7) | u16::from(lo & 0x7F);
        Some(HeadStatus {
            stepdirection: hi & 0x40 != 0,
            headpos: (f64::from(raw) - f64::from(HEAD_POSITION_ZERO)) * DEGREES_PER_STEP,
            range: byte(bytes, 7)?,
            profilerange: (u16::from(byte(bytes, 9)?) << 7) | u16::from(byte(bytes, 8)? & 0x7F),
        })
    } else {
        None
    };

    let databytes = (u16::from(byte(bytes, 11)?) << 7) | u16::from(byte(bytes, 10)? & 0x7F);

    let data = bytes
        .get(MIN_RESPONSE_LEN..bytes.len() - 1)
        .ok_or_else(|| ParseFailure::Malformed("data region out of bounds".to_string()))?;
    let payload = data.iter().map(|b| format!("{:02x}", b)).collect();

    Ok(Response {
        header,
        headid,
        serialstatus,
        head,
        databytes,
        payload,
    })
}
