//! HTTP/2 frame types and binary serialization (RFC 9113).
//!
//! Only the frames a single-stream client touches: SETTINGS,
//! WINDOW_UPDATE, HEADERS (+ CONTINUATION on the read side), DATA, PING,
//! GOAWAY and RST_STREAM. Serialization order and content are fully
//! caller-controlled; that control is the point.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame header size per RFC 9113.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest DATA payload the client emits.
pub const MAX_DATA_PAYLOAD: usize = 16_384;

/// The 24-byte client connection preface.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl From<u8> for FrameType {
    fn from(v: u8) -> Self {
        match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        match ft {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(v) => v,
        }
    }
}

/// Frame flags.
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1; // same bit, SETTINGS/PING context
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 error codes (RFC 9113 §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    Unknown(u32),
}

impl From<u32> for ErrorCode {
    fn from(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            other => Self::Unknown(other),
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse nine header bytes. Rejects a set reserved bit.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let length = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32;
        let frame_type = FrameType::from(buf[3]);
        let frame_flags = buf[4];
        if buf[5] & 0x80 != 0 {
            return None;
        }
        let stream_id = ((buf[5] as u32 & 0x7f) << 24)
            | ((buf[6] as u32) << 16)
            | ((buf[7] as u32) << 8)
            | buf[8] as u32;
        Some(Self {
            length,
            frame_type,
            flags: frame_flags,
            stream_id,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8((self.length >> 16) as u8);
        buf.put_u8((self.length >> 8) as u8);
        buf.put_u8(self.length as u8);
        buf.put_u8(self.frame_type.into());
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & 0x7fff_ffff);
    }

    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Serialize a SETTINGS frame. `settings` go on the wire in the given
/// order — the order is the fingerprint.
pub fn write_settings(buf: &mut BytesMut, settings: &[(u16, u32)]) {
    FrameHeader {
        length: (settings.len() * 6) as u32,
        frame_type: FrameType::Settings,
        flags: 0,
        stream_id: 0,
    }
    .write(buf);
    for &(id, value) in settings {
        buf.put_u16(id);
        buf.put_u32(value);
    }
}

/// Serialize a SETTINGS ACK.
pub fn write_settings_ack(buf: &mut BytesMut) {
    FrameHeader {
        length: 0,
        frame_type: FrameType::Settings,
        flags: flags::ACK,
        stream_id: 0,
    }
    .write(buf);
}

/// Parse a SETTINGS payload into ordered (id, value) pairs.
pub fn parse_settings(mut payload: Bytes) -> Vec<(u16, u32)> {
    let mut settings = Vec::with_capacity(payload.remaining() / 6);
    while payload.remaining() >= 6 {
        settings.push((payload.get_u16(), payload.get_u32()));
    }
    settings
}

/// Serialize a WINDOW_UPDATE frame.
pub fn write_window_update(buf: &mut BytesMut, stream_id: u32, increment: u32) {
    FrameHeader {
        length: 4,
        frame_type: FrameType::WindowUpdate,
        flags: 0,
        stream_id,
    }
    .write(buf);
    buf.put_u32(increment & 0x7fff_ffff);
}

/// Serialize a HEADERS frame carrying a complete header block.
pub fn write_headers(buf: &mut BytesMut, stream_id: u32, block: &[u8], end_stream: bool) {
    let mut frame_flags = flags::END_HEADERS;
    if end_stream {
        frame_flags |= flags::END_STREAM;
    }
    FrameHeader {
        length: block.len() as u32,
        frame_type: FrameType::Headers,
        flags: frame_flags,
        stream_id,
    }
    .write(buf);
    buf.put_slice(block);
}

/// Serialize one DATA frame.
pub fn write_data(buf: &mut BytesMut, stream_id: u32, payload: &[u8], end_stream: bool) {
    FrameHeader {
        length: payload.len() as u32,
        frame_type: FrameType::Data,
        flags: if end_stream { flags::END_STREAM } else { 0 },
        stream_id,
    }
    .write(buf);
    buf.put_slice(payload);
}

/// Serialize a PING (ACK) echoing the peer's opaque data.
pub fn write_ping_ack(buf: &mut BytesMut, data: &[u8; 8]) {
    FrameHeader {
        length: 8,
        frame_type: FrameType::Ping,
        flags: flags::ACK,
        stream_id: 0,
    }
    .write(buf);
    buf.put_slice(data);
}

/// Strip padding (and the optional priority block) from a HEADERS or
/// DATA payload, returning the useful bytes.
pub fn strip_padding(frame_type: FrameType, frame_flags: u8, mut payload: Bytes) -> Option<Bytes> {
    let padded = frame_flags & flags::PADDED != 0;
    let pad_len = if padded {
        if payload.remaining() < 1 {
            return None;
        }
        let pad = payload.get_u8() as usize;
        if pad >= payload.remaining() {
            return None;
        }
        pad
    } else {
        0
    };

    if frame_type == FrameType::Headers && frame_flags & flags::PRIORITY != 0 {
        if payload.remaining() < 5 {
            return None;
        }
        payload.advance(5);
    }

    let useful = payload.remaining() - pad_len;
    Some(payload.copy_to_bytes(useful))
}

/// Parsed GOAWAY frame.
#[derive(Debug, Clone)]
pub struct GoAway {
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
}

pub fn parse_goaway(mut payload: Bytes) -> Option<GoAway> {
    if payload.remaining() < 8 {
        return None;
    }
    Some(GoAway {
        last_stream_id: payload.get_u32() & 0x7fff_ffff,
        error_code: ErrorCode::from(payload.get_u32()),
    })
}

pub fn parse_rst_stream(mut payload: Bytes) -> Option<ErrorCode> {
    if payload.remaining() < 4 {
        return None;
    }
    Some(ErrorCode::from(payload.get_u32()))
}

pub fn parse_window_update(mut payload: Bytes) -> Option<u32> {
    if payload.remaining() < 4 {
        return None;
    }
    Some(payload.get_u32() & 0x7fff_ffff)
}
