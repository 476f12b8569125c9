//! Byte-order-aware codec for the X Input Method wire protocol.
//!
//! Every XIM frame is `[u8 major, u8 minor, u16 length, payload...]` where
//! `length` counts 4-byte units of the padded payload. Multi-byte integers
//! travel in the byte order the client announced in its `CONNECT` frame, so
//! all readers and writers here are parameterized by [`ByteOrder`]. This is
//! intended to be used as a building block for the `ximd` server crate.

#![forbid(unsafe_code, future_incompatible)]

pub mod attrs;
pub mod frames;

pub use attrs::{
    Attr, AttrIdIter, AttrIter, AttrRecord, AttrType, AttrView, CaretDirection, CaretStyle,
    CommitFlag, ErrorCode, ErrorFlag, Extension, Feedback, HotkeyState, InputStyle, Point,
    Rectangle, StrIter, TriggerKey,
};

/// Padding needed to bring `len` up to a 4-byte boundary.
pub const fn pad4(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("end of stream")]
    EndOfStream,
    #[error("invalid {0}: {1}")]
    InvalidData(&'static str, u32),
}

/// Byte order of one transport, fixed by the first byte of the `CONNECT`
/// payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    pub fn from_marker(marker: u8) -> Result<Self, ParseError> {
        match marker {
            b'B' => Ok(ByteOrder::Big),
            b'l' => Ok(ByteOrder::Little),
            other => Err(ParseError::InvalidData("byte order marker", other.into())),
        }
    }

    pub fn marker(self) -> u8 {
        match self {
            ByteOrder::Big => b'B',
            ByteOrder::Little => b'l',
        }
    }

    pub fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }

    pub fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
        }
    }

    pub fn u16_from(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Big => u16::from_be_bytes(bytes),
            ByteOrder::Little => u16::from_le_bytes(bytes),
        }
    }

    pub fn u32_from(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Big => u32::from_be_bytes(bytes),
            ByteOrder::Little => u32::from_le_bytes(bytes),
        }
    }

    /// Reads the `u16` at `offset` of an in-memory wire record.
    pub fn u16_at(self, bytes: &[u8], offset: usize) -> u16 {
        self.u16_from([bytes[offset], bytes[offset + 1]])
    }

    pub fn u32_at(self, bytes: &[u8], offset: usize) -> u32 {
        self.u32_from([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }
}

/// Bounded reader over untrusted request bytes.
pub struct Reader<'b> {
    bytes: &'b [u8],
    order: ByteOrder,
    consumed: usize,
}

impl<'b> Reader<'b> {
    pub fn new(bytes: &'b [u8], order: ByteOrder) -> Self {
        Self {
            bytes,
            order,
            consumed: 0,
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    pub fn eos(&self) -> ParseError {
        ParseError::EndOfStream
    }

    pub fn invalid_data(&self, ty: &'static str, item: u32) -> ParseError {
        ParseError::InvalidData(ty, item)
    }

    pub fn u8(&mut self) -> Result<u8, ParseError> {
        let (b, rest) = self.bytes.split_first().ok_or(ParseError::EndOfStream)?;
        self.bytes = rest;
        self.consumed += 1;
        Ok(*b)
    }

    pub fn u16(&mut self) -> Result<u16, ParseError> {
        let bytes = self.consume(2)?;
        Ok(self.order.u16_from([bytes[0], bytes[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, ParseError> {
        let bytes = self.consume(4)?;
        Ok(self
            .order
            .u32_from([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn i16(&mut self) -> Result<i16, ParseError> {
        self.u16().map(|v| v as i16)
    }

    pub fn i32(&mut self) -> Result<i32, ParseError> {
        self.u32().map(|v| v as i32)
    }

    pub fn consume(&mut self, len: usize) -> Result<&'b [u8], ParseError> {
        if self.bytes.len() < len {
            return Err(ParseError::EndOfStream);
        }
        let (out, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        self.consumed += len;
        Ok(out)
    }

    /// Skips the padding that follows the bytes read so far.
    pub fn pad4(&mut self) -> Result<(), ParseError> {
        self.consume(pad4(self.consumed))?;
        Ok(())
    }
}

/// Growable output buffer writing integers in one byte order.
pub struct Writer {
    out: Vec<u8>,
    order: ByteOrder,
}

impl Writer {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            out: Vec::new(),
            order,
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn u8(&mut self, value: u8) {
        self.out.push(value);
    }

    pub fn u16(&mut self, value: u16) {
        self.out.extend_from_slice(&self.order.u16_bytes(value));
    }

    pub fn u32(&mut self, value: u32) {
        self.out.extend_from_slice(&self.order.u32_bytes(value));
    }

    pub fn i16(&mut self, value: i16) {
        self.u16(value as u16);
    }

    pub fn i32(&mut self, value: i32) {
        self.u32(value as u32);
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    pub fn pad4(&mut self) {
        let pad = pad4(self.out.len());
        self.out.extend(std::iter::repeat(0).take(pad));
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// Writer for one framed request: reserves the 4-byte header and patches the
/// length field on [`finish`](FrameWriter::finish).
pub struct FrameWriter {
    w: Writer,
}

impl FrameWriter {
    pub fn new(major: u8, order: ByteOrder) -> Self {
        let mut w = Writer::new(order);
        w.u8(major);
        w.u8(0);
        w.u16(0);
        Self { w }
    }

    pub fn body(&mut self) -> &mut Writer {
        &mut self.w
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.w.pad4();
        let order = self.w.order;
        let mut out = self.w.finish();
        let units = ((out.len() - 4) / 4) as u16;
        out[2..4].copy_from_slice(&order.u16_bytes(units));
        out
    }
}

/// Parsed frame header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub major: u8,
    pub minor: u8,
    pub length: u16,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8], order: ByteOrder) -> Result<Self, ParseError> {
        if bytes.len() < 4 {
            return Err(ParseError::EndOfStream);
        }
        Ok(Self {
            major: bytes[0],
            minor: bytes[1],
            length: order.u16_at(bytes, 2),
        })
    }

    /// Total frame size on the wire, header included.
    pub fn wire_len(&self) -> usize {
        4 + 4 * self.length as usize
    }
}

/// XIM protocol major opcodes, server side.
pub mod opcode {
    pub const CONNECT: u8 = 1;
    pub const CONNECT_REPLY: u8 = 2;
    pub const DISCONNECT: u8 = 3;
    pub const DISCONNECT_REPLY: u8 = 4;
    pub const ERROR: u8 = 20;
    pub const OPEN: u8 = 30;
    pub const OPEN_REPLY: u8 = 31;
    pub const CLOSE: u8 = 32;
    pub const CLOSE_REPLY: u8 = 33;
    pub const REGISTER_TRIGGERKEYS: u8 = 34;
    pub const TRIGGER_NOTIFY: u8 = 35;
    pub const TRIGGER_NOTIFY_REPLY: u8 = 36;
    pub const SET_EVENT_MASK: u8 = 37;
    pub const ENCODING_NEGOTIATION: u8 = 38;
    pub const ENCODING_NEGOTIATION_REPLY: u8 = 39;
    pub const QUERY_EXTENSION: u8 = 40;
    pub const QUERY_EXTENSION_REPLY: u8 = 41;
    pub const SET_IM_VALUES: u8 = 42;
    pub const SET_IM_VALUES_REPLY: u8 = 43;
    pub const GET_IM_VALUES: u8 = 44;
    pub const GET_IM_VALUES_REPLY: u8 = 45;
    pub const CREATE_IC: u8 = 50;
    pub const CREATE_IC_REPLY: u8 = 51;
    pub const DESTROY_IC: u8 = 52;
    pub const DESTROY_IC_REPLY: u8 = 53;
    pub const SET_IC_VALUES: u8 = 54;
    pub const SET_IC_VALUES_REPLY: u8 = 55;
    pub const GET_IC_VALUES: u8 = 56;
    pub const GET_IC_VALUES_REPLY: u8 = 57;
    pub const SET_IC_FOCUS: u8 = 58;
    pub const UNSET_IC_FOCUS: u8 = 59;
    pub const FORWARD_EVENT: u8 = 60;
    pub const SYNC: u8 = 61;
    pub const SYNC_REPLY: u8 = 62;
    pub const COMMIT: u8 = 63;
    pub const RESET_IC: u8 = 64;
    pub const RESET_IC_REPLY: u8 = 65;
    pub const GEOMETRY: u8 = 70;
    pub const STR_CONVERSION: u8 = 71;
    pub const STR_CONVERSION_REPLY: u8 = 72;
    pub const PREEDIT_START: u8 = 73;
    pub const PREEDIT_START_REPLY: u8 = 74;
    pub const PREEDIT_DRAW: u8 = 75;
    pub const PREEDIT_CARET: u8 = 76;
    pub const PREEDIT_CARET_REPLY: u8 = 77;
    pub const PREEDIT_DONE: u8 = 78;
    pub const STATUS_START: u8 = 79;
    pub const STATUS_DRAW: u8 = 80;
    pub const STATUS_DONE: u8 = 81;
    pub const PREEDITSTATE: u8 = 82;
}
