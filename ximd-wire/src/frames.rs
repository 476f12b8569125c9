//! Framed XIM requests: borrowed views over inbound payloads and emitters
//! for every frame the server writes.
//!
//! Views never copy; they bound each embedded list by both the payload size
//! and the list's own declared byte length, whichever is smaller, so a
//! malformed peer can at worst truncate its own request.

use crate::{
    opcode, Attr, AttrIdIter, AttrIter, AttrRecord, ByteOrder, CaretDirection, CaretStyle,
    CommitFlag, ErrorCode, ErrorFlag, Extension, Feedback, FrameHeader, FrameWriter, ParseError,
    Reader,
};

/// One framed request with its payload trimmed to the declared length.
#[derive(Clone, Copy, Debug)]
pub struct RequestFrame<'b> {
    pub major: u8,
    pub minor: u8,
    pub payload: &'b [u8],
}

impl<'b> RequestFrame<'b> {
    pub fn parse(bytes: &'b [u8], order: ByteOrder) -> Result<Self, ParseError> {
        let header = FrameHeader::parse(bytes, order)?;
        let end = header.wire_len();
        if bytes.len() < end {
            return Err(ParseError::EndOfStream);
        }
        Ok(Self {
            major: header.major,
            minor: header.minor,
            payload: &bytes[4..end],
        })
    }
}

fn bounded(payload: &[u8], offset: usize, declared: usize) -> &[u8] {
    let avail = payload.len().saturating_sub(offset);
    &payload[offset..offset + avail.min(declared)]
}

/// `CONNECT`, parsed from the full frame: the byte-order marker lives at
/// payload offset 0 and fixes the transport's byte order for good.
#[derive(Clone, Copy, Debug)]
pub struct ConnectRequest {
    pub order: ByteOrder,
    pub client_major_protocol_version: u16,
    pub client_minor_protocol_version: u16,
}

impl ConnectRequest {
    pub fn parse(frame: &[u8]) -> Result<Self, ParseError> {
        if frame.len() < 10 {
            return Err(ParseError::EndOfStream);
        }
        let order = ByteOrder::from_marker(frame[4])?;
        Ok(Self {
            order,
            client_major_protocol_version: order.u16_at(frame, 6),
            client_minor_protocol_version: order.u16_at(frame, 8),
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OpenRequest<'b> {
    pub locale: &'b [u8],
}

impl<'b> OpenRequest<'b> {
    pub fn parse(payload: &'b [u8]) -> Result<Self, ParseError> {
        let (&len, rest) = payload.split_first().ok_or(ParseError::EndOfStream)?;
        if rest.len() < len as usize {
            return Err(ParseError::EndOfStream);
        }
        Ok(Self {
            locale: &rest[..len as usize],
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CloseRequest {
    pub input_method_id: u16,
}

impl CloseRequest {
    pub fn parse(payload: &[u8], order: ByteOrder) -> Result<Self, ParseError> {
        let mut r = Reader::new(payload, order);
        Ok(Self {
            input_method_id: r.u16()?,
        })
    }
}

/// Requests addressed to an input method carrying an embedded list:
/// `[u16 input_method_id][u16 byte_length][list...]`.
#[derive(Clone, Copy, Debug)]
pub struct ImListRequest<'b> {
    pub input_method_id: u16,
    list: &'b [u8],
    order: ByteOrder,
}

impl<'b> ImListRequest<'b> {
    pub fn parse(payload: &'b [u8], order: ByteOrder) -> Result<Self, ParseError> {
        let mut r = Reader::new(payload, order);
        let input_method_id = r.u16()?;
        let byte_length = r.u16()? as usize;
        Ok(Self {
            input_method_id,
            list: bounded(payload, 4, byte_length),
            order,
        })
    }

    /// `QUERY_EXTENSION` / `ENCODING_NEGOTIATION` name list.
    pub fn strings(&self) -> crate::StrIter<'b> {
        crate::StrIter::new(self.list)
    }

    /// `GET_IM_VALUES` attribute ids.
    pub fn attribute_ids(&self) -> AttrIdIter<'b> {
        AttrIdIter::new(self.list, self.order)
    }

    /// `SET_IM_VALUES` / `CREATE_IC` attributes.
    pub fn attributes(&self) -> AttrIter<'b> {
        AttrIter::new(self.list, self.order)
    }
}

/// Requests addressed to `(input_method_id, input_context_id)` with no body.
#[derive(Clone, Copy, Debug)]
pub struct IcRequest {
    pub input_method_id: u16,
    pub input_context_id: u16,
}

impl IcRequest {
    pub fn parse(payload: &[u8], order: ByteOrder) -> Result<Self, ParseError> {
        let mut r = Reader::new(payload, order);
        Ok(Self {
            input_method_id: r.u16()?,
            input_context_id: r.u16()?,
        })
    }
}

/// `SET_IC_VALUES`: `[im][ic][u16 byte_length][u16 unused][attributes...]`.
#[derive(Clone, Copy, Debug)]
pub struct SetIcValuesRequest<'b> {
    pub input_method_id: u16,
    pub input_context_id: u16,
    list: &'b [u8],
    order: ByteOrder,
}

impl<'b> SetIcValuesRequest<'b> {
    pub fn parse(payload: &'b [u8], order: ByteOrder) -> Result<Self, ParseError> {
        let mut r = Reader::new(payload, order);
        let input_method_id = r.u16()?;
        let input_context_id = r.u16()?;
        let byte_length = r.u16()? as usize;
        r.u16()?;
        Ok(Self {
            input_method_id,
            input_context_id,
            list: bounded(payload, 8, byte_length),
            order,
        })
    }

    pub fn attributes(&self) -> AttrIter<'b> {
        AttrIter::new(self.list, self.order)
    }
}

/// `GET_IC_VALUES`: `[im][ic][u16 byte_length][ids...]` with no padding
/// before the id list.
#[derive(Clone, Copy, Debug)]
pub struct GetIcValuesRequest<'b> {
    pub input_method_id: u16,
    pub input_context_id: u16,
    list: &'b [u8],
    order: ByteOrder,
}

impl<'b> GetIcValuesRequest<'b> {
    pub fn parse(payload: &'b [u8], order: ByteOrder) -> Result<Self, ParseError> {
        let mut r = Reader::new(payload, order);
        let input_method_id = r.u16()?;
        let input_context_id = r.u16()?;
        let byte_length = r.u16()? as usize;
        Ok(Self {
            input_method_id,
            input_context_id,
            list: bounded(payload, 6, byte_length),
            order,
        })
    }

    pub fn attribute_ids(&self) -> AttrIdIter<'b> {
        AttrIdIter::new(self.list, self.order)
    }
}

/// `PREEDIT_CARET_REPLY`: `[im][ic][u32 position]`.
#[derive(Clone, Copy, Debug)]
pub struct PreeditCaretReply {
    pub input_method_id: u16,
    pub input_context_id: u16,
    pub position: u32,
}

impl PreeditCaretReply {
    pub fn parse(payload: &[u8], order: ByteOrder) -> Result<Self, ParseError> {
        let mut r = Reader::new(payload, order);
        Ok(Self {
            input_method_id: r.u16()?,
            input_context_id: r.u16()?,
            position: r.u32()?,
        })
    }
}

/// `PREEDIT_START_REPLY`: `[im][ic][i32 return_value]`.
#[derive(Clone, Copy, Debug)]
pub struct PreeditStartReply {
    pub input_method_id: u16,
    pub input_context_id: u16,
    pub return_value: i32,
}

impl PreeditStartReply {
    pub fn parse(payload: &[u8], order: ByteOrder) -> Result<Self, ParseError> {
        let mut r = Reader::new(payload, order);
        Ok(Self {
            input_method_id: r.u16()?,
            input_context_id: r.u16()?,
            return_value: r.i32()?,
        })
    }
}

pub fn connect_reply(order: ByteOrder, major: u16, minor: u16) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::CONNECT_REPLY, order);
    f.body().u16(major);
    f.body().u16(minor);
    f.finish()
}

pub fn disconnect_reply(order: ByteOrder) -> Vec<u8> {
    FrameWriter::new(opcode::DISCONNECT_REPLY, order).finish()
}

pub fn error(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    flag: ErrorFlag,
    code: ErrorCode,
    detail: &[u8],
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::ERROR, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.u16(flag.bits());
    w.u16(code as u16);
    w.u16(detail.len() as u16);
    w.u16(0); // detail type
    w.bytes(detail);
    f.finish()
}

pub fn open_reply(
    order: ByteOrder,
    input_method_id: u16,
    im_attrs: &[Attr],
    ic_attrs: &[Attr],
) -> Vec<u8> {
    let im_byte_length: usize = im_attrs.iter().map(|a| a.as_bytes().len()).sum();
    let ic_byte_length: usize = ic_attrs.iter().map(|a| a.as_bytes().len()).sum();

    let mut f = FrameWriter::new(opcode::OPEN_REPLY, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(im_byte_length as u16);
    for attr in im_attrs {
        w.bytes(attr.as_bytes());
    }
    w.u16(ic_byte_length as u16);
    w.u16(0);
    for attr in ic_attrs {
        w.bytes(attr.as_bytes());
    }
    f.finish()
}

pub fn close_reply(order: ByteOrder, input_method_id: u16) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::CLOSE_REPLY, order);
    f.body().u16(input_method_id);
    f.body().u16(0);
    f.finish()
}

pub fn register_triggerkeys(
    order: ByteOrder,
    input_method_id: u16,
    on_keys: &[crate::TriggerKey],
    off_keys: &[crate::TriggerKey],
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::REGISTER_TRIGGERKEYS, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(0);
    w.u32(12 * on_keys.len() as u32);
    for key in on_keys {
        w.u32(key.keysym);
        w.u32(key.modifier);
        w.u32(key.modifier_mask);
    }
    w.u32(12 * off_keys.len() as u32);
    for key in off_keys {
        w.u32(key.keysym);
        w.u32(key.modifier);
        w.u32(key.modifier_mask);
    }
    f.finish()
}

pub fn trigger_notify_reply(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
) -> Vec<u8> {
    ic_header_only(opcode::TRIGGER_NOTIFY_REPLY, order, input_method_id, input_context_id)
}

pub fn set_event_mask(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    forward_event_mask: u32,
    synchronous_event_mask: u32,
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::SET_EVENT_MASK, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.u32(forward_event_mask);
    w.u32(synchronous_event_mask);
    f.finish()
}

pub fn encoding_negotiation_reply(
    order: ByteOrder,
    input_method_id: u16,
    category: u16,
    index: i16,
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::ENCODING_NEGOTIATION_REPLY, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(category);
    w.i16(index);
    w.u16(0);
    f.finish()
}

pub fn query_extension_reply(
    order: ByteOrder,
    input_method_id: u16,
    extensions: &[Extension],
) -> Vec<u8> {
    let byte_length: usize = extensions.iter().map(|e| e.as_bytes().len()).sum();
    let mut f = FrameWriter::new(opcode::QUERY_EXTENSION_REPLY, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(byte_length as u16);
    for extension in extensions {
        w.bytes(extension.as_bytes());
    }
    f.finish()
}

pub fn set_im_values_reply(order: ByteOrder, input_method_id: u16) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::SET_IM_VALUES_REPLY, order);
    f.body().u16(input_method_id);
    f.body().u16(0);
    f.finish()
}

pub fn get_im_values_reply(
    order: ByteOrder,
    input_method_id: u16,
    attributes: &[&AttrRecord],
) -> Vec<u8> {
    let byte_length: usize = attributes.iter().map(|a| a.as_bytes().len()).sum();
    let mut f = FrameWriter::new(opcode::GET_IM_VALUES_REPLY, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(byte_length as u16);
    for attr in attributes {
        w.bytes(attr.as_bytes());
    }
    f.finish()
}

pub fn create_ic_reply(order: ByteOrder, input_method_id: u16, input_context_id: u16) -> Vec<u8> {
    ic_header_only(opcode::CREATE_IC_REPLY, order, input_method_id, input_context_id)
}

pub fn destroy_ic_reply(order: ByteOrder, input_method_id: u16, input_context_id: u16) -> Vec<u8> {
    ic_header_only(opcode::DESTROY_IC_REPLY, order, input_method_id, input_context_id)
}

pub fn set_ic_values_reply(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
) -> Vec<u8> {
    ic_header_only(opcode::SET_IC_VALUES_REPLY, order, input_method_id, input_context_id)
}

pub fn get_ic_values_reply(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    attributes: &[&AttrRecord],
) -> Vec<u8> {
    let byte_length: usize = attributes.iter().map(|a| a.as_bytes().len()).sum();
    let mut f = FrameWriter::new(opcode::GET_IC_VALUES_REPLY, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.u16(byte_length as u16);
    w.u16(0);
    for attr in attributes {
        w.bytes(attr.as_bytes());
    }
    f.finish()
}

pub fn sync_reply(order: ByteOrder, input_method_id: u16, input_context_id: u16) -> Vec<u8> {
    ic_header_only(opcode::SYNC_REPLY, order, input_method_id, input_context_id)
}

pub fn commit(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    flag: CommitFlag,
    keysym: u32,
    string: &[u8],
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::COMMIT, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.u16(flag.bits());
    if flag.contains(CommitFlag::KEYSYM) {
        w.u16(0);
        w.u32(keysym);
    }
    if flag.contains(CommitFlag::STRING) {
        w.u16(string.len() as u16);
        w.bytes(string);
    }
    f.finish()
}

pub fn reset_ic_reply(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    preedit: &[u8],
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::RESET_IC_REPLY, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.u16(preedit.len() as u16);
    w.bytes(preedit);
    f.finish()
}

pub fn geometry(order: ByteOrder, input_method_id: u16, input_context_id: u16) -> Vec<u8> {
    ic_header_only(opcode::GEOMETRY, order, input_method_id, input_context_id)
}

#[allow(clippy::too_many_arguments)]
pub fn str_conversion(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    position: u16,
    direction: CaretDirection,
    factor: u16,
    operation: u16,
    byte_length: i16,
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::STR_CONVERSION, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.u16(position);
    w.u32(direction as u32);
    w.u16(factor);
    w.u16(operation);
    w.i16(byte_length);
    f.finish()
}

pub fn preedit_start(order: ByteOrder, input_method_id: u16, input_context_id: u16) -> Vec<u8> {
    ic_header_only(opcode::PREEDIT_START, order, input_method_id, input_context_id)
}

#[allow(clippy::too_many_arguments)]
pub fn preedit_draw(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    caret: i32,
    change_first: i32,
    change_length: i32,
    status: u32,
    preedit: &[u8],
    feedbacks: &[Feedback],
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::PREEDIT_DRAW, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.i32(caret);
    w.i32(change_first);
    w.i32(change_length);
    w.u32(status);
    w.u16(preedit.len() as u16);
    w.bytes(preedit);
    w.pad4();
    w.u16(4 * feedbacks.len() as u16);
    w.u16(0);
    for feedback in feedbacks {
        w.u32(feedback.bits());
    }
    f.finish()
}

pub fn preedit_caret(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    position: i32,
    direction: CaretDirection,
    style: CaretStyle,
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::PREEDIT_CARET, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.i32(position);
    w.u32(direction as u32);
    w.u32(style as u32);
    f.finish()
}

pub fn preedit_done(order: ByteOrder, input_method_id: u16, input_context_id: u16) -> Vec<u8> {
    ic_header_only(opcode::PREEDIT_DONE, order, input_method_id, input_context_id)
}

pub fn preedit_state(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    state: u32,
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::PREEDITSTATE, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.u32(state);
    f.finish()
}

pub fn status_start(order: ByteOrder, input_method_id: u16, input_context_id: u16) -> Vec<u8> {
    ic_header_only(opcode::STATUS_START, order, input_method_id, input_context_id)
}

pub fn status_draw_text(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    flag: u32,
    status: &[u8],
    feedbacks: &[Feedback],
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::STATUS_DRAW, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.u32(0); // type: text
    w.u32(flag);
    w.u16(status.len() as u16);
    w.bytes(status);
    w.pad4();
    w.u16(4 * feedbacks.len() as u16);
    w.u16(0);
    for feedback in feedbacks {
        w.u32(feedback.bits());
    }
    f.finish()
}

pub fn status_draw_pixmap(
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
    pixmap: u32,
) -> Vec<u8> {
    let mut f = FrameWriter::new(opcode::STATUS_DRAW, order);
    let w = f.body();
    w.u16(input_method_id);
    w.u16(input_context_id);
    w.u32(1); // type: pixmap
    w.u32(pixmap);
    f.finish()
}

pub fn status_done(order: ByteOrder, input_method_id: u16, input_context_id: u16) -> Vec<u8> {
    ic_header_only(opcode::STATUS_DONE, order, input_method_id, input_context_id)
}

fn ic_header_only(
    major: u8,
    order: ByteOrder,
    input_method_id: u16,
    input_context_id: u16,
) -> Vec<u8> {
    let mut f = FrameWriter::new(major, order);
    f.body().u16(input_method_id);
    f.body().u16(input_context_id);
    f.finish()
}
