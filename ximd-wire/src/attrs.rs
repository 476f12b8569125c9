//! Typed XIM attributes, attribute specs and the iterators that walk them.
//!
//! Records built here are kept as contiguous wire images, integers already in
//! the owning transport's byte order, so serializing one is a plain copy and
//! a stored record can be echoed back in a get-values reply unchanged.

use crate::{pad4, ByteOrder, Writer};

bitflags::bitflags! {
    /// `inputStyle` bitmask.
    pub struct InputStyle: u32 {
        const PREEDIT_AREA = 0x0001;
        const PREEDIT_CALLBACKS = 0x0002;
        const PREEDIT_POSITION = 0x0004;
        const PREEDIT_NOTHING = 0x0008;
        const PREEDIT_NONE = 0x0010;
        const STATUS_AREA = 0x0100;
        const STATUS_CALLBACKS = 0x0200;
        const STATUS_NOTHING = 0x0400;
        const STATUS_NONE = 0x0800;
    }
}

bitflags::bitflags! {
    /// Per-byte preedit feedback mask.
    pub struct Feedback: u32 {
        const REVERSE = 0x1;
        const UNDERLINE = 0x2;
        const HIGHLIGHT = 0x4;
        const PRIMARY = 0x8;
        const SECONDARY = 0x10;
        const TERTIARY = 0x20;
        const VISIBLE_TO_FORWARD = 0x40;
        const VISIBLE_TO_BACKWARD = 0x80;
        const VISIBLE_TO_CENTER = 0x100;
    }
}

bitflags::bitflags! {
    pub struct CommitFlag: u16 {
        const SYNCHRONOUS = 0x1;
        const KEYSYM = 0x2;
        const STRING = 0x4;
    }
}

bitflags::bitflags! {
    pub struct ErrorFlag: u16 {
        const INPUT_METHOD_ID_VALID = 0x1;
        const INPUT_CONTEXT_ID_VALID = 0x2;
    }
}

bitflags::bitflags! {
    pub struct HotkeyState: u32 {
        const ON = 0x1;
        const OFF = 0x2;
    }
}

/// Attribute value type codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum AttrType {
    Separator = 0,
    Card8 = 1,
    Card16 = 2,
    Card32 = 3,
    String8 = 4,
    Window = 5,
    Styles = 10,
    Rectangle = 11,
    Point = 12,
    FontSet = 13,
    Options = 14,
    HotkeyTriggers = 15,
    HotkeyState = 16,
    StringConversion = 17,
    NestedList = 0x7fff,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum CaretDirection {
    ForwardChar = 0,
    BackwardChar = 1,
    ForwardWord = 2,
    BackwardWord = 3,
    CaretUp = 4,
    CaretDown = 5,
    NextLine = 6,
    PreviousLine = 7,
    LineStart = 8,
    LineEnd = 9,
    AbsolutePosition = 10,
    DontChange = 11,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum CaretStyle {
    Invisible = 0,
    Primary = 1,
    Secondary = 2,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum ErrorCode {
    BadAlloc = 1,
    BadStyle = 2,
    BadClientWindow = 3,
    BadFocusWindow = 4,
    BadArea = 5,
    BadSpotLocation = 6,
    BadColormap = 7,
    BadAtom = 8,
    BadPixel = 9,
    BadPixmap = 10,
    BadName = 11,
    BadCursor = 12,
    BadProtocol = 13,
    BadForeground = 14,
    BadBackground = 15,
    LocaleNotSupported = 16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Point {
    pub x: i16,
    pub y: i16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Rectangle {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TriggerKey {
    pub keysym: u32,
    pub modifier: u32,
    pub modifier_mask: u32,
}

/// An advertised attribute spec as its wire image:
/// `[u16 id][u16 type][u16 name_len][name][pad(2 + name_len)]`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attr(Vec<u8>);

impl Attr {
    pub fn new(order: ByteOrder, id: u16, ty: AttrType, name: &str) -> Self {
        let mut w = Writer::new(order);
        w.u16(id);
        w.u16(ty as u16);
        w.u16(name.len() as u16);
        w.bytes(name.as_bytes());
        w.pad4();
        Self(w.finish())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn id(&self, order: ByteOrder) -> u16 {
        order.u16_at(&self.0, 0)
    }

    pub fn ty(&self, order: ByteOrder) -> u16 {
        order.u16_at(&self.0, 2)
    }

    pub fn name(&self, order: ByteOrder) -> &[u8] {
        let len = order.u16_at(&self.0, 4) as usize;
        &self.0[6..6 + len]
    }
}

/// An extension record: `[u8 major][u8 minor][u16 name_len][name][pad]`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Extension(Vec<u8>);

impl Extension {
    pub fn new(order: ByteOrder, major_opcode: u8, minor_opcode: u8, name: &str) -> Self {
        let mut w = Writer::new(order);
        w.u8(major_opcode);
        w.u8(minor_opcode);
        w.u16(name.len() as u16);
        w.bytes(name.as_bytes());
        w.pad4();
        Self(w.finish())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A typed attribute value as its wire image:
/// `[u16 id][u16 value_byte_length][value][pad(value_byte_length)]`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttrRecord(Vec<u8>);

impl AttrRecord {
    fn build(order: ByteOrder, id: u16, value_len: u16, f: impl FnOnce(&mut Writer)) -> Self {
        let mut w = Writer::new(order);
        w.u16(id);
        w.u16(value_len);
        f(&mut w);
        w.pad4();
        Self(w.finish())
    }

    pub fn card8(order: ByteOrder, id: u16, value: u8) -> Self {
        Self::build(order, id, 1, |w| w.u8(value))
    }

    pub fn card16(order: ByteOrder, id: u16, value: u16) -> Self {
        Self::build(order, id, 2, |w| w.u16(value))
    }

    pub fn card32(order: ByteOrder, id: u16, value: u32) -> Self {
        Self::build(order, id, 4, |w| w.u32(value))
    }

    pub fn string8(order: ByteOrder, id: u16, value: &[u8]) -> Self {
        Self::build(order, id, value.len() as u16, |w| w.bytes(value))
    }

    /// XIMSTYLES: `[u16 count][u16 unused][u32 style...]`.
    pub fn styles(order: ByteOrder, id: u16, styles: &[InputStyle]) -> Self {
        let value_len = (4 + 4 * styles.len()) as u16;
        Self::build(order, id, value_len, |w| {
            w.u16(styles.len() as u16);
            w.u16(0);
            for style in styles {
                w.u32(style.bits());
            }
        })
    }

    pub fn rectangle(order: ByteOrder, id: u16, value: &Rectangle) -> Self {
        Self::build(order, id, 8, |w| {
            w.i16(value.x);
            w.i16(value.y);
            w.u16(value.width);
            w.u16(value.height);
        })
    }

    pub fn point(order: ByteOrder, id: u16, value: &Point) -> Self {
        Self::build(order, id, 4, |w| {
            w.i16(value.x);
            w.i16(value.y);
        })
    }

    /// XFONTSET: `[u16 name_len][name][pad(2 + name_len)]`, the trailing pad
    /// counted inside the value length.
    pub fn font_set(order: ByteOrder, id: u16, name: &[u8]) -> Self {
        let value_len = (2 + name.len() + pad4(2 + name.len())) as u16;
        Self::build(order, id, value_len, |w| {
            w.u16(name.len() as u16);
            w.bytes(name);
        })
    }

    /// XIMHOTKEYTRIGGERS: `[u32 count][triggers...][states...]` with one
    /// state word per trigger.
    pub fn hotkey_triggers(
        order: ByteOrder,
        id: u16,
        triggers: &[TriggerKey],
        states: &[HotkeyState],
    ) -> Self {
        debug_assert_eq!(triggers.len(), states.len());
        let value_len = (4 + 16 * triggers.len()) as u16;
        Self::build(order, id, value_len, |w| {
            w.u32(triggers.len() as u32);
            for key in triggers {
                w.u32(key.keysym);
                w.u32(key.modifier);
                w.u32(key.modifier_mask);
            }
            for state in states {
                w.u32(state.bits());
            }
        })
    }

    /// Wraps already-serialized value bytes.
    pub fn packed(order: ByteOrder, id: u16, value: &[u8]) -> Self {
        Self::build(order, id, value.len() as u16, |w| w.bytes(value))
    }

    /// NEST: the value is the concatenation of the element records,
    /// per-element padding included.
    pub fn nested_list(order: ByteOrder, id: u16, elements: &[AttrRecord]) -> Self {
        let value_len: usize = elements.iter().map(|e| e.as_bytes().len()).sum();
        Self::build(order, id, value_len as u16, |w| {
            for element in elements {
                w.bytes(element.as_bytes());
            }
        })
    }

    /// Copies an attribute out of a request so it can outlive the frame.
    pub fn from_wire(view: AttrView<'_>) -> Self {
        Self(view.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn id(&self, order: ByteOrder) -> u16 {
        order.u16_at(&self.0, 0)
    }

    pub fn value_len(&self, order: ByteOrder) -> u16 {
        order.u16_at(&self.0, 2)
    }

    pub fn value(&self, order: ByteOrder) -> &[u8] {
        &self.0[4..4 + self.value_len(order) as usize]
    }

    /// Reads a CARD32 value, e.g. the stored `inputStyle`.
    pub fn value_card32(&self, order: ByteOrder) -> Option<u32> {
        let value = self.value(order);
        (value.len() >= 4).then(|| order.u32_at(value, 0))
    }
}

/// String-conversion text: `[u16 type][u16 n][string][pad(n)]` followed by
/// a feedback array length, padding and the (unused) feedback words.
pub fn str_conv_text(
    order: ByteOrder,
    ty: u16,
    string: &[u8],
    feedbacks: &[Feedback],
) -> Vec<u8> {
    let mut w = Writer::new(order);
    w.u16(ty);
    w.u16(string.len() as u16);
    w.bytes(string);
    w.pad4();
    w.u16(feedbacks.len() as u16);
    w.u16(0);
    for feedback in feedbacks {
        w.u32(feedback.bits());
    }
    w.finish()
}

/// Borrowed view of one attribute inside a request payload.
#[derive(Clone, Copy, Debug)]
pub struct AttrView<'b> {
    raw: &'b [u8],
    order: ByteOrder,
}

impl<'b> AttrView<'b> {
    pub fn id(&self) -> u16 {
        self.order.u16_at(self.raw, 0)
    }

    pub fn value_len(&self) -> u16 {
        self.order.u16_at(self.raw, 2)
    }

    pub fn value(&self) -> &'b [u8] {
        &self.raw[4..4 + self.value_len() as usize]
    }

    /// The full record, padding included.
    pub fn as_bytes(&self) -> &'b [u8] {
        self.raw
    }

    /// Iterates the inner attributes of a NEST value.
    pub fn nested(&self) -> AttrIter<'b> {
        AttrIter::new(self.value(), self.order)
    }
}

/// Iterator over length-prefixed `STR` entries. Stops as soon as the
/// remaining bytes cannot hold the next entry.
#[derive(Clone)]
pub struct StrIter<'b> {
    bytes: &'b [u8],
}

impl<'b> StrIter<'b> {
    pub fn new(bytes: &'b [u8]) -> Self {
        Self { bytes }
    }
}

impl<'b> Iterator for StrIter<'b> {
    type Item = &'b [u8];

    fn next(&mut self) -> Option<&'b [u8]> {
        let (&len, rest) = self.bytes.split_first()?;
        if rest.len() < len as usize {
            return None;
        }
        let (s, rest) = rest.split_at(len as usize);
        self.bytes = rest;
        Some(s)
    }
}

/// Iterator over a `LISTofCARD16` of attribute ids.
#[derive(Clone)]
pub struct AttrIdIter<'b> {
    bytes: &'b [u8],
    order: ByteOrder,
}

impl<'b> AttrIdIter<'b> {
    pub fn new(bytes: &'b [u8], order: ByteOrder) -> Self {
        Self { bytes, order }
    }
}

impl Iterator for AttrIdIter<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        if self.bytes.len() < 2 {
            return None;
        }
        let id = self.order.u16_at(self.bytes, 0);
        self.bytes = &self.bytes[2..];
        Some(id)
    }
}

/// Iterator over a `LISTofXIMATTRIBUTE`/`LISTofXICATTRIBUTE`. Refuses to
/// yield an attribute whose declared value does not fit the remainder.
#[derive(Clone)]
pub struct AttrIter<'b> {
    bytes: &'b [u8],
    order: ByteOrder,
}

impl<'b> AttrIter<'b> {
    pub fn new(bytes: &'b [u8], order: ByteOrder) -> Self {
        Self { bytes, order }
    }
}

impl<'b> Iterator for AttrIter<'b> {
    type Item = AttrView<'b>;

    fn next(&mut self) -> Option<AttrView<'b>> {
        if self.bytes.len() < 4 {
            return None;
        }
        let value_len = self.order.u16_at(self.bytes, 2) as usize;
        let total = 4 + value_len + pad4(value_len);
        if self.bytes.len() < total {
            return None;
        }
        let (raw, rest) = self.bytes.split_at(total);
        self.bytes = rest;
        Some(AttrView {
            raw,
            order: self.order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ORDERS: [ByteOrder; 2] = [ByteOrder::Big, ByteOrder::Little];

    #[test]
    fn card_records_are_padded() {
        for order in ORDERS {
            let attr = AttrRecord::card8(order, 3, 0xab);
            assert_eq!(attr.as_bytes().len(), 8);
            assert_eq!(attr.id(order), 3);
            assert_eq!(attr.value_len(order), 1);
            assert_eq!(attr.value(order), &[0xab]);

            let attr = AttrRecord::card32(order, 0, 0x1234_5678);
            assert_eq!(attr.as_bytes().len(), 8);
            assert_eq!(attr.value_card32(order), Some(0x1234_5678));
        }
    }

    #[test]
    fn record_size_matches_value_and_pad() {
        for order in ORDERS {
            for attr in [
                AttrRecord::card8(order, 0, 1),
                AttrRecord::card16(order, 1, 2),
                AttrRecord::string8(order, 2, b"hello"),
                AttrRecord::font_set(order, 3, b"fixed"),
                AttrRecord::styles(order, 4, &[InputStyle::PREEDIT_CALLBACKS]),
            ] {
                let value_len = attr.value_len(order) as usize;
                assert_eq!(4 + value_len + pad4(value_len), attr.as_bytes().len());
            }
        }
    }

    #[test]
    fn styles_layout_little() {
        let attr = AttrRecord::styles(
            ByteOrder::Little,
            0,
            &[
                InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_CALLBACKS,
                InputStyle::PREEDIT_NOTHING | InputStyle::STATUS_NOTHING,
            ],
        );
        assert_eq!(
            attr.as_bytes(),
            [
                0, 0, // id
                12, 0, // value byte length
                2, 0, 0, 0, // count + unused
                0x02, 0x02, 0, 0, // callbacks | callbacks
                0x08, 0x04, 0, 0, // nothing | nothing
            ]
        );
    }

    #[test]
    fn spec_layout_matches_wire() {
        for order in ORDERS {
            let spec = Attr::new(order, 0, AttrType::Styles, "queryInputStyle");
            // 6-byte header + 15-byte name + pad(2 + 15)
            assert_eq!(spec.as_bytes().len(), 24);
            assert_eq!(spec.id(order), 0);
            assert_eq!(spec.ty(order), AttrType::Styles as u16);
            assert_eq!(spec.name(order), b"queryInputStyle");
        }
    }

    #[test]
    fn factory_then_iterator_round_trips() {
        for order in ORDERS {
            let built = [
                AttrRecord::card32(order, 0, 42),
                AttrRecord::string8(order, 1, b"abc"),
                AttrRecord::point(order, 2, &Point { x: -1, y: 7 }),
            ];
            let mut bytes = Vec::new();
            for attr in &built {
                bytes.extend_from_slice(attr.as_bytes());
            }

            let walked: Vec<_> = AttrIter::new(&bytes, order).collect();
            assert_eq!(walked.len(), built.len());
            for (view, attr) in walked.iter().zip(&built) {
                assert_eq!(view.id(), attr.id(order));
                assert_eq!(view.value(), attr.value(order));
                assert_eq!(view.as_bytes(), attr.as_bytes());
            }
        }
    }

    #[test]
    fn nested_list_reproduces_elements() {
        for order in ORDERS {
            let inner = [
                AttrRecord::card32(order, 5, 0xdead_beef),
                AttrRecord::string8(order, 6, b"spot"),
            ];
            let nest = AttrRecord::nested_list(order, 7, &inner);

            let mut bytes = Vec::new();
            bytes.extend_from_slice(nest.as_bytes());
            let view = AttrIter::new(&bytes, order).next().unwrap();
            assert_eq!(view.id(), 7);

            let walked: Vec<_> = view.nested().collect();
            assert_eq!(walked.len(), inner.len());
            for (view, attr) in walked.iter().zip(&inner) {
                assert_eq!(view.id(), attr.id(order));
                assert_eq!(view.value(), attr.value(order));
            }
        }
    }

    #[test]
    fn attr_iter_refuses_truncated_tail() {
        let order = ByteOrder::Little;
        let attr = AttrRecord::card32(order, 0, 1);
        let mut bytes = attr.as_bytes().to_vec();
        bytes.extend_from_slice(&[1, 0, 8, 0, 0xff]); // claims 8 value bytes, has 1

        let walked: Vec<_> = AttrIter::new(&bytes, order).collect();
        assert_eq!(walked.len(), 1);
        assert_eq!(walked[0].id(), 0);
    }

    #[test]
    fn str_iter_refuses_truncated_tail() {
        let mut bytes = Vec::new();
        bytes.push(5);
        bytes.extend_from_slice(b"UTF-8");
        bytes.push(9); // claims 9 bytes, stream ends
        bytes.extend_from_slice(b"GB");

        let strs: Vec<_> = StrIter::new(&bytes).collect();
        assert_eq!(strs, [&b"UTF-8"[..]]);
    }

    #[test]
    fn attr_id_iter_ignores_odd_tail() {
        let ids: Vec<_> = AttrIdIter::new(&[1, 0, 2, 0, 9], ByteOrder::Little).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn hotkey_triggers_layout() {
        let order = ByteOrder::Big;
        let attr = AttrRecord::hotkey_triggers(
            order,
            9,
            &[TriggerKey {
                keysym: 0x20,
                modifier: 0x4,
                modifier_mask: 0x4,
            }],
            &[HotkeyState::ON],
        );
        assert_eq!(attr.value_len(order), 4 + 16);
        let value = attr.value(order);
        assert_eq!(order.u32_at(value, 0), 1);
        assert_eq!(order.u32_at(value, 4), 0x20);
        assert_eq!(order.u32_at(value, 16), HotkeyState::ON.bits());
    }
}
