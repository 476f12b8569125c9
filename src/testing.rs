//! In-memory providers used by the server and engine tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::Infallible;

use ximd_wire::ByteOrder;

use crate::provider::{
    Atom, ClientMessage, ClientMessageData, PropMode, PropertyValue, SelectionRequest,
    TextInputProvider, TextSession, Window, XEvent, XProvider, WINDOW_NONE,
};
use crate::server::{XimServer, TRANSPORT_MAX};

/// Recording window-system stand-in. Windows and atoms are handed out from
/// counters; properties, selection owners and sent client messages are kept
/// for assertions.
#[derive(Default)]
pub(crate) struct MockX {
    atoms: RefCell<HashMap<String, Atom>>,
    next_atom: RefCell<Atom>,
    next_window: RefCell<Window>,
    properties: RefCell<HashMap<(Window, Atom), PropertyValue>>,
    selection_owners: RefCell<HashMap<Atom, Window>>,
    messages: RefCell<Vec<(Window, Atom, ClientMessageData)>>,
    notifies: RefCell<Vec<SelectionRequest>>,
}

impl MockX {
    pub fn new() -> Self {
        Self {
            next_atom: RefCell::new(100),
            next_window: RefCell::new(1000),
            ..Self::default()
        }
    }

    /// Looks an atom up without interning it.
    pub fn atom(&self, name: &str) -> Option<Atom> {
        self.atoms.borrow().get(name).copied()
    }

    pub fn last_client_message(&self) -> Option<(Window, Atom, ClientMessageData)> {
        self.messages.borrow().last().copied()
    }

    pub fn selection_notifies(&self) -> usize {
        self.notifies.borrow().len()
    }

    /// All `_XIM_PROTOCOL` frames written so far, property staging resolved
    /// and embedded payloads trimmed to their declared length.
    pub fn sent_frames(&self, order: ByteOrder) -> Vec<Vec<u8>> {
        let protocol = match self.atom("_XIM_PROTOCOL") {
            Some(atom) => atom,
            None => return Vec::new(),
        };

        self.messages
            .borrow()
            .iter()
            .filter(|(_, ty, _)| *ty == protocol)
            .map(|(window, _, data)| match data {
                ClientMessageData::Data8(bytes) => {
                    let declared = order.u16_at(bytes, 2) as usize * 4 + 4;
                    bytes[..declared.min(bytes.len())].to_vec()
                }
                ClientMessageData::Data32(words) => self
                    .properties
                    .borrow()
                    .get(&(*window, words[1]))
                    .map(|prop| prop.value.clone())
                    .expect("staged frame property missing"),
            })
            .collect()
    }
}

impl XProvider for MockX {
    type Error = Infallible;

    fn root(&self) -> Window {
        1
    }

    fn intern_atom(&self, name: &str) -> Result<Atom, Infallible> {
        if let Some(atom) = self.atom(name) {
            return Ok(atom);
        }
        let mut next = self.next_atom.borrow_mut();
        let atom = *next;
        *next += 1;
        self.atoms.borrow_mut().insert(name.to_owned(), atom);
        Ok(atom)
    }

    fn create_window(&self) -> Result<Window, Infallible> {
        let mut next = self.next_window.borrow_mut();
        let window = *next;
        *next += 1;
        Ok(window)
    }

    fn destroy_window(&self, _window: Window) -> Result<(), Infallible> {
        Ok(())
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        _ty: Atom,
        delete: bool,
    ) -> Result<Option<PropertyValue>, Infallible> {
        let mut properties = self.properties.borrow_mut();
        let value = if delete {
            properties.remove(&(window, property))
        } else {
            properties.get(&(window, property)).cloned()
        };
        Ok(value)
    }

    fn change_property8(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        ty: Atom,
        data: &[u8],
    ) -> Result<(), Infallible> {
        self.change_property(mode, window, property, ty, 8, data);
        Ok(())
    }

    fn change_property32(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        ty: Atom,
        data: &[u32],
    ) -> Result<(), Infallible> {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_ne_bytes()).collect();
        self.change_property(mode, window, property, ty, 32, &bytes);
        Ok(())
    }

    fn selection_owner(&self, selection: Atom) -> Result<Window, Infallible> {
        Ok(self
            .selection_owners
            .borrow()
            .get(&selection)
            .copied()
            .unwrap_or(WINDOW_NONE))
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom) -> Result<(), Infallible> {
        self.selection_owners.borrow_mut().insert(selection, owner);
        Ok(())
    }

    fn send_client_message(
        &self,
        window: Window,
        message_type: Atom,
        data: ClientMessageData,
    ) -> Result<(), Infallible> {
        self.messages.borrow_mut().push((window, message_type, data));
        Ok(())
    }

    fn send_selection_notify(&self, request: &SelectionRequest) -> Result<(), Infallible> {
        self.notifies.borrow_mut().push(*request);
        Ok(())
    }

    fn flush(&self) -> Result<(), Infallible> {
        Ok(())
    }
}

impl MockX {
    fn change_property(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        ty: Atom,
        format: u8,
        data: &[u8],
    ) {
        let mut properties = self.properties.borrow_mut();
        let entry = properties
            .entry((window, property))
            .or_insert_with(|| PropertyValue {
                ty,
                format,
                value: Vec::new(),
            });
        match mode {
            PropMode::Replace => entry.value = data.to_vec(),
            PropMode::Prepend => {
                let mut value = data.to_vec();
                value.extend_from_slice(&entry.value);
                entry.value = value;
            }
            PropMode::Append => entry.value.extend_from_slice(data),
        }
        entry.ty = ty;
        entry.format = format;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TextOp {
    Create(TextSession),
    Destroy(TextSession),
    ShowPanel(TextSession),
    Activate(TextSession),
    Deactivate(TextSession),
    Flush,
}

/// Recording text-input stand-in.
#[derive(Default)]
pub(crate) struct MockText {
    next_session: TextSession,
    pub ops: Vec<TextOp>,
}

impl TextInputProvider for MockText {
    type Error = Infallible;

    fn create_session(&mut self) -> Result<TextSession, Infallible> {
        self.next_session += 1;
        self.ops.push(TextOp::Create(self.next_session));
        Ok(self.next_session)
    }

    fn destroy_session(&mut self, session: TextSession) {
        self.ops.push(TextOp::Destroy(session));
    }

    fn show_input_panel(&mut self, session: TextSession) -> Result<(), Infallible> {
        self.ops.push(TextOp::ShowPanel(session));
        Ok(())
    }

    fn hide_input_panel(&mut self, _session: TextSession) -> Result<(), Infallible> {
        Ok(())
    }

    fn activate(&mut self, session: TextSession) -> Result<(), Infallible> {
        self.ops.push(TextOp::Activate(session));
        Ok(())
    }

    fn deactivate(&mut self, session: TextSession) -> Result<(), Infallible> {
        self.ops.push(TextOp::Deactivate(session));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        self.ops.push(TextOp::Flush);
        Ok(())
    }
}

/// A minimal `CONNECT` frame announcing the given byte order.
pub(crate) fn connect_frame(order: ByteOrder) -> Vec<u8> {
    let mut frame = vec![ximd_wire::opcode::CONNECT, 0];
    frame.extend_from_slice(&order.u16_bytes(2));
    frame.push(order.marker());
    frame.push(0);
    frame.extend_from_slice(&order.u16_bytes(1)); // client major
    frame.extend_from_slice(&order.u16_bytes(0)); // client minor
    frame.extend_from_slice(&order.u16_bytes(0)); // auth list byte length
    frame
}

pub(crate) fn client_message32(window: Window, message_type: Atom, words: [u32; 5]) -> XEvent {
    XEvent::ClientMessage(ClientMessage {
        window,
        message_type,
        data: ClientMessageData::Data32(words),
    })
}

/// Wraps a frame in an embedded `_XIM_PROTOCOL` message to `server_window`.
pub(crate) fn protocol_message8(
    server: &XimServer<MockX>,
    server_window: Window,
    frame: &[u8],
) -> XEvent {
    assert!(frame.len() <= TRANSPORT_MAX);
    let mut data = [0u8; TRANSPORT_MAX];
    data[..frame.len()].copy_from_slice(frame);
    XEvent::ClientMessage(ClientMessage {
        window: server_window,
        message_type: server.x().atom("_XIM_PROTOCOL").unwrap(),
        data: ClientMessageData::Data8(data),
    })
}
