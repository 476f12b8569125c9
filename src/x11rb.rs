//! Window-system provider backed by [`x11rb`].
//!
//! Wrap anything implementing [`HasConnection`] in an [`X11rbProvider`] and
//! hand it to [`XimServer`](crate::server::XimServer); [`convert_event`]
//! narrows the x11rb event stream down to the events the dispatcher
//! consumes.

use std::rc::Rc;
use std::sync::Arc;

use x11rb::{
    connection::Connection,
    errors::{ConnectionError, ReplyError, ReplyOrIdError},
    protocol::{
        xproto::{
            ClientMessageEvent, ConnectionExt, CreateWindowAux, EventMask, SelectionNotifyEvent,
            WindowClass, CLIENT_MESSAGE_EVENT, SELECTION_NOTIFY_EVENT,
        },
        Event,
    },
    rust_connection::RustConnection,
    wrapper::ConnectionExt as _,
    COPY_DEPTH_FROM_PARENT, CURRENT_TIME,
};

use crate::provider::{
    Atom, ClientMessage, ClientMessageData, PropMode, PropertyValue, SelectionRequest, Window,
    XEvent, XProvider,
};

pub trait HasConnection {
    type Connection: Connection + ConnectionExt;

    fn conn(&self) -> &Self::Connection;
}

impl HasConnection for RustConnection {
    type Connection = Self;

    #[inline(always)]
    fn conn(&self) -> &Self::Connection {
        self
    }
}

impl<'x, C: HasConnection> HasConnection for &'x C {
    type Connection = C::Connection;

    #[inline(always)]
    fn conn(&self) -> &Self::Connection {
        (**self).conn()
    }
}

impl<C: HasConnection> HasConnection for Rc<C> {
    type Connection = C::Connection;

    #[inline(always)]
    fn conn(&self) -> &Self::Connection {
        (**self).conn()
    }
}

impl<C: HasConnection> HasConnection for Arc<C> {
    type Connection = C::Connection;

    #[inline(always)]
    fn conn(&self) -> &Self::Connection {
        (**self).conn()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum X11rbError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Reply(#[from] ReplyError),
    #[error(transparent)]
    ReplyOrId(#[from] ReplyOrIdError),
}

pub struct X11rbProvider<C: HasConnection> {
    has_conn: C,
    root: Window,
    root_visual: u32,
}

impl<C: HasConnection> X11rbProvider<C> {
    pub fn new(has_conn: C, screen_num: usize) -> Self {
        let screen = &has_conn.conn().setup().roots[screen_num];
        let root = screen.root;
        let root_visual = screen.root_visual;
        Self {
            has_conn,
            root,
            root_visual,
        }
    }

    pub fn conn(&self) -> &C::Connection {
        self.has_conn.conn()
    }
}

impl<C: HasConnection> XProvider for X11rbProvider<C> {
    type Error = X11rbError;

    fn root(&self) -> Window {
        self.root
    }

    fn intern_atom(&self, name: &str) -> Result<Atom, X11rbError> {
        Ok(self
            .conn()
            .intern_atom(false, name.as_bytes())?
            .reply()?
            .atom)
    }

    fn create_window(&self) -> Result<Window, X11rbError> {
        let window = self.conn().generate_id()?;
        self.conn().create_window(
            COPY_DEPTH_FROM_PARENT,
            window,
            self.root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            self.root_visual,
            &CreateWindowAux::default(),
        )?;
        Ok(window)
    }

    fn destroy_window(&self, window: Window) -> Result<(), X11rbError> {
        self.conn().destroy_window(window)?;
        Ok(())
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        ty: Atom,
        delete: bool,
    ) -> Result<Option<PropertyValue>, X11rbError> {
        let reply = self
            .conn()
            .get_property(delete, window, property, ty, 0, u32::MAX)?
            .reply()?;
        if reply.type_ == x11rb::NONE {
            return Ok(None);
        }
        Ok(Some(PropertyValue {
            ty: reply.type_,
            format: reply.format,
            value: reply.value,
        }))
    }

    fn change_property8(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        ty: Atom,
        data: &[u8],
    ) -> Result<(), X11rbError> {
        self.conn()
            .change_property8(convert_prop_mode(mode), window, property, ty, data)?;
        Ok(())
    }

    fn change_property32(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        ty: Atom,
        data: &[u32],
    ) -> Result<(), X11rbError> {
        self.conn()
            .change_property32(convert_prop_mode(mode), window, property, ty, data)?;
        Ok(())
    }

    fn selection_owner(&self, selection: Atom) -> Result<Window, X11rbError> {
        Ok(self.conn().get_selection_owner(selection)?.reply()?.owner)
    }

    fn set_selection_owner(&self, owner: Window, selection: Atom) -> Result<(), X11rbError> {
        self.conn()
            .set_selection_owner(owner, selection, CURRENT_TIME)?;
        Ok(())
    }

    fn send_client_message(
        &self,
        window: Window,
        message_type: Atom,
        data: ClientMessageData,
    ) -> Result<(), X11rbError> {
        let (format, data) = match data {
            ClientMessageData::Data8(bytes) => (8, bytes.into()),
            ClientMessageData::Data32(words) => (32, words.into()),
        };
        self.conn().send_event(
            false,
            window,
            EventMask::NO_EVENT,
            ClientMessageEvent {
                response_type: CLIENT_MESSAGE_EVENT,
                format,
                sequence: 0,
                window,
                type_: message_type,
                data,
            },
        )?;
        Ok(())
    }

    fn send_selection_notify(&self, request: &SelectionRequest) -> Result<(), X11rbError> {
        self.conn().send_event(
            false,
            request.requestor,
            EventMask::NO_EVENT,
            SelectionNotifyEvent {
                response_type: SELECTION_NOTIFY_EVENT,
                sequence: 0,
                time: request.time,
                requestor: request.requestor,
                selection: request.selection,
                target: request.target,
                property: request.property,
            },
        )?;
        Ok(())
    }

    fn flush(&self) -> Result<(), X11rbError> {
        self.conn().flush()?;
        Ok(())
    }
}

fn convert_prop_mode(mode: PropMode) -> x11rb::protocol::xproto::PropMode {
    match mode {
        PropMode::Replace => x11rb::protocol::xproto::PropMode::REPLACE,
        PropMode::Prepend => x11rb::protocol::xproto::PropMode::PREPEND,
        PropMode::Append => x11rb::protocol::xproto::PropMode::APPEND,
    }
}

/// Narrows an x11rb event to the dispatcher's input. Returns `None` for
/// event types the input method service never consumes.
pub fn convert_event(event: &Event) -> Option<XEvent> {
    match event {
        Event::ClientMessage(msg) => {
            let data = match msg.format {
                8 => ClientMessageData::Data8(msg.data.as_data8()),
                32 => ClientMessageData::Data32(msg.data.as_data32()),
                _ => return None,
            };
            Some(XEvent::ClientMessage(ClientMessage {
                window: msg.window,
                message_type: msg.type_,
                data,
            }))
        }
        Event::SelectionRequest(request) => Some(XEvent::SelectionRequest(SelectionRequest {
            time: request.time,
            owner: request.owner,
            requestor: request.requestor,
            selection: request.selection,
            target: request.target,
            property: request.property,
        })),
        _ => None,
    }
}
