//! XIM server protocol engine driving a compositor text-input service.
//!
//! Classic X clients speak the XIM protocol at this crate's [`server`]
//! layer; the [`engine`] layer owns the input-method and input-context
//! session objects and translates between XIM requests and the preedit /
//! commit callback surface of a compositor text-input provider. The two
//! concrete providers live in [`x11rb`] and [`wayland`] behind features.

pub mod engine;
pub mod error;
pub mod provider;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "wayland-provider")]
pub mod wayland;
#[cfg(feature = "x11rb-provider")]
pub mod x11rb;

pub use crate::engine::{Engine, InputContext, InputMethod};
pub use crate::error::Error;
pub use crate::provider::{
    Atom, ClientMessageData, PreeditStyle, SelectionRequest, TextInputEvent, TextInputEventKind,
    TextInputProvider, TextSession, Window, XEvent, XProvider,
};
pub use crate::server::{Dispatch, Transport, XimServer};
pub use ximd_wire as wire;

#[allow(non_snake_case)]
#[derive(Copy, Clone, Debug)]
pub(crate) struct Atoms<Atom> {
    pub XIM_SERVERS: Atom,
    pub XIM_XCONNECT: Atom,
    #[allow(unused)]
    pub XIM_MOREDATA: Atom,
    pub XIM_PROTOCOL: Atom,
    pub LOCALES: Atom,
    pub TRANSPORT: Atom,
}

impl<Atom> Atoms<Atom> {
    pub fn new<E, F>(f: F) -> Result<Self, E>
    where
        F: Fn(&'static str) -> Result<Atom, E>,
    {
        Ok(Self {
            XIM_SERVERS: f("XIM_SERVERS")?,
            XIM_XCONNECT: f("_XIM_XCONNECT")?,
            XIM_MOREDATA: f("_XIM_MOREDATA")?,
            XIM_PROTOCOL: f("_XIM_PROTOCOL")?,
            LOCALES: f("LOCALES")?,
            TRANSPORT: f("TRANSPORT")?,
        })
    }
}
