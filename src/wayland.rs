//! Text-input provider backed by [`wayland-client`] speaking
//! `zwp_text_input_v1`, the protocol generation that still carries
//! per-update preedit styling.
//!
//! Each session owns one text-input object and one surface; callbacks are
//! collected into an event queue the caller drains with
//! [`WaylandTextInput::poll_event`] between dispatches.

use std::collections::VecDeque;

use ahash::AHashMap;
use wayland_client::{
    backend::{ReadEventsGuard, WaylandError},
    globals::{registry_queue_init, BindError, GlobalError, GlobalListContents},
    protocol::{
        wl_compositor::WlCompositor,
        wl_registry::WlRegistry,
        wl_seat::WlSeat,
        wl_surface::WlSurface,
    },
    ConnectError, Connection, Dispatch, DispatchError, EventQueue, Proxy, QueueHandle, WEnum,
};
use wayland_protocols::wp::text_input::zv1::client::{
    zwp_text_input_manager_v1::{self, ZwpTextInputManagerV1},
    zwp_text_input_v1::{self, ZwpTextInputV1},
};

use crate::provider::{
    PreeditStyle, TextInputEvent, TextInputEventKind, TextInputProvider, TextSession,
};

#[derive(Debug, thiserror::Error)]
pub enum WaylandTextInputError {
    #[error("can't connect to the wayland display: {0}")]
    Connect(#[from] ConnectError),
    #[error("wayland registry error: {0}")]
    Global(#[from] GlobalError),
    #[error("required wayland global missing: {0}")]
    Bind(#[from] BindError),
    #[error("wayland dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("wayland connection error: {0}")]
    Backend(#[from] WaylandError),
}

struct Session {
    text_input: ZwpTextInputV1,
    surface: WlSurface,
}

/// Per-proxy user data carrying the session handle.
struct SessionData(TextSession);

/// Dispatch target: collected callback events plus the outbound serial of
/// every session, bumped and committed on `enter`.
#[derive(Default)]
pub struct State {
    events: VecDeque<TextInputEvent>,
    serials: AHashMap<TextSession, u32>,
}

pub struct WaylandTextInput {
    conn: Connection,
    queue: EventQueue<State>,
    qh: QueueHandle<State>,
    compositor: WlCompositor,
    seat: WlSeat,
    manager: ZwpTextInputManagerV1,
    state: State,
    sessions: AHashMap<TextSession, Session>,
    next_session: TextSession,
}

impl WaylandTextInput {
    /// Connects to the compositor named by the environment and binds the
    /// seat, compositor and text-input manager globals.
    pub fn connect() -> Result<Self, WaylandTextInputError> {
        let conn = Connection::connect_to_env()?;
        let (globals, queue) = registry_queue_init::<State>(&conn)?;
        let qh = queue.handle();

        let compositor: WlCompositor = globals.bind(&qh, 1..=4, ())?;
        let seat: WlSeat = globals.bind(&qh, 1..=1, ())?;
        let manager: ZwpTextInputManagerV1 = globals.bind(&qh, 1..=1, ())?;

        log::info!("bound text input manager on seat {:?}", seat.id());

        Ok(Self {
            conn,
            queue,
            qh,
            compositor,
            seat,
            manager,
            state: State::default(),
            sessions: AHashMap::new(),
            next_session: 0,
        })
    }

    /// Dispatches events already read from the socket into the internal
    /// queue.
    pub fn dispatch_pending(&mut self) -> Result<usize, WaylandTextInputError> {
        Ok(self.queue.dispatch_pending(&mut self.state)?)
    }

    /// Next collected callback, if any.
    pub fn poll_event(&mut self) -> Option<TextInputEvent> {
        self.state.events.pop_front()
    }

    /// Starts a socket read; the guard exposes the connection fd to poll
    /// on. `None` means events are already pending, dispatch those first.
    pub fn prepare_read(&mut self) -> Option<ReadEventsGuard> {
        self.queue.prepare_read()
    }
}

impl TextInputProvider for WaylandTextInput {
    type Error = WaylandTextInputError;

    fn create_session(&mut self) -> Result<TextSession, WaylandTextInputError> {
        self.next_session += 1;
        let session = self.next_session;

        let surface = self.compositor.create_surface(&self.qh, ());
        let text_input = self
            .manager
            .create_text_input(&self.qh, SessionData(session));

        self.sessions.insert(
            session,
            Session {
                text_input,
                surface,
            },
        );
        self.state.serials.insert(session, 0);
        log::debug!("created text input session {}", session);
        Ok(session)
    }

    fn destroy_session(&mut self, session: TextSession) {
        if let Some(removed) = self.sessions.remove(&session) {
            removed.text_input.deactivate(&self.seat);
            removed.surface.destroy();
            self.state.serials.remove(&session);
            log::debug!("destroyed text input session {}", session);
        }
    }

    fn show_input_panel(&mut self, session: TextSession) -> Result<(), WaylandTextInputError> {
        if let Some(session) = self.sessions.get(&session) {
            session.text_input.show_input_panel();
        }
        Ok(())
    }

    fn hide_input_panel(&mut self, session: TextSession) -> Result<(), WaylandTextInputError> {
        if let Some(session) = self.sessions.get(&session) {
            session.text_input.hide_input_panel();
        }
        Ok(())
    }

    fn activate(&mut self, session: TextSession) -> Result<(), WaylandTextInputError> {
        if let Some(session) = self.sessions.get(&session) {
            session.text_input.activate(&self.seat, &session.surface);
        }
        Ok(())
    }

    fn deactivate(&mut self, session: TextSession) -> Result<(), WaylandTextInputError> {
        if let Some(session) = self.sessions.get(&session) {
            session.text_input.deactivate(&self.seat);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WaylandTextInputError> {
        self.conn.flush()?;
        Ok(())
    }
}

impl Dispatch<WlRegistry, GlobalListContents> for State {
    fn event(
        _state: &mut Self,
        _registry: &WlRegistry,
        _event: wayland_client::protocol::wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<WlCompositor, ()> for State {
    fn event(
        _state: &mut Self,
        _compositor: &WlCompositor,
        _event: wayland_client::protocol::wl_compositor::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<WlSeat, ()> for State {
    fn event(
        _state: &mut Self,
        _seat: &WlSeat,
        _event: wayland_client::protocol::wl_seat::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<WlSurface, ()> for State {
    fn event(
        _state: &mut Self,
        _surface: &WlSurface,
        _event: wayland_client::protocol::wl_surface::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwpTextInputManagerV1, ()> for State {
    fn event(
        _state: &mut Self,
        _manager: &ZwpTextInputManagerV1,
        _event: zwp_text_input_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwpTextInputV1, SessionData> for State {
    fn event(
        state: &mut Self,
        text_input: &ZwpTextInputV1,
        event: zwp_text_input_v1::Event,
        data: &SessionData,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let session = data.0;
        match event {
            zwp_text_input_v1::Event::Enter { .. } => {
                let serial = state.serials.entry(session).or_insert(0);
                *serial += 1;
                text_input.commit_state(*serial);
            }
            zwp_text_input_v1::Event::PreeditString { text, commit, .. } => {
                state.events.push_back(TextInputEvent {
                    session,
                    kind: TextInputEventKind::PreeditString { text, commit },
                });
            }
            zwp_text_input_v1::Event::PreeditStyling {
                index,
                length,
                style,
            } => {
                let style = match style {
                    WEnum::Value(style) => convert_style(style),
                    WEnum::Unknown(code) => {
                        log::trace!("unknown preedit style code {}", code);
                        return;
                    }
                };
                state.events.push_back(TextInputEvent {
                    session,
                    kind: TextInputEventKind::PreeditStyling {
                        index,
                        length,
                        style,
                    },
                });
            }
            zwp_text_input_v1::Event::PreeditCursor { index } => {
                state.events.push_back(TextInputEvent {
                    session,
                    kind: TextInputEventKind::PreeditCursor { index },
                });
            }
            zwp_text_input_v1::Event::CommitString { text, .. } => {
                state.events.push_back(TextInputEvent {
                    session,
                    kind: TextInputEventKind::CommitString { text },
                });
            }
            // Keyboard input reaches the input method directly under the
            // compositor; nothing here feeds back into the XIM stream.
            _ => {}
        }
    }
}

fn convert_style(style: zwp_text_input_v1::PreeditStyle) -> PreeditStyle {
    match style {
        zwp_text_input_v1::PreeditStyle::Default => PreeditStyle::Default,
        zwp_text_input_v1::PreeditStyle::None => PreeditStyle::None,
        zwp_text_input_v1::PreeditStyle::Active => PreeditStyle::Active,
        zwp_text_input_v1::PreeditStyle::Inactive => PreeditStyle::Inactive,
        zwp_text_input_v1::PreeditStyle::Highlight => PreeditStyle::Highlight,
        zwp_text_input_v1::PreeditStyle::Underline => PreeditStyle::Underline,
        zwp_text_input_v1::PreeditStyle::Selection => PreeditStyle::Selection,
        zwp_text_input_v1::PreeditStyle::Incorrect => PreeditStyle::Incorrect,
        _ => PreeditStyle::Default,
    }
}
