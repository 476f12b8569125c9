//! XIM session objects and the preedit state machine.
//!
//! Input methods are keyed by `(transport, id)` and own their input
//! contexts; both carry fixed tables of attribute records stored as wire
//! images in the owning transport's byte order, so set-values copies raw
//! bytes in and get-values copies them back out. Text-input callbacks are
//! routed by session handle and drive `PREEDIT_START/DRAW/CARET/DONE` and
//! `COMMIT` on the XIM side.

use ximd_wire::{
    frames, opcode, Attr, AttrIter, AttrRecord, AttrType, ByteOrder, CaretDirection, CaretStyle,
    CommitFlag, Feedback, InputStyle,
};

use crate::error::Error;
use crate::provider::{
    PreeditStyle, TextInputEvent, TextInputEventKind, TextInputProvider, TextSession, Window,
    XEvent, XProvider,
};
use crate::server::{Dispatch, RequestContainer, XimServer};

const IM_ATTRIBUTES: [(&str, AttrType); 1] = [("queryInputStyle", AttrType::Styles)];

const IC_ATTRIBUTES: [(&str, AttrType); 6] = [
    ("inputStyle", AttrType::Card32),
    ("filterEvents", AttrType::Card32),
    ("clientWindow", AttrType::Window),
    ("focusWindow", AttrType::Window),
    ("preeditAttributes", AttrType::NestedList),
    ("statusAttributes", AttrType::NestedList),
];

const QUERY_INPUT_STYLE: u16 = 0;
const INPUT_STYLE: u16 = 0;
const FILTER_EVENTS: u16 = 1;
const CLIENT_WINDOW: u16 = 2;
const FOCUS_WINDOW: u16 = 3;

/// Styles offered through `queryInputStyle`.
fn advertised_styles() -> [InputStyle; 3] {
    [
        InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_CALLBACKS,
        InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_NOTHING,
        InputStyle::PREEDIT_NOTHING | InputStyle::STATUS_NOTHING,
    ]
}

/// The keysym reported alongside committed strings.
const COMMIT_KEYSYM: u32 = 0xffffff;

#[derive(Clone, Copy, Debug)]
struct StylingRun {
    index: u32,
    length: u32,
    feedback: Feedback,
}

pub struct InputContext {
    id: u16,
    session: TextSession,
    attrs: [Option<AttrRecord>; IC_ATTRIBUTES.len()],
    preedit_started: bool,
    preedit: String,
    caret: i32,
    stylings: Vec<StylingRun>,
}

impl InputContext {
    fn new(order: ByteOrder, id: u16, session: TextSession) -> Self {
        let default_style = InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_CALLBACKS;
        let mut attrs: [Option<AttrRecord>; IC_ATTRIBUTES.len()] = Default::default();
        attrs[INPUT_STYLE as usize] =
            Some(AttrRecord::card32(order, INPUT_STYLE, default_style.bits()));
        attrs[FILTER_EVENTS as usize] = Some(AttrRecord::card32(order, FILTER_EVENTS, 0));
        attrs[CLIENT_WINDOW as usize] = Some(AttrRecord::card32(order, CLIENT_WINDOW, 0));
        attrs[FOCUS_WINDOW as usize] = Some(AttrRecord::card32(order, FOCUS_WINDOW, 0));

        Self {
            id,
            session,
            attrs,
            preedit_started: false,
            preedit: String::new(),
            caret: 0,
            stylings: Vec::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn session(&self) -> TextSession {
        self.session
    }

    pub fn preedit(&self) -> &str {
        &self.preedit
    }

    pub fn preedit_started(&self) -> bool {
        self.preedit_started
    }

    pub fn caret(&self) -> i32 {
        self.caret
    }

    pub fn input_style(&self, order: ByteOrder) -> InputStyle {
        self.attrs[INPUT_STYLE as usize]
            .as_ref()
            .and_then(|attr| attr.value_card32(order))
            .map(InputStyle::from_bits_truncate)
            .unwrap_or_else(InputStyle::empty)
    }
}

pub struct InputMethod {
    id: u16,
    transport: Window,
    order: ByteOrder,
    ic_counter: u16,
    specs: Vec<Attr>,
    attrs: [Option<AttrRecord>; IM_ATTRIBUTES.len()],
    ic_specs: Vec<Attr>,
    input_contexts: Vec<InputContext>,
}

impl InputMethod {
    fn new(order: ByteOrder, transport: Window, id: u16) -> Self {
        let specs = IM_ATTRIBUTES
            .iter()
            .enumerate()
            .map(|(id, (name, ty))| Attr::new(order, id as u16, *ty, name))
            .collect();
        let ic_specs = IC_ATTRIBUTES
            .iter()
            .enumerate()
            .map(|(id, (name, ty))| Attr::new(order, id as u16, *ty, name))
            .collect();

        let mut attrs: [Option<AttrRecord>; IM_ATTRIBUTES.len()] = Default::default();
        attrs[QUERY_INPUT_STYLE as usize] = Some(AttrRecord::styles(
            order,
            QUERY_INPUT_STYLE,
            &advertised_styles(),
        ));

        Self {
            id,
            transport,
            order,
            ic_counter: 0,
            specs,
            attrs,
            ic_specs,
            input_contexts: Vec::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn transport(&self) -> Window {
        self.transport
    }

    pub fn input_contexts(&self) -> &[InputContext] {
        &self.input_contexts
    }

    fn ic(&self, id: u16) -> Result<&InputContext, Error> {
        self.input_contexts
            .iter()
            .find(|ic| ic.id == id)
            .ok_or(Error::UnknownInputContext(id))
    }

    fn ic_mut(&mut self, id: u16) -> Result<&mut InputContext, Error> {
        self.input_contexts
            .iter_mut()
            .find(|ic| ic.id == id)
            .ok_or(Error::UnknownInputContext(id))
    }

    fn remove_ic(&mut self, id: u16) -> Result<InputContext, Error> {
        let index = self
            .input_contexts
            .iter()
            .position(|ic| ic.id == id)
            .ok_or(Error::UnknownInputContext(id))?;
        Ok(self.input_contexts.swap_remove(index))
    }
}

fn find_im<'a>(
    input_methods: &'a mut [InputMethod],
    transport: Window,
    id: u16,
) -> Result<&'a mut InputMethod, Error> {
    input_methods
        .iter_mut()
        .find(|im| im.transport == transport && im.id == id)
        .ok_or(Error::UnknownInputMethod(id))
}

/// Copies every known attribute of the request into its table slot.
/// Unknown ids are skipped.
fn set_values(table: &mut [Option<AttrRecord>], attributes: AttrIter<'_>) {
    for attribute in attributes {
        let id = attribute.id() as usize;
        if id >= table.len() {
            log::warn!("ignoring unknown attribute id {}", attribute.id());
            continue;
        }
        table[id] = Some(AttrRecord::from_wire(attribute));
    }
}

/// Collects the stored records for the requested ids, keeping request
/// order. Unknown and unset ids are dropped.
fn get_values<'a>(
    table: &'a [Option<AttrRecord>],
    ids: impl Iterator<Item = u16>,
) -> Vec<&'a AttrRecord> {
    let mut out = Vec::new();
    for id in ids {
        match table.get(id as usize) {
            Some(Some(attr)) => out.push(attr),
            _ => log::debug!("dropping unknown attribute id {}", id),
        }
    }
    out
}

fn feedback_of(style: PreeditStyle) -> Option<Feedback> {
    match style {
        PreeditStyle::Highlight => Some(Feedback::HIGHLIGHT),
        PreeditStyle::Underline => Some(Feedback::UNDERLINE),
        PreeditStyle::Active => Some(Feedback::PRIMARY),
        PreeditStyle::Inactive => Some(Feedback::SECONDARY),
        PreeditStyle::Selection => Some(Feedback::REVERSE),
        PreeditStyle::Default | PreeditStyle::None | PreeditStyle::Incorrect => None,
    }
}

/// Redraws (or clears) the preedit of one input context and keeps its
/// state in sync. Pending styling runs are consumed by the redraw;
/// out-of-range runs never reach the feedback array.
fn update_preedit<X: XProvider>(
    server: &mut XimServer<X>,
    transport: Window,
    order: ByteOrder,
    input_method_id: u16,
    ic: &mut InputContext,
    text: &str,
) -> Result<(), Error> {
    if text.is_empty() {
        server.send(
            transport,
            &frames::preedit_draw(
                order,
                input_method_id,
                ic.id,
                0,
                0,
                ic.preedit.len() as i32,
                0,
                b"",
                &[],
            ),
        )?;
        if ic.preedit_started {
            server.send(transport, &frames::preedit_done(order, input_method_id, ic.id))?;
            ic.preedit_started = false;
        }
        ic.preedit.clear();
        ic.caret = 0;
        ic.stylings.clear();
    } else {
        if !ic.preedit_started {
            server.send(
                transport,
                &frames::preedit_start(order, input_method_id, ic.id),
            )?;
            ic.preedit_started = true;
        }

        let mut feedbacks = vec![Feedback::empty(); text.len()];
        for run in &ic.stylings {
            let index = run.index as usize;
            let length = run.length as usize;
            if index + length > feedbacks.len() {
                continue;
            }
            for feedback in &mut feedbacks[index..index + length] {
                *feedback |= run.feedback;
            }
        }

        server.send(
            transport,
            &frames::preedit_draw(
                order,
                input_method_id,
                ic.id,
                ic.caret,
                0,
                ic.preedit.len() as i32,
                0,
                text.as_bytes(),
                &feedbacks,
            ),
        )?;
        ic.preedit.clear();
        ic.preedit.push_str(text);
        ic.stylings.clear();
    }
    Ok(())
}

fn request_name(major: u8) -> &'static str {
    match major {
        opcode::OPEN => "OPEN",
        opcode::CLOSE => "CLOSE",
        opcode::TRIGGER_NOTIFY => "TRIGGER_NOTIFY",
        opcode::ENCODING_NEGOTIATION => "ENCODING_NEGOTIATION",
        opcode::QUERY_EXTENSION => "QUERY_EXTENSION",
        opcode::SET_IM_VALUES => "SET_IM_VALUES",
        opcode::GET_IM_VALUES => "GET_IM_VALUES",
        opcode::CREATE_IC => "CREATE_IC",
        opcode::DESTROY_IC => "DESTROY_IC",
        opcode::SET_IC_VALUES => "SET_IC_VALUES",
        opcode::GET_IC_VALUES => "GET_IC_VALUES",
        opcode::SET_IC_FOCUS => "SET_IC_FOCUS",
        opcode::UNSET_IC_FOCUS => "UNSET_IC_FOCUS",
        opcode::FORWARD_EVENT => "FORWARD_EVENT",
        opcode::SYNC => "SYNC",
        opcode::SYNC_REPLY => "SYNC_REPLY",
        opcode::RESET_IC => "RESET_IC",
        opcode::PREEDIT_START_REPLY => "PREEDIT_START_REPLY",
        opcode::PREEDIT_CARET_REPLY => "PREEDIT_CARET_REPLY",
        _ => "unknown",
    }
}

/// The bridge: owns the XIM server connection, the text-input provider and
/// every live input method.
pub struct Engine<X: XProvider, T: TextInputProvider> {
    server: XimServer<X>,
    text: T,
    input_method_counter: u16,
    input_methods: Vec<InputMethod>,
}

impl<X: XProvider, T: TextInputProvider> Engine<X, T> {
    pub fn new(server: XimServer<X>, text: T) -> Self {
        Self {
            server,
            text,
            input_method_counter: 0,
            input_methods: Vec::new(),
        }
    }

    pub fn server(&self) -> &XimServer<X> {
        &self.server
    }

    pub fn text(&self) -> &T {
        &self.text
    }

    pub fn text_mut(&mut self) -> &mut T {
        &mut self.text
    }

    pub fn input_methods(&self) -> &[InputMethod] {
        &self.input_methods
    }

    /// Routes one window-system event, cascading transport teardown into
    /// the input methods that lived on it.
    pub fn dispatch(&mut self, event: &XEvent) -> Result<Dispatch, Error> {
        let result = self.server.dispatch(event)?;
        for window in self.server.take_closed_transports() {
            self.drop_transport(window);
        }
        Ok(result)
    }

    fn drop_transport(&mut self, transport: Window) {
        let mut dropped = Vec::new();
        self.input_methods.retain_mut(|im| {
            if im.transport != transport {
                return true;
            }
            dropped.extend(im.input_contexts.drain(..).map(|ic| ic.session));
            false
        });
        for session in dropped {
            self.text.destroy_session(session);
        }
    }

    /// Drains the queue of parsed session requests.
    pub fn drain_requests(&mut self) -> Result<(), Error> {
        while let Some(container) = self.server.poll_request() {
            self.handle_request(&container)?;
        }
        Ok(())
    }

    fn handle_request(&mut self, container: &RequestContainer) -> Result<(), Error> {
        let transport = container.transport;
        let order = self.server.order_of(transport)?;
        let frame = frames::RequestFrame::parse(&container.bytes, order)?;
        log::debug!(
            "{} on transport {}",
            request_name(frame.major),
            transport
        );

        match frame.major {
            opcode::OPEN => self.handle_open(transport, order, frame.payload),
            opcode::CLOSE => self.handle_close(transport, order, frame.payload),
            opcode::QUERY_EXTENSION => self.handle_query_extension(transport, order, frame.payload),
            opcode::ENCODING_NEGOTIATION => {
                self.handle_encoding_negotiation(transport, order, frame.payload)
            }
            opcode::SET_IM_VALUES => self.handle_set_im_values(transport, order, frame.payload),
            opcode::GET_IM_VALUES => self.handle_get_im_values(transport, order, frame.payload),
            opcode::CREATE_IC => self.handle_create_ic(transport, order, frame.payload),
            opcode::DESTROY_IC => self.handle_destroy_ic(transport, order, frame.payload),
            opcode::SET_IC_VALUES => self.handle_set_ic_values(transport, order, frame.payload),
            opcode::GET_IC_VALUES => self.handle_get_ic_values(transport, order, frame.payload),
            opcode::SET_IC_FOCUS => self.handle_set_ic_focus(transport, order, frame.payload),
            opcode::UNSET_IC_FOCUS => self.handle_unset_ic_focus(transport, order, frame.payload),
            opcode::RESET_IC => self.handle_reset_ic(transport, order, frame.payload),
            opcode::PREEDIT_CARET_REPLY => {
                self.handle_preedit_caret_reply(transport, order, frame.payload)
            }
            opcode::PREEDIT_START_REPLY => {
                frames::PreeditStartReply::parse(frame.payload, order)?;
                Ok(())
            }
            opcode::SYNC => {
                let request = frames::IcRequest::parse(frame.payload, order)?;
                self.server.send(
                    transport,
                    &frames::sync_reply(
                        order,
                        request.input_method_id,
                        request.input_context_id,
                    ),
                )
            }
            opcode::SYNC_REPLY => Ok(()),
            // Key events are delivered through the compositor, never
            // through the legacy stream.
            opcode::FORWARD_EVENT => {
                log::trace!("ignoring FORWARD_EVENT");
                Ok(())
            }
            major => {
                log::warn!("unhandled request opcode {}", major);
                Ok(())
            }
        }
    }

    fn handle_open(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let open = frames::OpenRequest::parse(payload)?;
        log::info!(
            "open, client locale {:?}",
            String::from_utf8_lossy(open.locale)
        );

        self.input_method_counter = self.input_method_counter.wrapping_add(1);
        let im = InputMethod::new(order, transport, self.input_method_counter);
        let reply = frames::open_reply(order, im.id, &im.specs, &im.ic_specs);
        self.input_methods.push(im);
        self.server.send(transport, &reply)
    }

    fn handle_close(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let close = frames::CloseRequest::parse(payload, order)?;
        let index = self
            .input_methods
            .iter()
            .position(|im| im.transport == transport && im.id == close.input_method_id)
            .ok_or(Error::UnknownInputMethod(close.input_method_id))?;

        let im = self.input_methods.swap_remove(index);
        for ic in im.input_contexts {
            self.text.destroy_session(ic.session);
        }

        self.server
            .send(transport, &frames::close_reply(order, close.input_method_id))
    }

    fn handle_query_extension(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let query = frames::ImListRequest::parse(payload, order)?;
        for name in query.strings() {
            log::debug!(
                "client asks for extension {:?}",
                String::from_utf8_lossy(name)
            );
        }
        // No extensions supported.
        self.server.send(
            transport,
            &frames::query_extension_reply(order, query.input_method_id, &[]),
        )
    }

    fn handle_encoding_negotiation(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let negotiation = frames::ImListRequest::parse(payload, order)?;
        let index = negotiation
            .strings()
            .position(|name| name == b"UTF-8")
            .ok_or(Error::UnsupportedEncoding)?;

        self.server.send(
            transport,
            &frames::encoding_negotiation_reply(
                order,
                negotiation.input_method_id,
                0,
                index as i16,
            ),
        )
    }

    fn handle_set_im_values(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let request = frames::ImListRequest::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, request.input_method_id)?;
        set_values(&mut im.attrs, request.attributes());

        self.server.send(
            transport,
            &frames::set_im_values_reply(order, request.input_method_id),
        )
    }

    fn handle_get_im_values(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let request = frames::ImListRequest::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, request.input_method_id)?;
        let attributes = get_values(&im.attrs, request.attribute_ids());
        let reply = frames::get_im_values_reply(order, request.input_method_id, &attributes);
        self.server.send(transport, &reply)
    }

    fn handle_create_ic(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let request = frames::ImListRequest::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, request.input_method_id)?;
        let session = self.text.create_session().map_err(Error::text_input)?;

        im.ic_counter = im.ic_counter.wrapping_add(1);
        let mut ic = InputContext::new(order, im.ic_counter, session);
        set_values(&mut ic.attrs, request.attributes());

        let reply = frames::create_ic_reply(order, request.input_method_id, ic.id);
        im.input_contexts.push(ic);
        self.server.send(transport, &reply)
    }

    fn handle_destroy_ic(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let request = frames::IcRequest::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, request.input_method_id)?;
        let ic = im.remove_ic(request.input_context_id)?;
        self.text.destroy_session(ic.session);

        self.server.send(
            transport,
            &frames::destroy_ic_reply(order, request.input_method_id, request.input_context_id),
        )
    }

    fn handle_set_ic_values(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let request = frames::SetIcValuesRequest::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, request.input_method_id)?;
        let ic = im.ic_mut(request.input_context_id)?;
        set_values(&mut ic.attrs, request.attributes());

        self.server.send(
            transport,
            &frames::set_ic_values_reply(order, request.input_method_id, request.input_context_id),
        )
    }

    fn handle_get_ic_values(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let request = frames::GetIcValuesRequest::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, request.input_method_id)?;
        let ic = im.ic(request.input_context_id)?;
        let attributes = get_values(&ic.attrs, request.attribute_ids());
        let reply = frames::get_ic_values_reply(
            order,
            request.input_method_id,
            request.input_context_id,
            &attributes,
        );
        self.server.send(transport, &reply)
    }

    fn handle_set_ic_focus(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let request = frames::IcRequest::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, request.input_method_id)?;
        let session = im.ic(request.input_context_id)?.session;

        self.text
            .show_input_panel(session)
            .map_err(Error::text_input)?;
        self.text.activate(session).map_err(Error::text_input)?;
        self.text.flush().map_err(Error::text_input)
    }

    fn handle_unset_ic_focus(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let request = frames::IcRequest::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, request.input_method_id)?;
        let session = im.ic(request.input_context_id)?.session;

        self.text.deactivate(session).map_err(Error::text_input)
    }

    /// Hands the provisional text back to the client and wipes the preedit
    /// state without a `PREEDIT_DONE`.
    fn handle_reset_ic(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let request = frames::IcRequest::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, request.input_method_id)?;
        let ic = im.ic_mut(request.input_context_id)?;

        let preedit = std::mem::take(&mut ic.preedit);
        ic.preedit_started = false;
        ic.caret = 0;
        ic.stylings.clear();

        self.server.send(
            transport,
            &frames::reset_ic_reply(
                order,
                request.input_method_id,
                request.input_context_id,
                preedit.as_bytes(),
            ),
        )
    }

    fn handle_preedit_caret_reply(
        &mut self,
        transport: Window,
        order: ByteOrder,
        payload: &[u8],
    ) -> Result<(), Error> {
        let reply = frames::PreeditCaretReply::parse(payload, order)?;
        let im = find_im(&mut self.input_methods, transport, reply.input_method_id)?;
        let ic = im.ic_mut(reply.input_context_id)?;

        if reply.position as usize <= ic.preedit.len() {
            ic.caret = reply.position as i32;
        }
        Ok(())
    }

    /// Routes one text-input callback to the input context owning its
    /// session.
    pub fn handle_text_input_event(&mut self, event: TextInputEvent) -> Result<(), Error> {
        let Some((im_index, ic_index)) = self.find_session(event.session) else {
            log::warn!("text input event for unknown session {}", event.session);
            return Ok(());
        };

        match event.kind {
            TextInputEventKind::PreeditString { text, .. } => {
                self.preedit_string(im_index, ic_index, &text)
            }
            TextInputEventKind::PreeditStyling {
                index,
                length,
                style,
            } => {
                self.preedit_styling(im_index, ic_index, index, length, style);
                Ok(())
            }
            TextInputEventKind::PreeditCursor { index } => {
                self.preedit_cursor(im_index, ic_index, index)
            }
            TextInputEventKind::CommitString { text } => {
                self.commit_string(im_index, ic_index, &text)
            }
        }
    }

    fn find_session(&self, session: TextSession) -> Option<(usize, usize)> {
        self.input_methods.iter().enumerate().find_map(|(i, im)| {
            im.input_contexts
                .iter()
                .position(|ic| ic.session == session)
                .map(|j| (i, j))
        })
    }

    fn preedit_string(&mut self, im_index: usize, ic_index: usize, text: &str) -> Result<(), Error> {
        let Self {
            server,
            input_methods,
            ..
        } = self;
        let im = &mut input_methods[im_index];
        let ic = &mut im.input_contexts[ic_index];

        if !ic.input_style(im.order).contains(InputStyle::PREEDIT_CALLBACKS) {
            log::warn!("preedit callbacks not negotiated by this client");
            return Ok(());
        }

        update_preedit(server, im.transport, im.order, im.id, ic, text)
    }

    fn preedit_styling(
        &mut self,
        im_index: usize,
        ic_index: usize,
        index: u32,
        length: u32,
        style: PreeditStyle,
    ) {
        let im = &mut self.input_methods[im_index];
        let ic = &mut im.input_contexts[ic_index];

        if !ic.input_style(im.order).contains(InputStyle::PREEDIT_CALLBACKS) {
            log::warn!("preedit callbacks not negotiated by this client");
            return;
        }

        let Some(feedback) = feedback_of(style) else {
            log::trace!("dropping unhandled preedit style {:?}", style);
            return;
        };

        ic.stylings.push(StylingRun {
            index,
            length,
            feedback,
        });
    }

    fn preedit_cursor(&mut self, im_index: usize, ic_index: usize, index: i32) -> Result<(), Error> {
        let Self {
            server,
            input_methods,
            ..
        } = self;
        let im = &input_methods[im_index];
        let ic = &im.input_contexts[ic_index];

        if !ic.input_style(im.order).contains(InputStyle::PREEDIT_CALLBACKS) {
            log::warn!("preedit callbacks not negotiated by this client");
            return Ok(());
        }

        server.send(
            im.transport,
            &frames::preedit_caret(
                im.order,
                im.id,
                ic.id,
                index,
                CaretDirection::AbsolutePosition,
                CaretStyle::Primary,
            ),
        )
    }

    fn commit_string(&mut self, im_index: usize, ic_index: usize, text: &str) -> Result<(), Error> {
        let Self {
            server,
            input_methods,
            ..
        } = self;
        let im = &mut input_methods[im_index];
        let ic = &mut im.input_contexts[ic_index];

        update_preedit(server, im.transport, im.order, im.id, ic, "")?;

        server.send(
            im.transport,
            &frames::commit(
                im.order,
                im.id,
                ic.id,
                CommitFlag::KEYSYM | CommitFlag::STRING,
                COMMIT_KEYSYM,
                text.as_bytes(),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ClientMessageData, PropMode, ATOM_STRING};
    use crate::server::TRANSPORT_MAX;
    use crate::testing::{client_message32, connect_frame, protocol_message8, MockText, MockX, TextOp};
    use pretty_assertions::assert_eq;
    use ximd_wire::{FrameWriter, Writer};

    fn req(order: ByteOrder, major: u8, body: impl FnOnce(&mut Writer)) -> Vec<u8> {
        let mut frame = FrameWriter::new(major, order);
        body(frame.body());
        frame.finish()
    }

    fn ev(session: TextSession, kind: TextInputEventKind) -> TextInputEvent {
        TextInputEvent { session, kind }
    }

    /// A connected client on a fresh engine.
    fn bridge(order: ByteOrder) -> (Engine<MockX, MockText>, Window) {
        let server = XimServer::new(MockX::new(), "wayland", "ja_JP.UTF-8").unwrap();
        let mut engine = Engine::new(server, MockText::default());

        let xconnect = engine.server().x().atom("_XIM_XCONNECT").unwrap();
        let accept = engine.server().accept_window();
        engine
            .dispatch(&client_message32(accept, xconnect, [55, 0, 0, 0, 0]))
            .unwrap();
        let (_, _, data) = engine.server().x().last_client_message().unwrap();
        let ClientMessageData::Data32(words) = data else {
            panic!("expected xconnect reply")
        };
        let com_win = words[0];

        let event = protocol_message8(engine.server(), com_win, &connect_frame(order));
        engine.dispatch(&event).unwrap();
        (engine, com_win)
    }

    /// Routes a request frame the way a client would: embedded when it
    /// fits, staged through a property otherwise.
    fn send_req(engine: &mut Engine<MockX, MockText>, com_win: Window, frame: &[u8]) {
        let event = if frame.len() <= TRANSPORT_MAX {
            protocol_message8(engine.server(), com_win, frame)
        } else {
            let x = engine.server().x();
            let staging = x.intern_atom("client_staging").unwrap();
            x.change_property8(PropMode::Replace, com_win, staging, ATOM_STRING, frame)
                .unwrap();
            let protocol = x.atom("_XIM_PROTOCOL").unwrap();
            client_message32(com_win, protocol, [frame.len() as u32, staging, 0, 0, 0])
        };
        engine.dispatch(&event).unwrap();
        engine.drain_requests().unwrap();
    }

    fn open(engine: &mut Engine<MockX, MockText>, com_win: Window, order: ByteOrder) {
        let frame = req(order, opcode::OPEN, |w| {
            w.u8(11);
            w.bytes(b"ja_JP.UTF-8");
        });
        send_req(engine, com_win, &frame);
    }

    fn create_ic(
        engine: &mut Engine<MockX, MockText>,
        com_win: Window,
        order: ByteOrder,
        style: InputStyle,
    ) {
        let attr = AttrRecord::card32(order, INPUT_STYLE, style.bits());
        let frame = req(order, opcode::CREATE_IC, |w| {
            w.u16(1);
            w.u16(attr.as_bytes().len() as u16);
            w.bytes(attr.as_bytes());
        });
        send_req(engine, com_win, &frame);
    }

    /// Bridge with an opened IM and one callback-style IC, focus set.
    fn session(order: ByteOrder) -> (Engine<MockX, MockText>, Window) {
        let (mut engine, com_win) = bridge(order);
        open(&mut engine, com_win, order);
        create_ic(
            &mut engine,
            com_win,
            order,
            InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_CALLBACKS,
        );
        let focus = req(order, opcode::SET_IC_FOCUS, |w| {
            w.u16(1);
            w.u16(1);
        });
        send_req(&mut engine, com_win, &focus);
        (engine, com_win)
    }

    fn sent(engine: &Engine<MockX, MockText>, order: ByteOrder) -> Vec<Vec<u8>> {
        engine.server().x().sent_frames(order)
    }

    #[test]
    fn open_reply_advertises_attribute_specs() {
        for order in [ByteOrder::Big, ByteOrder::Little] {
            let (mut engine, com_win) = bridge(order);
            open(&mut engine, com_win, order);

            let im_specs: Vec<_> = IM_ATTRIBUTES
                .iter()
                .enumerate()
                .map(|(id, (name, ty))| Attr::new(order, id as u16, *ty, name))
                .collect();
            let ic_specs: Vec<_> = IC_ATTRIBUTES
                .iter()
                .enumerate()
                .map(|(id, (name, ty))| Attr::new(order, id as u16, *ty, name))
                .collect();

            let frames_sent = sent(&engine, order);
            assert_eq!(
                frames_sent.last().unwrap(),
                &frames::open_reply(order, 1, &im_specs, &ic_specs)
            );
            assert_eq!(engine.input_methods().len(), 1);
            assert_eq!(engine.input_methods()[0].id(), 1);
        }
    }

    #[test]
    fn encoding_negotiation_picks_utf8_position() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = bridge(order);
        open(&mut engine, com_win, order);

        let names: &[&[u8]] = &[b"COMPOUND_TEXT", b"UTF-8", b"GB2312"];
        let mut list = Vec::new();
        for name in names {
            list.push(name.len() as u8);
            list.extend_from_slice(name);
        }
        let frame = req(order, opcode::ENCODING_NEGOTIATION, |w| {
            w.u16(1);
            w.u16(list.len() as u16);
            w.bytes(&list);
        });
        // Large enough to exercise the inbound property staging too.
        assert!(frame.len() > TRANSPORT_MAX);
        send_req(&mut engine, com_win, &frame);

        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::encoding_negotiation_reply(order, 1, 0, 1)
        );
    }

    #[test]
    fn encoding_negotiation_without_utf8_is_fatal() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = bridge(order);
        open(&mut engine, com_win, order);

        let frame = req(order, opcode::ENCODING_NEGOTIATION, |w| {
            w.u16(1);
            w.u16(7);
            w.u8(6);
            w.bytes(b"GB2312");
        });
        let event = protocol_message8(engine.server(), com_win, &frame);
        engine.dispatch(&event).unwrap();
        assert!(matches!(
            engine.drain_requests(),
            Err(Error::UnsupportedEncoding)
        ));
    }

    #[test]
    fn query_extension_reply_is_empty() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = bridge(order);
        open(&mut engine, com_win, order);

        let frame = req(order, opcode::QUERY_EXTENSION, |w| {
            w.u16(1);
            w.u16(13);
            w.u8(12);
            w.bytes(b"XIM_EXT_MOVE");
        });
        send_req(&mut engine, com_win, &frame);

        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::query_extension_reply(order, 1, &[])
        );
    }

    #[test]
    fn get_im_values_drops_unknown_ids() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = bridge(order);
        open(&mut engine, com_win, order);

        let frame = req(order, opcode::GET_IM_VALUES, |w| {
            w.u16(1);
            w.u16(4);
            w.u16(QUERY_INPUT_STYLE);
            w.u16(5); // unknown
        });
        send_req(&mut engine, com_win, &frame);

        let styles = AttrRecord::styles(order, QUERY_INPUT_STYLE, &advertised_styles());
        let expected = frames::get_im_values_reply(order, 1, &[&styles]);
        assert_eq!(sent(&engine, order).last().unwrap(), &expected);

        // The reply exceeds the embedded limit and must have been staged
        // through a server<N> property.
        assert!(expected.len() > TRANSPORT_MAX);
        let (_, _, data) = engine.server().x().last_client_message().unwrap();
        let ClientMessageData::Data32(words) = data else {
            panic!("expected property fallback")
        };
        assert_eq!(words[0] as usize, expected.len());
    }

    #[test]
    fn create_ic_defaults_then_applies_request_attributes() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = bridge(order);
        open(&mut engine, com_win, order);
        create_ic(
            &mut engine,
            com_win,
            order,
            InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_CALLBACKS,
        );

        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::create_ic_reply(order, 1, 1)
        );
        assert_eq!(engine.text().ops, [TextOp::Create(1)]);

        let im = &engine.input_methods()[0];
        let ic = &im.input_contexts()[0];
        assert_eq!(ic.id(), 1);
        assert_eq!(
            ic.input_style(order),
            InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_CALLBACKS
        );
    }

    #[test]
    fn set_then_get_ic_values_round_trips() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = bridge(order);
        open(&mut engine, com_win, order);
        create_ic(
            &mut engine,
            com_win,
            order,
            InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_CALLBACKS,
        );

        let focus_win = AttrRecord::card32(order, FOCUS_WINDOW, 0x00c0_ffee);
        let unknown = AttrRecord::card32(order, 9, 1);
        let frame = req(order, opcode::SET_IC_VALUES, |w| {
            w.u16(1);
            w.u16(1);
            w.u16((focus_win.as_bytes().len() + unknown.as_bytes().len()) as u16);
            w.u16(0);
            w.bytes(focus_win.as_bytes());
            w.bytes(unknown.as_bytes());
        });
        send_req(&mut engine, com_win, &frame);
        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::set_ic_values_reply(order, 1, 1)
        );

        let frame = req(order, opcode::GET_IC_VALUES, |w| {
            w.u16(1);
            w.u16(1);
            w.u16(6);
            w.u16(INPUT_STYLE);
            w.u16(FOCUS_WINDOW);
            w.u16(9); // unknown, dropped
        });
        send_req(&mut engine, com_win, &frame);

        let style = AttrRecord::card32(
            order,
            INPUT_STYLE,
            (InputStyle::PREEDIT_CALLBACKS | InputStyle::STATUS_CALLBACKS).bits(),
        );
        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::get_ic_values_reply(order, 1, 1, &[&style, &focus_win])
        );
    }

    #[test]
    fn focus_drives_the_text_input_session() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = session(order);

        assert_eq!(
            engine.text().ops,
            [
                TextOp::Create(1),
                TextOp::ShowPanel(1),
                TextOp::Activate(1),
                TextOp::Flush,
            ]
        );

        let frame = req(order, opcode::UNSET_IC_FOCUS, |w| {
            w.u16(1);
            w.u16(1);
        });
        send_req(&mut engine, com_win, &frame);
        assert_eq!(engine.text().ops.last(), Some(&TextOp::Deactivate(1)));
    }

    #[test]
    fn preedit_round_trip_draws_feedback() {
        let order = ByteOrder::Little;
        let (mut engine, _) = session(order);
        let before = sent(&engine, order).len();

        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditStyling {
                    index: 0,
                    length: 3,
                    style: PreeditStyle::Highlight,
                },
            ))
            .unwrap();
        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditString {
                    text: "あいう".to_owned(),
                    commit: String::new(),
                },
            ))
            .unwrap();

        let frames_sent = sent(&engine, order);
        assert_eq!(
            &frames_sent[before..],
            &[
                frames::preedit_start(order, 1, 1),
                frames::preedit_draw(
                    order,
                    1,
                    1,
                    0,
                    0,
                    0,
                    0,
                    "あいう".as_bytes(),
                    &vec![Feedback::HIGHLIGHT; 9],
                ),
            ]
        );

        let ic = &engine.input_methods()[0].input_contexts()[0];
        assert!(ic.preedit_started());
        assert_eq!(ic.preedit(), "あいう");
    }

    #[test]
    fn second_draw_skips_preedit_start_and_deletes_old_text() {
        let order = ByteOrder::Little;
        let (mut engine, _) = session(order);
        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditString {
                    text: "あいう".to_owned(),
                    commit: String::new(),
                },
            ))
            .unwrap();

        let before = sent(&engine, order).len();
        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditString {
                    text: "あい".to_owned(),
                    commit: String::new(),
                },
            ))
            .unwrap();

        let frames_sent = sent(&engine, order);
        assert_eq!(
            &frames_sent[before..],
            &[frames::preedit_draw(
                order,
                1,
                1,
                0,
                0,
                9,
                0,
                "あい".as_bytes(),
                &vec![Feedback::empty(); 6],
            )]
        );
    }

    #[test]
    fn commit_clears_preedit_then_commits() {
        let order = ByteOrder::Little;
        let (mut engine, _) = session(order);
        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditString {
                    text: "あいう".to_owned(),
                    commit: String::new(),
                },
            ))
            .unwrap();

        let before = sent(&engine, order).len();
        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::CommitString {
                    text: "愛".to_owned(),
                },
            ))
            .unwrap();

        let frames_sent = sent(&engine, order);
        assert_eq!(
            &frames_sent[before..],
            &[
                frames::preedit_draw(order, 1, 1, 0, 0, 9, 0, b"", &[]),
                frames::preedit_done(order, 1, 1),
                frames::commit(
                    order,
                    1,
                    1,
                    CommitFlag::KEYSYM | CommitFlag::STRING,
                    COMMIT_KEYSYM,
                    "愛".as_bytes(),
                ),
            ]
        );

        let ic = &engine.input_methods()[0].input_contexts()[0];
        assert!(!ic.preedit_started());
        assert_eq!(ic.preedit(), "");
    }

    #[test]
    fn empty_preedit_without_prior_start_skips_done() {
        let order = ByteOrder::Little;
        let (mut engine, _) = session(order);
        let before = sent(&engine, order).len();

        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditString {
                    text: String::new(),
                    commit: String::new(),
                },
            ))
            .unwrap();

        let frames_sent = sent(&engine, order);
        assert_eq!(
            &frames_sent[before..],
            &[frames::preedit_draw(order, 1, 1, 0, 0, 0, 0, b"", &[])]
        );
    }

    #[test]
    fn out_of_range_styling_runs_are_skipped() {
        let order = ByteOrder::Little;
        let (mut engine, _) = session(order);
        let before = sent(&engine, order).len();

        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditStyling {
                    index: 1,
                    length: 3,
                    style: PreeditStyle::Underline,
                },
            ))
            .unwrap();
        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditString {
                    text: "abc".to_owned(),
                    commit: String::new(),
                },
            ))
            .unwrap();

        let frames_sent = sent(&engine, order);
        assert_eq!(
            frames_sent.last().unwrap(),
            &frames::preedit_draw(
                order,
                1,
                1,
                0,
                0,
                0,
                0,
                b"abc",
                &vec![Feedback::empty(); 3],
            )
        );
        assert_eq!(frames_sent.len() - before, 2);
    }

    #[test]
    fn preedit_cursor_emits_absolute_caret() {
        let order = ByteOrder::Little;
        let (mut engine, _) = session(order);

        engine
            .handle_text_input_event(ev(1, TextInputEventKind::PreeditCursor { index: 4 }))
            .unwrap();

        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::preedit_caret(
                order,
                1,
                1,
                4,
                CaretDirection::AbsolutePosition,
                CaretStyle::Primary,
            )
        );
    }

    #[test]
    fn caret_reply_is_clamped_to_preedit_length() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = session(order);
        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditString {
                    text: "abc".to_owned(),
                    commit: String::new(),
                },
            ))
            .unwrap();

        let frame = req(order, opcode::PREEDIT_CARET_REPLY, |w| {
            w.u16(1);
            w.u16(1);
            w.u32(2);
        });
        send_req(&mut engine, com_win, &frame);
        assert_eq!(engine.input_methods()[0].input_contexts()[0].caret(), 2);

        let frame = req(order, opcode::PREEDIT_CARET_REPLY, |w| {
            w.u16(1);
            w.u16(1);
            w.u32(99);
        });
        send_req(&mut engine, com_win, &frame);
        assert_eq!(engine.input_methods()[0].input_contexts()[0].caret(), 2);
    }

    #[test]
    fn preedit_callbacks_not_negotiated_is_silent() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = bridge(order);
        open(&mut engine, com_win, order);
        create_ic(
            &mut engine,
            com_win,
            order,
            InputStyle::PREEDIT_NOTHING | InputStyle::STATUS_NOTHING,
        );
        let before = sent(&engine, order).len();

        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditString {
                    text: "abc".to_owned(),
                    commit: String::new(),
                },
            ))
            .unwrap();
        assert_eq!(sent(&engine, order).len(), before);

        // A commit still clears and reaches the client; with nothing drawn
        // the clear is a single deleting draw, never a PREEDIT_DONE.
        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::CommitString {
                    text: "x".to_owned(),
                },
            ))
            .unwrap();
        let frames_sent = sent(&engine, order);
        assert_eq!(
            &frames_sent[before..],
            &[
                frames::preedit_draw(order, 1, 1, 0, 0, 0, 0, b"", &[]),
                frames::commit(
                    order,
                    1,
                    1,
                    CommitFlag::KEYSYM | CommitFlag::STRING,
                    COMMIT_KEYSYM,
                    b"x",
                ),
            ]
        );
    }

    #[test]
    fn unknown_session_events_are_ignored() {
        let order = ByteOrder::Little;
        let (mut engine, _) = session(order);
        let before = sent(&engine, order).len();

        engine
            .handle_text_input_event(ev(
                99,
                TextInputEventKind::CommitString {
                    text: "x".to_owned(),
                },
            ))
            .unwrap();
        assert_eq!(sent(&engine, order).len(), before);
    }

    #[test]
    fn destroy_ic_releases_the_session() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = session(order);

        let frame = req(order, opcode::DESTROY_IC, |w| {
            w.u16(1);
            w.u16(1);
        });
        send_req(&mut engine, com_win, &frame);

        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::destroy_ic_reply(order, 1, 1)
        );
        assert_eq!(engine.text().ops.last(), Some(&TextOp::Destroy(1)));
        assert!(engine.input_methods()[0].input_contexts().is_empty());
    }

    #[test]
    fn close_cascades_to_input_contexts() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = session(order);

        let frame = req(order, opcode::CLOSE, |w| {
            w.u16(1);
            w.u16(0);
        });
        send_req(&mut engine, com_win, &frame);

        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::close_reply(order, 1)
        );
        assert_eq!(engine.text().ops.last(), Some(&TextOp::Destroy(1)));
        assert!(engine.input_methods().is_empty());
    }

    #[test]
    fn disconnect_tears_down_the_transport_sessions() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = session(order);

        let disconnect = [opcode::DISCONNECT, 0, 0, 0];
        let event = protocol_message8(engine.server(), com_win, &disconnect);
        engine.dispatch(&event).unwrap();

        assert!(engine.input_methods().is_empty());
        assert_eq!(engine.text().ops.last(), Some(&TextOp::Destroy(1)));
    }

    #[test]
    fn sync_is_answered() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = session(order);

        let frame = req(order, opcode::SYNC, |w| {
            w.u16(1);
            w.u16(1);
        });
        send_req(&mut engine, com_win, &frame);

        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::sync_reply(order, 1, 1)
        );
    }

    #[test]
    fn reset_ic_returns_and_clears_preedit() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = session(order);
        engine
            .handle_text_input_event(ev(
                1,
                TextInputEventKind::PreeditString {
                    text: "あいう".to_owned(),
                    commit: String::new(),
                },
            ))
            .unwrap();

        let frame = req(order, opcode::RESET_IC, |w| {
            w.u16(1);
            w.u16(1);
        });
        send_req(&mut engine, com_win, &frame);

        assert_eq!(
            sent(&engine, order).last().unwrap(),
            &frames::reset_ic_reply(order, 1, 1, "あいう".as_bytes())
        );
        let ic = &engine.input_methods()[0].input_contexts()[0];
        assert!(!ic.preedit_started());
        assert_eq!(ic.preedit(), "");
    }

    #[test]
    fn forward_event_is_accepted_and_ignored() {
        let order = ByteOrder::Little;
        let (mut engine, com_win) = session(order);
        let before = sent(&engine, order).len();

        let frame = req(order, opcode::FORWARD_EVENT, |w| {
            w.u16(1);
            w.u16(1);
            w.u16(0); // flag
            w.u16(1); // serial
            w.bytes(&[0u8; 32]); // raw core event
        });
        send_req(&mut engine, com_win, &frame);

        assert_eq!(sent(&engine, order).len(), before);
    }
}
