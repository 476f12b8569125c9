//! Interfaces the engine consumes from its two external collaborators: the
//! window system carrying the XIM wire protocol and the compositor text
//! input service doing the actual composition.

pub type Atom = u32;
pub type Window = u32;

/// `XA_ATOM`, the property type of the `XIM_SERVERS` root-window list.
pub const ATOM_ATOM: Atom = 4;
/// `XA_STRING`, the property type used for large-payload staging.
pub const ATOM_STRING: Atom = 31;
/// `AnyPropertyType` for property reads.
pub const ATOM_ANY: Atom = 0;

pub const WINDOW_NONE: Window = 0;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PropMode {
    Replace,
    Prepend,
    Append,
}

/// Payload of a client message, mirroring the two wire formats the XIM
/// transport uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientMessageData {
    Data8([u8; 20]),
    Data32([u32; 5]),
}

#[derive(Clone, Copy, Debug)]
pub struct ClientMessage {
    pub window: Window,
    pub message_type: Atom,
    pub data: ClientMessageData,
}

#[derive(Clone, Copy, Debug)]
pub struct SelectionRequest {
    pub time: u32,
    pub owner: Window,
    pub requestor: Window,
    pub selection: Atom,
    pub target: Atom,
    pub property: Atom,
}

/// The window-system events the dispatcher consumes. Everything else never
/// reaches the engine.
#[derive(Clone, Copy, Debug)]
pub enum XEvent {
    ClientMessage(ClientMessage),
    SelectionRequest(SelectionRequest),
}

/// A window property value: type atom, format (8 or 32) and raw bytes.
#[derive(Clone, Debug)]
pub struct PropertyValue {
    pub ty: Atom,
    pub format: u8,
    pub value: Vec<u8>,
}

impl PropertyValue {
    /// Format-32 items in the provider's own (host) integer layout.
    pub fn value32(&self) -> impl Iterator<Item = u32> + '_ {
        self.value
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }
}

/// Narrow window-system interface the XIM transport runs over.
///
/// Integer endianness on this interface is the provider's own; only the
/// framed XIM payloads carry transport byte order.
pub trait XProvider {
    type Error: std::error::Error + Send + Sync + 'static;

    fn root(&self) -> Window;
    fn intern_atom(&self, name: &str) -> Result<Atom, Self::Error>;

    /// Creates a 1x1 input-output window on the root of the first screen.
    fn create_window(&self) -> Result<Window, Self::Error>;
    fn destroy_window(&self, window: Window) -> Result<(), Self::Error>;

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        ty: Atom,
        delete: bool,
    ) -> Result<Option<PropertyValue>, Self::Error>;
    fn change_property8(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        ty: Atom,
        data: &[u8],
    ) -> Result<(), Self::Error>;
    fn change_property32(
        &self,
        mode: PropMode,
        window: Window,
        property: Atom,
        ty: Atom,
        data: &[u32],
    ) -> Result<(), Self::Error>;

    fn selection_owner(&self, selection: Atom) -> Result<Window, Self::Error>;
    fn set_selection_owner(&self, owner: Window, selection: Atom) -> Result<(), Self::Error>;

    fn send_client_message(
        &self,
        window: Window,
        message_type: Atom,
        data: ClientMessageData,
    ) -> Result<(), Self::Error>;
    fn send_selection_notify(&self, request: &SelectionRequest) -> Result<(), Self::Error>;

    fn flush(&self) -> Result<(), Self::Error>;
}

/// Handle of one text-input session (text-input object plus surface) inside
/// a [`TextInputProvider`].
pub type TextSession = u32;

/// Preedit styling codes delivered by the text-input service.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PreeditStyle {
    Default,
    None,
    Active,
    Inactive,
    Highlight,
    Underline,
    Selection,
    Incorrect,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TextInputEventKind {
    PreeditString { text: String, commit: String },
    PreeditStyling { index: u32, length: u32, style: PreeditStyle },
    PreeditCursor { index: i32 },
    CommitString { text: String },
}

/// One callback from the text-input service, routed to the input context
/// owning `session`. Per update the provider delivers zero or more styling
/// events followed by exactly one preedit string.
#[derive(Clone, Debug)]
pub struct TextInputEvent {
    pub session: TextSession,
    pub kind: TextInputEventKind,
}

/// Narrow compositor-side interface. The seat is the provider's; a session
/// carries its own surface and outbound serial.
pub trait TextInputProvider {
    type Error: std::error::Error + Send + Sync + 'static;

    fn create_session(&mut self) -> Result<TextSession, Self::Error>;
    fn destroy_session(&mut self, session: TextSession);

    fn show_input_panel(&mut self, session: TextSession) -> Result<(), Self::Error>;
    fn hide_input_panel(&mut self, session: TextSession) -> Result<(), Self::Error>;
    fn activate(&mut self, session: TextSession) -> Result<(), Self::Error>;
    fn deactivate(&mut self, session: TextSession) -> Result<(), Self::Error>;

    fn flush(&mut self) -> Result<(), Self::Error>;
}
