use crate::provider::Window;

/// Fatal engine errors. The benign conditions of the protocol (unknown
/// attribute ids, unknown preedit styles, out-of-range styling runs) are
/// handled in place and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("can't read xim message: {0}")]
    Protocol(#[from] ximd_wire::ParseError),
    #[error("client payload declares {declared} bytes but {actual} are present")]
    BadPayloadLength { declared: usize, actual: usize },
    #[error("no transport for communication window {0}")]
    UnknownTransport(Window),
    #[error("malformed {0} client message")]
    MalformedClientMessage(&'static str),
    #[error("unknown input method id {0}")]
    UnknownInputMethod(u16),
    #[error("unknown input context id {0}")]
    UnknownInputContext(u16),
    #[error("client offered no supported encoding")]
    UnsupportedEncoding,
    #[error("input method selection {0} is owned by another server")]
    SelectionOwned(String),
    #[error("invalid reply from the window system")]
    InvalidReply,
    #[error("window system error: {0}")]
    XProvider(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("text input error: {0}")]
    TextInput(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn x_provider(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::XProvider(Box::new(err))
    }

    pub fn text_input(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::TextInput(Box::new(err))
    }
}
