use std::fmt;

use wasm_bindgen::JsValue;

/// The document is not well-formed XML. Every other irregularity is
/// recovered inside the parser.
#[derive(Debug)]
pub enum MalformedDocumentError {
    Xml(quick_xml::Error),
    NoRootElement,
    UnexpectedEof,
    ContentAfterRoot,
}

impl fmt::Display for MalformedDocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xml(e) => write!(f, "Malformed document: {e}"),
            Self::NoRootElement => write!(f, "Malformed document: no root element"),
            Self::UnexpectedEof => {
                write!(f, "Malformed document: unexpected end of input inside an element")
            }
            Self::ContentAfterRoot => {
                write!(f, "Malformed document: content after the root element")
            }
        }
    }
}

impl std::error::Error for MalformedDocumentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Xml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for MalformedDocumentError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e)
    }
}

impl From<MalformedDocumentError> for JsValue {
    fn from(e: MalformedDocumentError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

/// Serialising a route document failed.
#[derive(Debug)]
pub enum DocumentWriteError {
    Xml(quick_xml::Error),
    Io(std::io::Error),
}

impl fmt::Display for DocumentWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xml(e) => write!(f, "Document write error: {e}"),
            Self::Io(e) => write!(f, "Document write error: {e}"),
        }
    }
}

impl std::error::Error for DocumentWriteError {}

impl From<quick_xml::Error> for DocumentWriteError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e)
    }
}

impl From<std::io::Error> for DocumentWriteError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DocumentWriteError> for JsValue {
    fn from(e: DocumentWriteError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

/// A lane-scoped fetch failure. Never retried automatically.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchFailure {
    Network(String),
    Http { status: u16 },
    Api { code: i64, message: String },
    Decode(String),
    InvalidUrl(url::ParseError),
    Cancelled,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {msg}"),
            Self::Http { status } => write!(f, "HTTP error: {status}"),
            Self::Api { code, message } => write!(f, "API error {code}: {message}"),
            Self::Decode(msg) => write!(f, "Response decode error: {msg}"),
            Self::InvalidUrl(e) => write!(f, "Invalid URL: {e}"),
            Self::Cancelled => write!(f, "Request cancelled"),
        }
    }
}

impl std::error::Error for FetchFailure {}

impl From<serde_json::Error> for FetchFailure {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<url::ParseError> for FetchFailure {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e)
    }
}

impl From<FetchFailure> for JsValue {
    fn from(e: FetchFailure) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LocationErrorKind {
    PermissionDenied,
    Unavailable,
    Timeout,
    /// The session was torn down before a fix arrived.
    Cancelled,
    Unknown,
}

impl LocationErrorKind {
    /// Map a browser `GeolocationPositionError.code`.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::PermissionDenied,
            2 => Self::Unavailable,
            3 => Self::Timeout,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationError {
    pub kind: LocationErrorKind,
    pub message: String,
}

impl LocationError {
    pub fn new(kind: LocationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location error ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for LocationError {}

impl From<LocationError> for JsValue {
    fn from(e: LocationError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}
