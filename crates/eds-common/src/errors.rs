//! ---
//! eds_section: "01-core-functionality"
//! eds_subsection: "module"
//! eds_type: "source"
//! eds_scope: "code"
//! eds_description: "Error taxonomy shared by drivers and the manager."
//! eds_version: "v0.0.0-prealpha"
//! eds_owner: "tbd"
//! ---
//! Categorised errors that survive a trip across the message bus.
//!
//! Every [`EdgeError`] carries an [`ErrorType`] with a stable numeric code, a
//! message chain and the call sites where it was raised or wrapped. Only the
//! category and the rendered message go over the wire; the trace stays local.

use std::error::Error as StdError;
use std::fmt::{self, Write as _};
use std::panic::Location;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Shared result type for operations returning an [`EdgeError`].
pub type EdgeResult<T> = std::result::Result<T, EdgeError>;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

const CHAIN_SEPARATOR: &str = "\n\t -> ";

/// Error categories with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "ErrorTypeRepr", from = "ErrorTypeRepr")]
pub enum ErrorType {
    BadRequest,
    NotFound,
    MethodNotAllowed,
    Internal,
    #[default]
    Unknown,
    Configuration,
    MessageBus,
    Driver,
    DeviceTwin,
    MetaStore,
    DataStore,
}

impl ErrorType {
    /// Every registered category.
    pub const ALL: [ErrorType; 11] = [
        ErrorType::BadRequest,
        ErrorType::NotFound,
        ErrorType::MethodNotAllowed,
        ErrorType::Internal,
        ErrorType::Unknown,
        ErrorType::Configuration,
        ErrorType::MessageBus,
        ErrorType::Driver,
        ErrorType::DeviceTwin,
        ErrorType::MetaStore,
        ErrorType::DataStore,
    ];

    pub const fn code(self) -> u32 {
        match self {
            ErrorType::BadRequest => 400,
            ErrorType::NotFound => 404,
            ErrorType::MethodNotAllowed => 405,
            ErrorType::Internal => 500,
            ErrorType::Unknown => 999,
            ErrorType::Configuration => 100_000,
            ErrorType::MessageBus => 200_000,
            ErrorType::Driver => 300_000,
            ErrorType::DeviceTwin => 400_000,
            ErrorType::MetaStore => 500_000,
            ErrorType::DataStore => 600_000,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ErrorType::BadRequest => "BadRequest",
            ErrorType::NotFound => "NotFound",
            ErrorType::MethodNotAllowed => "MethodNotAllowed",
            ErrorType::Internal => "Internal",
            ErrorType::Unknown => "Unknown",
            ErrorType::Configuration => "Configuration",
            ErrorType::MessageBus => "MessageBus",
            ErrorType::Driver => "Driver",
            ErrorType::DeviceTwin => "DeviceTwin",
            ErrorType::MetaStore => "MetaStore",
            ErrorType::DataStore => "DataStore",
        }
    }

    /// Resolve a wire code; unregistered codes fall back to [`ErrorType::Unknown`].
    pub fn from_code(code: u32) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.code() == code)
            .unwrap_or(ErrorType::Unknown)
    }

    /// Raise a new error of this category.
    #[track_caller]
    pub fn error(self, message: impl Into<String>) -> EdgeError {
        EdgeError::new(self, message)
    }

    /// Wrap `err` with an extra message.
    ///
    /// When `err` is itself an [`EdgeError`] with a known category, that more
    /// specific category is kept; otherwise the wrapper adopts `self`.
    #[track_caller]
    pub fn cause<E>(self, err: E, message: impl Into<String>) -> EdgeError
    where
        E: Into<BoxError>,
    {
        let source: BoxError = err.into();
        let inner = source
            .downcast_ref::<EdgeError>()
            .map(EdgeError::category)
            .unwrap_or(ErrorType::Unknown);
        let kind = if inner == ErrorType::Unknown { self } else { inner };
        EdgeError {
            kind,
            message: message.into(),
            source: Some(source),
            trace: vec![Location::caller()],
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

#[derive(Serialize, Deserialize)]
struct ErrorTypeRepr {
    code: u32,
    #[serde(rename = "Msg", default)]
    msg: String,
}

impl From<ErrorType> for ErrorTypeRepr {
    fn from(kind: ErrorType) -> Self {
        Self {
            code: kind.code(),
            msg: kind.name().to_owned(),
        }
    }
}

impl From<ErrorTypeRepr> for ErrorType {
    fn from(repr: ErrorTypeRepr) -> Self {
        ErrorType::from_code(repr.code)
    }
}

/// Categorised error with a message chain and captured call sites.
#[derive(Debug)]
pub struct EdgeError {
    kind: ErrorType,
    message: String,
    source: Option<BoxError>,
    trace: Vec<&'static Location<'static>>,
}

impl EdgeError {
    #[track_caller]
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            trace: vec![Location::caller()],
        }
    }

    /// Category declared at this level of the chain.
    pub fn kind(&self) -> ErrorType {
        self.kind
    }

    /// Most specific category found along the chain.
    pub fn category(&self) -> ErrorType {
        if self.kind != ErrorType::Unknown {
            return self.kind;
        }
        self.inner_edge()
            .map(EdgeError::category)
            .unwrap_or(ErrorType::Unknown)
    }

    pub fn code(&self) -> u32 {
        self.category().code()
    }

    pub fn is(&self, kind: ErrorType) -> bool {
        self.category() == kind
    }

    /// First non-empty message in the chain, without the wrapped details.
    pub fn message(&self) -> String {
        if self.message.is_empty() {
            if let Some(source) = self.source.as_deref() {
                return match source.downcast_ref::<EdgeError>() {
                    Some(inner) => inner.message(),
                    None => source.to_string(),
                };
            }
        }
        self.message.clone()
    }

    /// Messages and call sites for every level, outermost first.
    pub fn trace(&self) -> String {
        let mut out = String::new();
        self.write_trace(&mut out);
        out
    }

    /// Decode an error payload received from a peer.
    pub fn from_payload(payload: &[u8]) -> Self {
        match serde_json::from_slice::<EdgeError>(payload) {
            Ok(err) => err,
            Err(err) => ErrorType::Unknown.cause(err, "fail to decode the error payload"),
        }
    }

    /// Encode the error in its wire form.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn inner_edge(&self) -> Option<&EdgeError> {
        self.source.as_deref()?.downcast_ref::<EdgeError>()
    }

    fn write_trace(&self, out: &mut String) {
        out.push_str(&self.message);
        out.push_str("\n\n");
        for location in &self.trace {
            let _ = writeln!(out, "\t-[{}:{}]", location.file(), location.line());
        }
        if let Some(source) = self.source.as_deref() {
            match source.downcast_ref::<EdgeError>() {
                Some(inner) => inner.write_trace(out),
                None => out.push_str(&source.to_string()),
            }
        }
    }
}

impl fmt::Display for EdgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source.as_deref() {
            None => f.write_str(&self.message),
            Some(source) if self.message.is_empty() => write!(f, "{source}"),
            Some(source) => write!(f, "{}{}{}", self.message, CHAIN_SEPARATOR, source),
        }
    }
}

impl StdError for EdgeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

impl Serialize for EdgeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("EdgeError", 2)?;
        state.serialize_field("message", &self.to_string())?;
        state.serialize_field("type", &self.category())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for EdgeError {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(default)]
            message: String,
            #[serde(rename = "type", default)]
            kind: ErrorType,
        }

        let wire = Wire::deserialize(deserializer)?;
        Ok(EdgeError {
            kind: wire.kind,
            message: wire.message,
            source: None,
            trace: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> std::io::Error {
        std::io::Error::other("raw errors")
    }

    #[test]
    fn display_joins_every_level() {
        let empty = ErrorType::Unknown.error("");
        assert_eq!(empty.to_string(), "");

        let with_message = ErrorType::Unknown.error("with message");
        assert_eq!(with_message.to_string(), "with message");

        let l2_empty = ErrorType::Unknown.cause(ErrorType::Unknown.error(""), "");
        assert_eq!(l2_empty.to_string(), "");

        let l2 = ErrorType::Unknown.cause(ErrorType::Unknown.error("inner"), "outer");
        assert_eq!(l2.to_string(), "outer\n\t -> inner");

        let l1_raw = ErrorType::Unknown.cause(raw(), "");
        assert_eq!(l1_raw.to_string(), "raw errors");

        let l1_raw_msg = ErrorType::Unknown.cause(raw(), "with message");
        assert_eq!(l1_raw_msg.to_string(), "with message\n\t -> raw errors");

        let l2_mixed = ErrorType::Unknown.cause(ErrorType::Unknown.cause(raw(), ""), "message");
        assert_eq!(l2_mixed.to_string(), "message\n\t -> raw errors");

        let l4 = ErrorType::Unknown.cause(ErrorType::Unknown.cause(l2_mixed, ""), "message");
        assert_eq!(l4.to_string(), "message\n\t -> message\n\t -> raw errors");
    }

    #[test]
    fn message_returns_first_non_empty_level() {
        let l1_raw = ErrorType::Unknown.cause(raw(), "");
        assert_eq!(l1_raw.message(), "raw errors");

        let l2_without = ErrorType::Unknown.cause(ErrorType::Unknown.cause(raw(), ""), "");
        assert_eq!(l2_without.message(), "raw errors");

        let l2_mixed = ErrorType::Unknown.cause(ErrorType::Unknown.cause(raw(), ""), "message");
        assert_eq!(l2_mixed.message(), "message");

        let l3 = ErrorType::Unknown.cause(l2_mixed, "");
        assert_eq!(l3.message(), "message");

        let l4 = ErrorType::Unknown.cause(l3, "outer");
        assert_eq!(l4.message(), "outer");
    }

    #[test]
    fn cause_keeps_the_most_specific_category() {
        let unknown = ErrorType::Unknown.error("device went away");
        let wrapped = ErrorType::Driver.cause(unknown, "fail to read");
        assert_eq!(wrapped.category(), ErrorType::Driver);

        let bus = ErrorType::MessageBus.error("call timeout");
        let wrapped = ErrorType::Driver.cause(bus, "fail to read");
        assert_eq!(wrapped.category(), ErrorType::MessageBus);

        let foreign = ErrorType::Configuration.cause(raw(), "fail to load");
        assert_eq!(foreign.category(), ErrorType::Configuration);
        assert_eq!(foreign.code(), 100_000);
    }

    #[test]
    fn category_recurses_through_unknown_levels() {
        let inner = ErrorType::DeviceTwin.error("offline");
        let outer = EdgeError {
            kind: ErrorType::Unknown,
            message: String::new(),
            source: Some(Box::new(inner)),
            trace: Vec::new(),
        };
        assert!(outer.is(ErrorType::DeviceTwin));
    }

    #[test]
    fn wire_form_uses_code_and_name() {
        let err = ErrorType::MessageBus.error("call timeout");
        let value = serde_json::to_value(&err).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "message": "call timeout",
                "type": {"code": 200000, "Msg": "MessageBus"}
            })
        );

        let decoded = EdgeError::from_payload(&err.to_payload().expect("encode"));
        assert_eq!(decoded.category(), ErrorType::MessageBus);
        assert_eq!(decoded.message(), "call timeout");
    }

    #[test]
    fn unregistered_codes_decode_as_unknown() {
        let decoded =
            EdgeError::from_payload(br#"{"message":"odd","type":{"code":12345,"Msg":"Odd"}}"#);
        assert_eq!(decoded.category(), ErrorType::Unknown);
        assert_eq!(decoded.message(), "odd");
    }

    #[test]
    fn garbage_payload_is_wrapped_as_unknown() {
        let decoded = EdgeError::from_payload(b"not json");
        assert_eq!(decoded.category(), ErrorType::Unknown);
        assert!(decoded.to_string().starts_with("fail to decode the error payload"));
    }

    #[test]
    fn trace_records_call_sites_per_level() {
        let inner = ErrorType::Driver.error("inner");
        let outer = ErrorType::Driver.cause(inner, "outer");
        let trace = outer.trace();
        assert!(trace.starts_with("outer\n\n"));
        assert!(trace.contains("inner\n\n"));
        assert_eq!(trace.matches("errors.rs").count(), 2);
    }
}
