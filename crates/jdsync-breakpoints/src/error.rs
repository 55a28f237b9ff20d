use jdsync_jdi::JdiError;
use thiserror::Error;

use crate::attributes::MarkerId;

/// Why a breakpoint could not be turned into a request right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindableReason {
    /// The resolved type is an interface or array.
    NotAClass,
    /// Method-entry breakpoint without a method name and signature.
    Unconfigured,
    /// No concrete method with the requested name and signature.
    NoSuchMethod,
    /// Line breakpoint without a line number.
    NoLineNumber,
    /// No location, or a location with no code index.
    NoExecutableCode,
}

impl UnbindableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnbindableReason::NotAClass => "type is not a class",
            UnbindableReason::Unconfigured => "method name and signature are not set",
            UnbindableReason::NoSuchMethod => "no concrete method with that name and signature",
            UnbindableReason::NoLineNumber => "breakpoint has no line number",
            UnbindableReason::NoExecutableCode => "no executable code at location",
        }
    }
}

/// Outcome of a failed bind or rebind.
///
/// Every variant means the same thing to the breakpoint: it is not active in
/// this session right now. None of them is fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("unbindable: {}", .0.as_str())]
    Unbindable(UnbindableReason),
    #[error("remote session is unavailable")]
    SessionUnavailable,
    #[error("remote operation failed")]
    RemoteOperation(#[source] JdiError),
}

impl BindError {
    /// The session is gone; further rebind attempts against it are pointless.
    pub fn is_session_unavailable(&self) -> bool {
        matches!(self, BindError::SessionUnavailable)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttributeError {
    #[error("no attributes stored for {0}")]
    MissingMarker(MarkerId),
    #[error("attribute `{key}` of {marker} is missing")]
    MissingAttribute { marker: MarkerId, key: &'static str },
    #[error("attribute `{key}` of {marker} has an unexpected value")]
    InvalidAttribute { marker: MarkerId, key: &'static str },
    #[error("attribute storage failed: {0}")]
    Storage(String),
}
