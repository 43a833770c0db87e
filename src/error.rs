//! Error taxonomy for the engine adapter.

use std::fmt;

/// Every error kind the adapter can surface to a caller.
///
/// Mirrors the `GpgmeError` kinds the helper protocol maps onto; see
/// `map_assuan_error` in the engine this crate is modeled on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// No error occurred; rarely constructed directly.
    NoError,
    /// Catch-all for protocol-framing problems and unmapped codes.
    GeneralError,
    /// A caller-supplied argument was invalid (null data, wrong mode, ...).
    InvalidValue,
    /// The helper process itself is misbehaving (server fault, no agent, ...).
    InvalidEngine,
    /// A key, certificate, or recipient name could not be used.
    InvalidKey,
    /// Allocation failed.
    OutOfCore,
    /// Pipe creation or wiring failed.
    PipeError,
    /// Read from a channel failed.
    ReadError,
    /// Write to a channel failed.
    WriteError,
    /// The operation is a stub in this adapter.
    NotImplemented,
    /// The operation was canceled.
    Canceled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NoError => "no error",
            ErrorKind::GeneralError => "general error",
            ErrorKind::InvalidValue => "invalid value",
            ErrorKind::InvalidEngine => "invalid engine",
            ErrorKind::InvalidKey => "invalid key",
            ErrorKind::OutOfCore => "out of core",
            ErrorKind::PipeError => "pipe error",
            ErrorKind::ReadError => "read error",
            ErrorKind::WriteError => "write error",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// The adapter's error type: a kind plus an optional human-readable detail
/// and, when the failure came from the OS or the helper protocol, the
/// underlying source.
#[derive(Debug)]
pub struct EngineError {
    kind: ErrorKind,
    detail: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl EngineError {
    /// Construct an error carrying only a kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            detail: None,
            source: None,
        }
    }

    /// Construct an error carrying a kind and a detail message.
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
            source: None,
        }
    }

    /// Wrap an OS-level error (`nix`/`io`) under the given kind.
    pub fn from_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            detail: None,
            source: Some(Box::new(source)),
        }
    }

    /// The error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.kind, detail),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<nix::Error> for EngineError {
    fn from(e: nix::Error) -> Self {
        EngineError::from_source(ErrorKind::PipeError, e)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::from_source(ErrorKind::ReadError, e)
    }
}

/// Shorthand result type used throughout the adapter.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Numeric helper-protocol error codes this adapter knows how to map.
///
/// Only the codes the assuan wire protocol actually emits for gpgsm are
/// listed; anything else falls through to [`ErrorKind::GeneralError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
#[allow(missing_docs)]
pub enum HelperErrorCode {
    NoError = 0,
    GeneralError = 1,
    OutOfCore = 3,
    InvalidValue = 5,
    ReadError = 7,
    WriteError = 8,
    NotImplemented = 10,
    Canceled = 11,
    InvalidName = 14,
    InvalidKey = 17,
    BadCertificate = 20,
    BadCertificatePath = 21,
    MissingCertificate = 22,
    NoPublicKey = 23,
    NoSecretKey = 24,
    CardError = 25,
    InvalidCard = 26,
    NoPkcs15App = 27,
    CardNotPresent = 28,
    InvalidId = 29,
    BadSignature = 30,
    CertRevoked = 31,
    NoCrlForCert = 32,
    CrlTooOld = 33,
    NotTrusted = 34,
    ServerFault = 40,
    ServerResourceProblem = 41,
    ServerIoError = 42,
    ServerBug = 43,
    NoAgent = 44,
    AgentError = 45,
}

/// Map a raw numeric helper error code (as parsed from `ERR <n>`) to the
/// adapter's error kind.
pub fn map_helper_error(code: i32) -> ErrorKind {
    match code {
        0 => ErrorKind::NoError,
        3 => ErrorKind::OutOfCore,
        5 => ErrorKind::InvalidValue,
        7 => ErrorKind::ReadError,
        8 => ErrorKind::WriteError,
        10 => ErrorKind::NotImplemented,
        11 => ErrorKind::Canceled,
        14 | 17 | 20 | 21 | 22 | 23 | 24 | 25 | 26 | 27 | 28 | 29 | 30 | 31 | 32 | 33 | 34 => {
            ErrorKind::InvalidKey
        }
        40 | 41 | 42 | 43 | 44 | 45 => ErrorKind::InvalidEngine,
        _ => ErrorKind::GeneralError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_key_related_codes() {
        for code in [14, 17, 30, 34] {
            assert_eq!(map_helper_error(code), ErrorKind::InvalidKey);
        }
    }

    #[test]
    fn maps_server_codes_to_invalid_engine() {
        for code in [40, 41, 44, 45] {
            assert_eq!(map_helper_error(code), ErrorKind::InvalidEngine);
        }
    }

    #[test]
    fn unknown_code_is_general_error() {
        assert_eq!(map_helper_error(9999), ErrorKind::GeneralError);
    }

    #[test]
    fn display_includes_detail() {
        let e = EngineError::with_detail(ErrorKind::InvalidValue, "seckey must be None");
        assert_eq!(e.to_string(), "invalid value: seckey must be None");
    }
}
