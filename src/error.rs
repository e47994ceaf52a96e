//! Error taxonomy for namespace operations.
//!
//! Every externally visible operation returns `Result<_, NineError>`. The
//! taxonomy is closed: callers can match exhaustively, and each variant has
//! a stable short code that crosses the wire protocol unchanged.

use thiserror::Error;

/// Errors surfaced by namespace operations.
///
/// Design rules:
/// - Path syntax violations are always `InvalidPath`, checked at entry.
/// - Absence on `read` is *not* an error; `NotFound` is reserved for
///   structural misses (unknown mount, anchor id, sequence out of range).
/// - Exceeded resource caps are `Unavailable` (recoverable), never
///   `Internal`.
/// - Backend failures (I/O, decryption) surface as `Internal` with a short
///   message and no platform specifics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("namespace closed")]
    Closed,

    #[error("operation timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the crate.
pub type NineResult<T> = Result<T, NineError>;

impl NineError {
    /// Stable short code carried in wire responses.
    pub fn code(&self) -> &'static str {
        match self {
            NineError::NotFound(_) => "not_found",
            NineError::InvalidPath(_) => "invalid_path",
            NineError::InvalidData(_) => "invalid_data",
            NineError::Permission(_) => "permission",
            NineError::Closed => "closed",
            NineError::Timeout => "timeout",
            NineError::Connection(_) => "connection",
            NineError::Unavailable(_) => "unavailable",
            NineError::Internal(_) => "internal",
        }
    }

    /// Reconstruct a variant from a wire code and message.
    ///
    /// Unknown codes map to `Internal` so a newer peer never makes an older
    /// client panic or mis-classify a failure as recoverable.
    pub fn from_code(code: &str, message: &str) -> Self {
        let msg = message.to_string();
        match code {
            "not_found" => NineError::NotFound(msg),
            "invalid_path" => NineError::InvalidPath(msg),
            "invalid_data" => NineError::InvalidData(msg),
            "permission" => NineError::Permission(msg),
            "closed" => NineError::Closed,
            "timeout" => NineError::Timeout,
            "connection" => NineError::Connection(msg),
            "unavailable" => NineError::Unavailable(msg),
            _ => NineError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        let errors = [
            NineError::NotFound("x".into()),
            NineError::InvalidPath("x".into()),
            NineError::InvalidData("x".into()),
            NineError::Permission("x".into()),
            NineError::Closed,
            NineError::Timeout,
            NineError::Connection("x".into()),
            NineError::Unavailable("x".into()),
            NineError::Internal("x".into()),
        ];
        for err in errors {
            let back = NineError::from_code(err.code(), "x");
            assert_eq!(back.code(), err.code());
        }
    }

    #[test]
    fn unknown_code_is_internal() {
        let err = NineError::from_code("quantum_flux", "whoops");
        assert_eq!(err, NineError::Internal("whoops".into()));
    }
}
