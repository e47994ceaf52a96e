//! Wire protocol: tagged, multiplexed, newline-framed JSON.
//!
//! Each request carries a client-chosen monotone `tag`; the response (and
//! any pushed watch events) carry the same tag back. Error identity
//! crosses the wire as a short stable `code` alongside the human-readable
//! message.

pub mod client;
pub mod framer;
pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NineError;
use crate::scroll::Scroll;

pub use client::{ClientConfig, NetworkNamespace};
pub use framer::Framer;
pub use server::serve;

/// Default TCP port for the wire protocol.
pub const DEFAULT_PORT: u16 = 9564;

/// Protocol operations. `unwatch` is a protocol-only concern: it cancels
/// a subscription started by `watch` on the same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Read,
    Write,
    List,
    Watch,
    Unwatch,
    Close,
}

/// Client → server message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub tag: u64,
    pub op: Op,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

/// Server → client message: a direct response, or a pushed watch event
/// (`event: true`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub tag: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll: Option<Scroll>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub event: bool,
}

impl Response {
    pub fn ok(tag: u64) -> Self {
        Self { tag, ok: true, scroll: None, paths: None, error: None, code: None, event: false }
    }

    pub fn with_scroll(tag: u64, scroll: Option<Scroll>) -> Self {
        Self { scroll, ..Self::ok(tag) }
    }

    pub fn with_paths(tag: u64, paths: Vec<String>) -> Self {
        Self { paths: Some(paths), ..Self::ok(tag) }
    }

    pub fn pushed_event(tag: u64, scroll: Scroll) -> Self {
        Self { scroll: Some(scroll), event: true, ..Self::ok(tag) }
    }

    pub fn failure(tag: u64, err: &NineError) -> Self {
        Self {
            tag,
            ok: false,
            scroll: None,
            paths: None,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
            event: false,
        }
    }

    /// Reconstruct the error variant a failure response carries.
    pub fn into_error(&self) -> NineError {
        let message = self.error.as_deref().unwrap_or("unknown error");
        match self.code.as_deref() {
            Some(code) => NineError::from_code(code, message),
            None => NineError::Internal(message.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let req = Request { tag: 3, op: Op::Watch, path: Some("/wallet/**".into()), data: None };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"tag": 3, "op": "watch", "path": "/wallet/**"}));
    }

    #[test]
    fn response_event_flag_only_when_set() {
        let plain = Response::ok(1);
        assert!(!serde_json::to_value(&plain).unwrap().as_object().unwrap().contains_key("event"));

        let event = Response::pushed_event(1, Scroll::new("/x", Map::new()));
        assert_eq!(serde_json::to_value(&event).unwrap()["event"], json!(true));
    }

    #[test]
    fn failure_preserves_error_identity() {
        let err = NineError::Unavailable("too many watchers".into());
        let resp = Response::failure(9, &err);
        assert_eq!(resp.code.as_deref(), Some("unavailable"));
        assert_eq!(resp.into_error(), err);
    }

    #[test]
    fn unknown_code_decodes_as_internal() {
        let resp = Response {
            code: Some("from_the_future".into()),
            error: Some("??".into()),
            ok: false,
            ..Response::ok(1)
        };
        assert!(matches!(resp.into_error(), NineError::Internal(_)));
    }
}
