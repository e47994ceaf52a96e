//! RFC 6902 patch engine.
//!
//! Every successful write in a history-enabled store produces a `Patch`:
//! the JSON Patch operations that transform the prior scroll's data into
//! the new one, chained by content hash. Diffing is structural for
//! mappings, deliberately coarse for lists (a single replace), and
//! applying is pure: the input scroll is never mutated.

pub mod pointer;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::NineError;
use crate::scroll::{content_hash, Scroll};

/// Failures while parsing or applying patch operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("pointer target not found: {0}")]
    PathNotFound(String),

    #[error("type mismatch traversing {0}")]
    TypeMismatch(String),

    #[error("test failed at {0}")]
    TestFailed(String),

    #[error("invalid pointer: {0}")]
    InvalidPointer(String),
}

impl From<PatchError> for NineError {
    fn from(err: PatchError) -> Self {
        NineError::Internal(err.to_string())
    }
}

/// A single RFC 6902 operation in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

/// An append-only history record: the ops, the parent scroll's hash (null
/// for genesis), the resulting scroll's hash, and a per-key sequence
/// number starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub key: String,
    pub ops: Vec<PatchOp>,
    pub parent: Option<String>,
    pub hash: String,
    pub timestamp: i64,
    pub seq: u64,
}

/// Structural deep equality: mappings compare key-order independently,
/// lists positionally.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// Diff two scrolls into a patch record.
///
/// Genesis (no prior) is a single root replace carrying the whole data
/// document. Otherwise mappings are compared key by key — removed keys
/// emit `remove`, new keys emit `add`, changed nested mappings recurse,
/// and everything else (lists included) collapses into `replace`.
pub fn diff(prior: Option<&Scroll>, current: &Scroll, seq: u64, timestamp: i64) -> Patch {
    let ops = match prior {
        None => vec![PatchOp::Replace {
            path: String::new(),
            value: Value::Object(current.data.clone()),
        }],
        Some(prior) => {
            let mut ops = Vec::new();
            diff_maps(&mut Vec::new(), &prior.data, &current.data, &mut ops);
            ops
        }
    };
    Patch {
        key: current.key.clone(),
        ops,
        parent: prior.and_then(|p| p.metadata.hash.clone()),
        hash: current
            .metadata
            .hash
            .clone()
            .unwrap_or_else(|| current.compute_hash()),
        timestamp,
        seq,
    }
}

fn diff_maps(
    prefix: &mut Vec<String>,
    prior: &Map<String, Value>,
    current: &Map<String, Value>,
    ops: &mut Vec<PatchOp>,
) {
    for key in prior.keys() {
        if !current.contains_key(key) {
            prefix.push(key.clone());
            ops.push(PatchOp::Remove { path: pointer::encode(prefix) });
            prefix.pop();
        }
    }
    for (key, value) in current {
        prefix.push(key.clone());
        match prior.get(key) {
            None => ops.push(PatchOp::Add { path: pointer::encode(prefix), value: value.clone() }),
            Some(old) if old != value => match (old, value) {
                (Value::Object(old_map), Value::Object(new_map)) => {
                    diff_maps(prefix, old_map, new_map, ops);
                }
                _ => ops.push(PatchOp::Replace {
                    path: pointer::encode(prefix),
                    value: value.clone(),
                }),
            },
            Some(_) => {}
        }
        prefix.pop();
    }
}

/// Apply a patch to a scroll, yielding a new scroll with the transformed
/// data and `metadata.version = patch.seq`. Pure: same input, same output.
pub fn apply(prior: &Scroll, patch: &Patch) -> Result<Scroll, PatchError> {
    let mut doc = Value::Object(prior.data.clone());
    for op in &patch.ops {
        apply_op(&mut doc, op)?;
    }
    let data = match doc {
        Value::Object(map) => map,
        _ => return Err(PatchError::TypeMismatch("root must remain a mapping".into())),
    };

    let mut metadata = prior.metadata.clone();
    metadata.version = patch.seq;
    metadata.hash = Some(content_hash(&prior.key, prior.scroll_type.as_deref(), &data));
    Ok(Scroll {
        key: prior.key.clone(),
        scroll_type: prior.scroll_type.clone(),
        metadata,
        data,
    })
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { path, value } => {
            pointer::add(doc, &pointer::parse(path)?, value.clone())
        }
        PatchOp::Remove { path } => {
            pointer::remove(doc, &pointer::parse(path)?).map(|_| ())
        }
        PatchOp::Replace { path, value } => {
            pointer::replace(doc, &pointer::parse(path)?, value.clone())
        }
        PatchOp::Move { from, path } => {
            let taken = pointer::remove(doc, &pointer::parse(from)?)?;
            pointer::add(doc, &pointer::parse(path)?, taken)
        }
        PatchOp::Copy { from, path } => {
            let copied = pointer::get(doc, &pointer::parse(from)?)?.clone();
            pointer::add(doc, &pointer::parse(path)?, copied)
        }
        PatchOp::Test { path, value } => {
            let actual = pointer::get(doc, &pointer::parse(path)?)?;
            if deep_equal(actual, value) {
                Ok(())
            } else {
                Err(PatchError::TestFailed(path.clone()))
            }
        }
    }
}

/// Parent-chain check: a patch verifies against the state it was diffed
/// from.
pub fn verify(prior: Option<&Scroll>, patch: &Patch) -> bool {
    match prior {
        None => patch.parent.is_none(),
        Some(prior) => prior.metadata.hash == patch.parent && patch.parent.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scroll(data: Value) -> Scroll {
        let map = data.as_object().cloned().unwrap();
        let mut s = Scroll::new("/doc", map);
        s.metadata.hash = Some(s.compute_hash());
        s
    }

    #[test]
    fn genesis_diff_is_root_replace() {
        let current = scroll(json!({"a": 1}));
        let patch = diff(None, &current, 1, 0);
        assert_eq!(patch.parent, None);
        assert_eq!(patch.seq, 1);
        assert_eq!(
            patch.ops,
            vec![PatchOp::Replace { path: "".into(), value: json!({"a": 1}) }]
        );
    }

    #[test]
    fn diff_emits_add_remove_replace() {
        let prior = scroll(json!({"keep": 1, "gone": 2, "change": 3}));
        let current = scroll(json!({"keep": 1, "change": 4, "fresh": 5}));
        let patch = diff(Some(&prior), &current, 2, 0);

        assert!(patch.ops.contains(&PatchOp::Remove { path: "/gone".into() }));
        assert!(patch.ops.contains(&PatchOp::Replace { path: "/change".into(), value: json!(4) }));
        assert!(patch.ops.contains(&PatchOp::Add { path: "/fresh".into(), value: json!(5) }));
        assert_eq!(patch.ops.len(), 3);
    }

    #[test]
    fn nested_maps_recurse_lists_do_not() {
        let prior = scroll(json!({"nest": {"a": 1, "b": 2}, "list": [1, 2]}));
        let current = scroll(json!({"nest": {"a": 1, "b": 3}, "list": [1, 2, 3]}));
        let patch = diff(Some(&prior), &current, 2, 0);

        assert!(patch.ops.contains(&PatchOp::Replace { path: "/nest/b".into(), value: json!(3) }));
        assert!(patch.ops.contains(&PatchOp::Replace { path: "/list".into(), value: json!([1, 2, 3]) }));
    }

    #[test]
    fn diff_apply_round_trip() {
        let cases = [
            (None, json!({"a": 1})),
            (Some(json!({"a": 1})), json!({"a": 2, "b": {"c": [1, 2]}})),
            (Some(json!({"deep": {"x": 1, "y": 2}})), json!({"deep": {"y": 2}})),
            (Some(json!({"l": [1, 2, 3]})), json!({"l": []})),
        ];
        for (prior_data, current_data) in cases {
            let prior = prior_data.map(scroll);
            let current = scroll(current_data);
            let patch = diff(prior.as_ref(), &current, 7, 0);

            let base = prior.clone().unwrap_or_else(|| Scroll::new("/doc", Map::new()));
            let applied = apply(&base, &patch).unwrap();
            assert_eq!(applied.data, current.data);
            assert_eq!(applied.metadata.version, 7);
            assert!(verify(prior.as_ref(), &patch));
        }
    }

    #[test]
    fn apply_is_pure() {
        let base = scroll(json!({"a": 1}));
        let patch = diff(Some(&base), &scroll(json!({"a": 2})), 2, 0);
        let first = apply(&base, &patch).unwrap();
        let second = apply(&base, &patch).unwrap();
        assert_eq!(first, second);
        assert_eq!(base.data, scroll(json!({"a": 1})).data);
    }

    #[test]
    fn escaped_keys_round_trip() {
        let prior = scroll(json!({}));
        let current = scroll(json!({"odd/key": 1, "tilde~key": 2}));
        let patch = diff(Some(&prior), &current, 2, 0);
        let applied = apply(&prior, &patch).unwrap();
        assert_eq!(applied.data, current.data);
    }

    #[test]
    fn test_op_gates_application() {
        let base = scroll(json!({"state": "ready"}));
        let ok = Patch {
            key: "/doc".into(),
            ops: vec![PatchOp::Test { path: "/state".into(), value: json!("ready") }],
            parent: None,
            hash: String::new(),
            timestamp: 0,
            seq: 1,
        };
        assert!(apply(&base, &ok).is_ok());

        let bad = Patch {
            ops: vec![PatchOp::Test { path: "/state".into(), value: json!("other") }],
            ..ok
        };
        assert_eq!(
            apply(&base, &bad),
            Err(PatchError::TestFailed("/state".into()))
        );
    }

    #[test]
    fn move_and_copy() {
        let base = scroll(json!({"src": {"v": 1}, "keep": 2}));
        let patch = Patch {
            key: "/doc".into(),
            ops: vec![
                PatchOp::Copy { from: "/keep".into(), path: "/kept".into() },
                PatchOp::Move { from: "/src/v".into(), path: "/moved".into() },
            ],
            parent: None,
            hash: String::new(),
            timestamp: 0,
            seq: 1,
        };
        let applied = apply(&base, &patch).unwrap();
        assert_eq!(applied.data, json!({"src": {}, "keep": 2, "kept": 2, "moved": 1}).as_object().cloned().unwrap());
    }

    #[test]
    fn wire_form_is_rfc6902() {
        let op = PatchOp::Add { path: "/a".into(), value: json!(1) };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "add", "path": "/a", "value": 1})
        );
        let mv: PatchOp = serde_json::from_value(json!({"op": "move", "from": "/a", "path": "/b"})).unwrap();
        assert_eq!(mv, PatchOp::Move { from: "/a".into(), path: "/b".into() });
    }
}
