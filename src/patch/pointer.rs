//! RFC 6901 JSON pointers.
//!
//! Pointers address locations inside a scroll's data document. The empty
//! pointer addresses the root. Token escaping: `~0` decodes to `~`, `~1`
//! decodes to `/`.

use serde_json::Value;

use super::PatchError;

/// Parse a pointer into reference tokens.
pub fn parse(pointer: &str) -> Result<Vec<String>, PatchError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(PatchError::InvalidPointer(pointer.to_string()));
    }
    Ok(pointer[1..].split('/').map(unescape).collect())
}

/// Render tokens back into pointer syntax.
pub fn encode(tokens: &[String]) -> String {
    let mut out = String::new();
    for token in tokens {
        out.push('/');
        out.push_str(&escape(token));
    }
    out
}

pub fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn array_index(token: &str, len: usize, pointer: &str) -> Result<usize, PatchError> {
    if token == "-" {
        return Ok(len);
    }
    // Leading zeros and signs are not valid array indices.
    if token.len() > 1 && token.starts_with('0') {
        return Err(PatchError::InvalidPointer(pointer.to_string()));
    }
    token
        .parse::<usize>()
        .map_err(|_| PatchError::InvalidPointer(pointer.to_string()))
}

/// Resolve a pointer to a reference inside `doc`.
pub fn get<'a>(doc: &'a Value, tokens: &[String]) -> Result<&'a Value, PatchError> {
    let mut current = doc;
    for (depth, token) in tokens.iter().enumerate() {
        let at = encode(&tokens[..=depth]);
        current = match current {
            Value::Object(map) => map.get(token).ok_or(PatchError::PathNotFound(at))?,
            Value::Array(items) => {
                let idx = array_index(token, items.len(), &at)?;
                items.get(idx).ok_or(PatchError::PathNotFound(at))?
            }
            _ => return Err(PatchError::TypeMismatch(at)),
        };
    }
    Ok(current)
}

/// Descend to the parent container of the final token.
///
/// With `create` set, missing intermediate object keys are created as
/// empty objects; otherwise a missing step is `PathNotFound`. Traversal
/// through a scalar is always `TypeMismatch`.
fn parent<'a>(
    doc: &'a mut Value,
    tokens: &[String],
    create: bool,
) -> Result<&'a mut Value, PatchError> {
    let mut current = doc;
    for (depth, token) in tokens[..tokens.len() - 1].iter().enumerate() {
        let at = encode(&tokens[..=depth]);
        current = match current {
            Value::Object(map) => {
                if create && !map.contains_key(token) {
                    map.insert(token.clone(), Value::Object(serde_json::Map::new()));
                }
                map.get_mut(token).ok_or(PatchError::PathNotFound(at))?
            }
            Value::Array(items) => {
                let idx = array_index(token, items.len(), &at)?;
                items.get_mut(idx).ok_or(PatchError::PathNotFound(at))?
            }
            _ => return Err(PatchError::TypeMismatch(at)),
        };
    }
    Ok(current)
}

/// `add` semantics: set at the pointer, creating intermediate mappings on
/// demand; `-` appends to arrays, numeric indices insert.
pub fn add(doc: &mut Value, tokens: &[String], value: Value) -> Result<(), PatchError> {
    if tokens.is_empty() {
        *doc = value;
        return Ok(());
    }
    let at = encode(tokens);
    let last = &tokens[tokens.len() - 1];
    match parent(doc, tokens, true)? {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx = array_index(last, items.len(), &at)?;
            if idx > items.len() {
                return Err(PatchError::PathNotFound(at));
            }
            items.insert(idx, value);
            Ok(())
        }
        _ => Err(PatchError::TypeMismatch(at)),
    }
}

/// `replace` semantics: set at the pointer without creating intermediate
/// containers. A missing object leaf is created (replay over trimmed
/// history depends on this); a missing container or array slot is not.
pub fn replace(doc: &mut Value, tokens: &[String], value: Value) -> Result<(), PatchError> {
    if tokens.is_empty() {
        *doc = value;
        return Ok(());
    }
    let at = encode(tokens);
    let last = &tokens[tokens.len() - 1];
    match parent(doc, tokens, false)? {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let idx = array_index(last, items.len(), &at)?;
            let slot = items.get_mut(idx).ok_or(PatchError::PathNotFound(at))?;
            *slot = value;
            Ok(())
        }
        _ => Err(PatchError::TypeMismatch(at)),
    }
}

/// `remove` semantics: the pointer must exist.
pub fn remove(doc: &mut Value, tokens: &[String]) -> Result<Value, PatchError> {
    if tokens.is_empty() {
        return Err(PatchError::InvalidPointer("cannot remove the root".into()));
    }
    let at = encode(tokens);
    let last = &tokens[tokens.len() - 1];
    match parent(doc, tokens, false)? {
        Value::Object(map) => map.remove(last).ok_or(PatchError::PathNotFound(at)),
        Value::Array(items) => {
            let idx = array_index(last, items.len(), &at)?;
            if idx >= items.len() {
                return Err(PatchError::PathNotFound(at));
            }
            Ok(items.remove(idx))
        }
        _ => Err(PatchError::TypeMismatch(at)),
    }
}
