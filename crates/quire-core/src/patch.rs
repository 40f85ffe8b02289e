//! Structural diff and patch application for JSON documents
//!
//! The codec is pure: `diff` produces an edit script of add/remove/replace
//! operations, `apply` replays such a script against a document, and
//! `validate_operations` guards raw caller input before it reaches `apply`.
//! Applying `diff(a, b)` to `a` reproduces `b` exactly.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON document: string keys, arbitrarily nested values.
pub type Document = Map<String, Value>;

/// Operation kind. The recognized set is add/remove/replace only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
}

/// A single structural edit at a slash-delimited path.
///
/// Wire shape is exactly three fields: `op`, `path`, `value`. The `value`
/// field is carried but ignored for remove.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op: OpKind,
    pub path: String,
    pub value: Value,
}

/// A recorded edit script plus the document version it was applied from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub version: u64,
    pub operations: Vec<Operation>,
}

/// Compute the edit script that transforms `old` into `new`.
///
/// Ordering is stable for identical inputs: object keys are visited in the
/// map's sorted order, and array shrinks are emitted highest-index-first so
/// earlier paths stay valid while the script replays.
pub fn diff(old: &Document, new: &Document) -> Vec<Operation> {
    let mut operations = Vec::new();
    diff_objects(old, new, "", &mut operations);
    operations
}

fn diff_objects(old: &Document, new: &Document, path: &str, operations: &mut Vec<Operation>) {
    for (key, old_value) in old {
        let child = format!("{}/{}", path, escape_token(key));
        match new.get(key) {
            Some(new_value) => diff_values(old_value, new_value, &child, operations),
            None => operations.push(Operation {
                op: OpKind::Remove,
                path: child,
                value: Value::Null,
            }),
        }
    }

    for (key, new_value) in new {
        if !old.contains_key(key) {
            operations.push(Operation {
                op: OpKind::Add,
                path: format!("{}/{}", path, escape_token(key)),
                value: new_value.clone(),
            });
        }
    }
}

fn diff_values(old: &Value, new: &Value, path: &str, operations: &mut Vec<Operation>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => diff_objects(a, b, path, operations),
        (Value::Array(a), Value::Array(b)) => diff_arrays(a, b, path, operations),
        _ if old == new => {}
        _ => operations.push(Operation {
            op: OpKind::Replace,
            path: path.to_string(),
            value: new.clone(),
        }),
    }
}

fn diff_arrays(old: &[Value], new: &[Value], path: &str, operations: &mut Vec<Operation>) {
    let shared = old.len().min(new.len());

    for i in 0..shared {
        diff_values(&old[i], &new[i], &format!("{}/{}", path, i), operations);
    }

    // Shrink from the tail: removing index n before n-1 would shift paths.
    for i in (new.len()..old.len()).rev() {
        operations.push(Operation {
            op: OpKind::Remove,
            path: format!("{}/{}", path, i),
            value: Value::Null,
        });
    }

    for (i, item) in new.iter().enumerate().skip(old.len()) {
        operations.push(Operation {
            op: OpKind::Add,
            path: format!("{}/{}", path, i),
            value: item.clone(),
        });
    }
}

/// Apply `operations` in order and return the resulting document.
///
/// Fails with `PatchApply` when a remove or replace references a missing
/// path, an add references a missing parent, or the operation list is empty.
pub fn apply(document: &Document, operations: &[Operation]) -> Result<Document> {
    if operations.is_empty() {
        return Err(Error::PatchApply("empty operation list".into()));
    }

    let mut root = Value::Object(document.clone());
    for operation in operations {
        apply_one(&mut root, operation)?;
    }

    match root {
        Value::Object(map) => Ok(map),
        _ => Err(Error::PatchApply(
            "document root replaced with a non-object value".into(),
        )),
    }
}

/// Structural guard over raw caller input.
///
/// Each entry must be an object with exactly the three recognized fields
/// (`op`, `path`, `value`) and a known operation kind; anything else fails
/// with `Validation` before it can reach `apply`.
pub fn validate_operations(raw: &[Value]) -> Result<Vec<Operation>> {
    raw.iter()
        .map(|entry| {
            let object = entry.as_object().ok_or_else(|| {
                Error::Validation(format!("expecting an operation object, got {}", entry))
            })?;

            let well_formed = object.len() == 3
                && object
                    .keys()
                    .all(|key| matches!(key.as_str(), "op" | "path" | "value"));
            if !well_formed {
                let keys: Vec<&str> = object.keys().map(String::as_str).collect();
                return Err(Error::Validation(format!(
                    "bad operation fields: {}",
                    keys.join(", ")
                )));
            }

            serde_json::from_value(entry.clone()).map_err(|e| Error::Validation(e.to_string()))
        })
        .collect()
}

fn apply_one(root: &mut Value, operation: &Operation) -> Result<()> {
    let tokens = parse_path(&operation.path)?;
    let path = operation.path.as_str();

    match operation.op {
        OpKind::Add => add_at(root, &tokens, operation.value.clone(), path),
        OpKind::Remove => remove_at(root, &tokens, path),
        OpKind::Replace => replace_at(root, &tokens, operation.value.clone(), path),
    }
}

fn parse_path(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| Error::PatchApply(format!("path {} must start with '/'", path)))?;
    Ok(rest.split('/').map(unescape_token).collect())
}

/// Walk `tokens` down from `root`, failing if any step is missing.
fn descend<'a>(root: &'a mut Value, tokens: &[String], path: &str) -> Result<&'a mut Value> {
    let mut current = root;
    for token in tokens {
        current = match current {
            Value::Object(map) => map
                .get_mut(token.as_str())
                .ok_or_else(|| missing(path))?,
            Value::Array(items) => {
                let index = array_index(token, items.len(), false, path)?;
                &mut items[index]
            }
            _ => return Err(missing(path)),
        };
    }
    Ok(current)
}

fn add_at(root: &mut Value, tokens: &[String], value: Value, path: &str) -> Result<()> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err(Error::PatchApply("cannot add at the document root".into()));
    };

    match descend(root, parents, path)? {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
            } else {
                let index = array_index(last, items.len(), true, path)?;
                items.insert(index, value);
            }
            Ok(())
        }
        _ => Err(missing(path)),
    }
}

fn remove_at(root: &mut Value, tokens: &[String], path: &str) -> Result<()> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err(Error::PatchApply("cannot remove the document root".into()));
    };

    match descend(root, parents, path)? {
        Value::Object(map) => map.remove(last.as_str()).map(|_| ()).ok_or_else(|| missing(path)),
        Value::Array(items) => {
            let index = array_index(last, items.len(), false, path)?;
            items.remove(index);
            Ok(())
        }
        _ => Err(missing(path)),
    }
}

fn replace_at(root: &mut Value, tokens: &[String], value: Value, path: &str) -> Result<()> {
    let Some((last, parents)) = tokens.split_last() else {
        *root = value;
        return Ok(());
    };

    match descend(root, parents, path)? {
        Value::Object(map) => {
            if !map.contains_key(last.as_str()) {
                return Err(missing(path));
            }
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(last, items.len(), false, path)?;
            items[index] = value;
            Ok(())
        }
        _ => Err(missing(path)),
    }
}

fn array_index(token: &str, len: usize, allow_end: bool, path: &str) -> Result<usize> {
    let index: usize = token
        .parse()
        .map_err(|_| Error::PatchApply(format!("invalid array index in {}", path)))?;
    if index > len || (index == len && !allow_end) {
        return Err(missing(path));
    }
    Ok(index)
}

fn missing(path: &str) -> Error {
    Error::PatchApply(format!("path {} does not exist", path))
}

// RFC 6901 token escaping: '~' -> "~0", '/' -> "~1".
fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}
