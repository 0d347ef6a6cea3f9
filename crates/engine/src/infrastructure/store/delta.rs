//! Structured delta operators.
//!
//! Updates are nested JSON trees whose leaves are either replacement
//! values or operator objects (`$append`, `$remove`, `$update`, `$set`,
//! `$increment`, `$limit`). Non-operator branches merge recursively;
//! operators execute at the leaf. Paths use dot notation and descend into
//! lists only through the operator at the list leaf.
//!
//! Application is all-or-nothing at the store layer: the store applies a
//! delta to a scratch copy of the document and only commits on success.

use serde_json::{Map, Value};

/// Errors from applying a delta tree.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    #[error("update tree at '{path}' must be an object")]
    NotAnObject { path: String },
    #[error("'{path}' does not address a list")]
    NotAList { path: String },
    #[error("$remove at '{path}' matched no elements")]
    RemoveMatchedNothing { path: String },
    #[error("$increment at '{path}' applied to a non-numeric value")]
    NotNumeric { path: String },
    #[error("invalid operator at '{path}': {reason}")]
    InvalidOperator { path: String, reason: String },
}

/// A change the delta engine actually made, with its dot path.
///
/// The store turns these into wire `ChangeOperation`s after the commit.
#[derive(Debug, Clone)]
pub enum AppliedChange {
    /// Element appended to the list at `path`.
    Appended { path: String, value: Value },
    /// Element removed from the list at `path`.
    Removed { path: String, value: Value },
    /// Matched list elements patched in place.
    Patched { path: String, patch: Map<String, Value> },
    /// Value at `path` replaced (also covers `$increment` results).
    Set { path: String, value: Value },
    /// List at `path` truncated to its ring-buffer bound; carries the
    /// surviving list so replicas converge exactly.
    Truncated { path: String, value: Value },
}

impl AppliedChange {
    pub fn path(&self) -> &str {
        match self {
            AppliedChange::Appended { path, .. }
            | AppliedChange::Removed { path, .. }
            | AppliedChange::Patched { path, .. }
            | AppliedChange::Set { path, .. }
            | AppliedChange::Truncated { path, .. } => path,
        }
    }
}

/// Apply an update tree to a document.
///
/// `base_path` prefixes every recorded change path (the store passes
/// `"player"` when the document is a player view).
pub fn apply_update(
    target: &mut Value,
    updates: &Value,
    base_path: &str,
) -> Result<Vec<AppliedChange>, DeltaError> {
    let update_map = updates.as_object().ok_or_else(|| DeltaError::NotAnObject {
        path: base_path.to_string(),
    })?;

    let mut applied = Vec::new();
    if is_operator_map(update_map) {
        apply_operators(target, update_map, base_path, &mut applied)?;
    } else {
        merge_into(target, update_map, base_path, &mut applied)?;
    }
    Ok(applied)
}

fn join(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

fn is_operator_map(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().any(|k| k.starts_with('$'))
}

fn merge_into(
    target: &mut Value,
    updates: &Map<String, Value>,
    path: &str,
    applied: &mut Vec<AppliedChange>,
) -> Result<(), DeltaError> {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    for (key, update) in updates {
        let child_path = join(path, key);
        let slot = target
            .as_object_mut()
            .ok_or_else(|| DeltaError::NotAnObject {
                path: path.to_string(),
            })?
            .entry(key.clone())
            .or_insert(Value::Null);

        match update.as_object() {
            Some(map) if is_operator_map(map) => {
                apply_operators(slot, map, &child_path, applied)?;
            }
            Some(map) => {
                merge_into(slot, map, &child_path, applied)?;
            }
            None => {
                if slot != update {
                    *slot = update.clone();
                    applied.push(AppliedChange::Set {
                        path: child_path,
                        value: update.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Execute the operators found at one leaf, in a fixed order so that
/// `{$append, $limit}` ring buffers behave deterministically.
fn apply_operators(
    slot: &mut Value,
    ops: &Map<String, Value>,
    path: &str,
    applied: &mut Vec<AppliedChange>,
) -> Result<(), DeltaError> {
    for key in ops.keys() {
        if !key.starts_with('$') {
            return Err(DeltaError::InvalidOperator {
                path: path.to_string(),
                reason: format!("plain field '{key}' mixed into an operator object"),
            });
        }
    }

    if let Some(value) = ops.get("$set") {
        if slot != value {
            *slot = value.clone();
            applied.push(AppliedChange::Set {
                path: path.to_string(),
                value: value.clone(),
            });
        }
    }
    if let Some(predicate) = ops.get("$remove") {
        apply_remove(slot, predicate, path, applied)?;
    }
    if let Some(patches) = ops.get("$update") {
        apply_patch(slot, patches, path, applied)?;
    }
    if let Some(value) = ops.get("$append") {
        let list = as_list_mut(slot, path, true)?;
        list.push(value.clone());
        applied.push(AppliedChange::Appended {
            path: path.to_string(),
            value: value.clone(),
        });
    }
    if let Some(spec) = ops.get("$increment") {
        apply_increment(slot, spec, path, applied)?;
    }
    if let Some(limit) = ops.get("$limit") {
        apply_limit(slot, limit, path, applied)?;
    }

    for key in ops.keys() {
        if !matches!(
            key.as_str(),
            "$set" | "$remove" | "$update" | "$append" | "$increment" | "$limit"
        ) {
            return Err(DeltaError::InvalidOperator {
                path: path.to_string(),
                reason: format!("unknown operator '{key}'"),
            });
        }
    }
    Ok(())
}

fn as_list_mut<'a>(
    slot: &'a mut Value,
    path: &str,
    create: bool,
) -> Result<&'a mut Vec<Value>, DeltaError> {
    if slot.is_null() && create {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut().ok_or_else(|| DeltaError::NotAList {
        path: path.to_string(),
    })
}

fn matches_predicate(element: &Value, predicate: &Map<String, Value>) -> bool {
    predicate
        .iter()
        .all(|(key, expected)| element.get(key) == Some(expected))
}

fn apply_remove(
    slot: &mut Value,
    predicate: &Value,
    path: &str,
    applied: &mut Vec<AppliedChange>,
) -> Result<(), DeltaError> {
    let predicate = predicate
        .as_object()
        .ok_or_else(|| DeltaError::InvalidOperator {
            path: path.to_string(),
            reason: "$remove takes a predicate object".to_string(),
        })?;
    let list = as_list_mut(slot, path, false)?;

    let mut removed = Vec::new();
    list.retain(|element| {
        if matches_predicate(element, predicate) {
            removed.push(element.clone());
            false
        } else {
            true
        }
    });

    // A removal that matched nothing means the caller's precondition no
    // longer holds (e.g. a concurrent collect won the race). Abort so the
    // store commits nothing.
    if removed.is_empty() {
        return Err(DeltaError::RemoveMatchedNothing {
            path: path.to_string(),
        });
    }

    for value in removed {
        applied.push(AppliedChange::Removed {
            path: path.to_string(),
            value,
        });
    }
    Ok(())
}

fn apply_patch(
    slot: &mut Value,
    patches: &Value,
    path: &str,
    applied: &mut Vec<AppliedChange>,
) -> Result<(), DeltaError> {
    let patches = patches
        .as_array()
        .ok_or_else(|| DeltaError::InvalidOperator {
            path: path.to_string(),
            reason: "$update takes a list of patch objects".to_string(),
        })?;
    let list = as_list_mut(slot, path, false)?;

    for patch in patches {
        let patch = patch.as_object().ok_or_else(|| DeltaError::InvalidOperator {
            path: path.to_string(),
            reason: "$update elements must be objects".to_string(),
        })?;
        let id_key = ["instance_id", "id"]
            .into_iter()
            .find(|k| patch.contains_key(*k))
            .ok_or_else(|| DeltaError::InvalidOperator {
                path: path.to_string(),
                reason: "$update patch needs an instance_id or id predicate".to_string(),
            })?;
        let expected = &patch[id_key];

        let mut matched = false;
        for element in list.iter_mut() {
            if element.get(id_key) == Some(expected) {
                matched = true;
                if let Some(object) = element.as_object_mut() {
                    for (field, value) in patch {
                        if field != id_key {
                            object.insert(field.clone(), value.clone());
                        }
                    }
                }
            }
        }
        // Zero matches is a no-op by design.
        if matched {
            applied.push(AppliedChange::Patched {
                path: path.to_string(),
                patch: patch.clone(),
            });
        }
    }
    Ok(())
}

fn apply_increment(
    slot: &mut Value,
    spec: &Value,
    path: &str,
    applied: &mut Vec<AppliedChange>,
) -> Result<(), DeltaError> {
    let (amount, min, max) = match spec {
        Value::Number(n) => (number_as_f64(n, path)?, None, None),
        Value::Object(map) => {
            let amount = map
                .get("amount")
                .and_then(Value::as_f64)
                .ok_or_else(|| DeltaError::InvalidOperator {
                    path: path.to_string(),
                    reason: "$increment object form needs a numeric 'amount'".to_string(),
                })?;
            (amount, map.get("min").and_then(Value::as_f64), map.get("max").and_then(Value::as_f64))
        }
        _ => {
            return Err(DeltaError::InvalidOperator {
                path: path.to_string(),
                reason: "$increment takes a number or {amount, min?, max?}".to_string(),
            })
        }
    };

    let current = match slot {
        Value::Null => 0.0,
        Value::Number(n) => number_as_f64(n, path)?,
        _ => {
            return Err(DeltaError::NotNumeric {
                path: path.to_string(),
            })
        }
    };

    let mut next = current + amount;
    if let Some(min) = min {
        next = next.max(min);
    }
    if let Some(max) = max {
        next = next.min(max);
    }

    let next_value = if next.fract() == 0.0 {
        Value::from(next as i64)
    } else {
        Value::from(next)
    };
    if *slot != next_value {
        *slot = next_value.clone();
        applied.push(AppliedChange::Set {
            path: path.to_string(),
            value: next_value,
        });
    }
    Ok(())
}

fn number_as_f64(n: &serde_json::Number, path: &str) -> Result<f64, DeltaError> {
    n.as_f64().ok_or_else(|| DeltaError::NotNumeric {
        path: path.to_string(),
    })
}

fn apply_limit(
    slot: &mut Value,
    limit: &Value,
    path: &str,
    applied: &mut Vec<AppliedChange>,
) -> Result<(), DeltaError> {
    let limit = limit
        .as_u64()
        .ok_or_else(|| DeltaError::InvalidOperator {
            path: path.to_string(),
            reason: "$limit takes a non-negative integer".to_string(),
        })? as usize;
    let list = as_list_mut(slot, path, false)?;

    if list.len() > limit {
        let excess = list.len() - limit;
        list.drain(0..excess);
        applied.push(AppliedChange::Truncated {
            path: path.to_string(),
            value: Value::Array(list.clone()),
        });
    }
    Ok(())
}
