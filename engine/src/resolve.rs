//! Conflict resolution: turning a strategy and two copies into one entity.
//!
//! Two families of strategies are offered:
//!
//! - [`ResolutionStrategy`] is chosen by a caller, usually after showing the
//!   detected conflicts to the user. `Manual` carries per-field selections.
//! - [`AutoMergeStrategy`] merges without any interactive step, using the
//!   copies' `updatedAt` and the shape of their values.
//!
//! Every strategy falls back to the server copy when in doubt.

use crate::{
    conflict::{as_object, Conflict, UPDATED_AT},
    error::Result,
    Error,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Fields never copied from the local side by the auto-merge strategies.
const PROTECTED_FIELDS: [&str; 2] = ["id", "createdAt"];

/// Which side wins for one field in a manual resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    Local,
    Server,
}

/// Field name to chosen side.
pub type Selections = BTreeMap<String, Selection>;

/// Caller-chosen resolution strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "strategy", content = "selections")]
pub enum ResolutionStrategy {
    /// Keep the local copy unchanged
    Local,
    /// Adopt the authoritative server copy
    #[default]
    Server,
    /// Server copy with selected fields taken from the local copy
    Manual(Selections),
}

impl ResolutionStrategy {
    /// Map a strategy name to a strategy; unknown or absent names mean `Server`.
    pub fn from_name(name: Option<&str>, selections: Selections) -> Self {
        match name.map(str::trim) {
            Some(n) if n.eq_ignore_ascii_case("local") => ResolutionStrategy::Local,
            Some(n) if n.eq_ignore_ascii_case("manual") => ResolutionStrategy::Manual(selections),
            _ => ResolutionStrategy::Server,
        }
    }
}

/// Resolve two copies of an entity with a caller-chosen strategy.
pub fn resolve(strategy: &ResolutionStrategy, local: &Value, server: &Value) -> Result<Value> {
    match strategy {
        ResolutionStrategy::Local => Ok(local.clone()),
        ResolutionStrategy::Server => Ok(server.clone()),
        ResolutionStrategy::Manual(selections) => {
            let local_obj = as_object(local, "local")?;
            let mut merged = as_object(server, "server")?.clone();

            for (field, selection) in selections {
                if *selection != Selection::Local {
                    continue;
                }
                match local_obj.get(field) {
                    Some(value) => {
                        merged.insert(field.clone(), value.clone());
                    }
                    None => {
                        merged.remove(field);
                    }
                }
            }

            Ok(Value::Object(merged))
        }
    }
}

/// Resolve interactively.
///
/// Without conflicts the server copy is adopted and `prompt` is not called.
/// A prompt returning `None` means the user dismissed the resolution.
pub fn resolve_with<P>(
    conflicts: &[Conflict],
    local: &Value,
    server: &Value,
    prompt: P,
) -> Result<Value>
where
    P: FnOnce(&[Conflict]) -> Option<ResolutionStrategy>,
{
    if conflicts.is_empty() {
        return Ok(server.clone());
    }

    let strategy = prompt(conflicts).ok_or(Error::ResolutionCancelled)?;
    resolve(&strategy, local, server)
}

/// [`resolve`] over typed domain entities.
pub fn resolve_entities<T>(strategy: &ResolutionStrategy, local: &T, server: &T) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let merged = resolve(
        strategy,
        &serde_json::to_value(local)?,
        &serde_json::to_value(server)?,
    )?;
    Ok(serde_json::from_value(merged)?)
}

/// Non-interactive merge strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutoMergeStrategy {
    #[default]
    ServerWins,
    LocalWins,
    /// The copy with the later `updatedAt` wins entirely
    NewestWins,
    /// If local is newer, its fields overwrite the server copy
    FieldByField,
    /// Structural merge of arrays and nested objects
    DeepMerge,
}

/// Merge two copies of an entity without user interaction.
pub fn auto_merge(strategy: AutoMergeStrategy, local: &Value, server: &Value) -> Result<Value> {
    match strategy {
        AutoMergeStrategy::ServerWins => Ok(server.clone()),
        AutoMergeStrategy::LocalWins => Ok(local.clone()),
        AutoMergeStrategy::NewestWins => {
            if local_is_newer(local, server) {
                Ok(local.clone())
            } else {
                Ok(server.clone())
            }
        }
        AutoMergeStrategy::FieldByField => {
            if !local_is_newer(local, server) {
                return Ok(server.clone());
            }
            let local_obj = as_object(local, "local")?;
            let mut merged = as_object(server, "server")?.clone();
            for (field, value) in unprotected(local_obj) {
                merged.insert(field.clone(), value.clone());
            }
            Ok(Value::Object(merged))
        }
        AutoMergeStrategy::DeepMerge => {
            let local_obj = as_object(local, "local")?;
            let mut merged = as_object(server, "server")?.clone();
            for (field, local_value) in unprotected(local_obj) {
                let next = match merged.get(field) {
                    Some(Value::Array(server_items)) => match local_value {
                        Value::Array(local_items) => Some(union(server_items, local_items)),
                        _ => None,
                    },
                    Some(Value::Object(server_fields)) => match local_value {
                        Value::Object(local_fields) => {
                            Some(shallow_merge(server_fields, local_fields))
                        }
                        _ => None,
                    },
                    Some(Value::Null) | None => Some(local_value.clone()),
                    Some(_) => None,
                };
                if let Some(value) = next {
                    merged.insert(field.clone(), value);
                }
            }
            Ok(Value::Object(merged))
        }
    }
}

/// [`auto_merge`] over typed domain entities.
pub fn auto_merge_entities<T>(strategy: AutoMergeStrategy, local: &T, server: &T) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let merged = auto_merge(
        strategy,
        &serde_json::to_value(local)?,
        &serde_json::to_value(server)?,
    )?;
    Ok(serde_json::from_value(merged)?)
}

fn unprotected(fields: &Map<String, Value>) -> impl Iterator<Item = (&String, &Value)> {
    fields
        .iter()
        .filter(|(field, _)| !PROTECTED_FIELDS.contains(&field.as_str()))
}

/// Server items first, then local items not already present.
///
/// Duplicates are detected by structural equality, so two objects are the
/// same item only when all of their fields are equal.
fn union(server: &[Value], local: &[Value]) -> Value {
    let mut items: Vec<Value> = Vec::with_capacity(server.len() + local.len());
    for item in server.iter().chain(local) {
        if !items.contains(item) {
            items.push(item.clone());
        }
    }
    Value::Array(items)
}

fn shallow_merge(server: &Map<String, Value>, local: &Map<String, Value>) -> Value {
    let mut merged = server.clone();
    for (field, value) in local {
        merged.insert(field.clone(), value.clone());
    }
    Value::Object(merged)
}

fn local_is_newer(local: &Value, server: &Value) -> bool {
    compare_updated_at(local.get(UPDATED_AT), server.get(UPDATED_AT)) == Ordering::Greater
}

/// Order two `updatedAt` values.
///
/// Numbers are epoch timestamps, strings are RFC 3339 (compared lexically when
/// they do not parse). A missing or null value is older than any present one.
pub fn compare_updated_at(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());

    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (Some(a), Some(b)) => match (as_millis(a), as_millis(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => Ordering::Equal,
            },
        },
    }
}

fn as_millis(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64),
        _ => None,
    }
}
