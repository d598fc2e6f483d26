//! Conflict detection between a local and a server copy of one entity.
//!
//! Entities are JSON objects. A [`Conflict`] is produced for every field whose
//! values differ, carrying both values and both copies' `updatedAt` so a
//! resolver (or a user) can pick a side.
//!
//! The id field and `updatedAt` itself are never reported: they identify and
//! version the entity rather than describe it.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Field holding an entity's last modification time.
pub const UPDATED_AT: &str = "updatedAt";

/// A field-level mismatch between a local and a server version of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub field: String,
    pub local_value: Value,
    pub server_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_updated_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_updated_at: Option<Value>,
}

/// Which fields are examined for conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyScope {
    /// Only fields present on the local copy; server-only fields are ignored
    #[default]
    LocalKeys,
    /// Fields present on either copy; a missing side reads as `null`
    Union,
}

/// Compare two copies of an entity field by field.
///
/// Only fields present on `local` are examined. An empty result means the
/// caller can simply adopt the server copy.
pub fn detect(local: &Value, server: &Value, id_field: &str) -> Result<Vec<Conflict>> {
    detect_with(local, server, id_field, KeyScope::LocalKeys)
}

/// Compare two copies of an entity over the chosen key scope.
pub fn detect_with(
    local: &Value,
    server: &Value,
    id_field: &str,
    scope: KeyScope,
) -> Result<Vec<Conflict>> {
    let local_obj = as_object(local, "local")?;
    let server_obj = as_object(server, "server")?;

    let local_updated_at = local_obj.get(UPDATED_AT).cloned();
    let server_updated_at = server_obj.get(UPDATED_AT).cloned();

    let fields: Vec<&String> = match scope {
        KeyScope::LocalKeys => local_obj.keys().collect(),
        KeyScope::Union => local_obj
            .keys()
            .chain(server_obj.keys())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    };

    let conflicts = fields
        .into_iter()
        .filter(|field| field.as_str() != id_field && field.as_str() != UPDATED_AT)
        .filter_map(|field| {
            let local_value = local_obj.get(field).unwrap_or(&Value::Null);
            let server_value = server_obj.get(field).unwrap_or(&Value::Null);

            (local_value != server_value).then(|| Conflict {
                field: field.clone(),
                local_value: local_value.clone(),
                server_value: server_value.clone(),
                local_updated_at: local_updated_at.clone(),
                server_updated_at: server_updated_at.clone(),
            })
        })
        .collect();

    Ok(conflicts)
}

/// [`detect`] over typed domain entities.
pub fn detect_entities<T: Serialize>(
    local: &T,
    server: &T,
    id_field: &str,
) -> Result<Vec<Conflict>> {
    let local = serde_json::to_value(local)?;
    let server = serde_json::to_value(server)?;
    detect(&local, &server, id_field)
}

pub(crate) fn as_object<'a>(
    value: &'a Value,
    side: &'static str,
) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or(Error::NotAnObject(side))
}
