//! Cache key layout.
//!
//! Every key lives under [`NAMESPACE`]; callers pass keys without it and the
//! [`Cache`](super::Cache) facade adds it.

use serde::Serialize;
use uuid::Uuid;

pub const NAMESPACE: &str = "contacts:";
pub const LIST_PREFIX: &str = "list:";
pub const CONTACT_PREFIX: &str = "contact:";
pub const IDEMPOTENCY_PREFIX: &str = "idempotency:";

/// Key for a list envelope: the prefix followed by the JSON of the normalized
/// query. Field order follows the struct, so equal queries produce equal keys.
pub fn list_key<P: Serialize>(params: &P) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_string(params)?;
    Ok(format!("{LIST_PREFIX}{encoded}"))
}

pub fn contact_key(id: Uuid) -> String {
    format!("{CONTACT_PREFIX}{id}")
}

pub fn idempotency_key(operation: &str, client_key: &str) -> String {
    format!("{IDEMPOTENCY_PREFIX}{operation}:{client_key}")
}

/// Leading segment of a key, used as a metrics label.
pub(crate) fn scope_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}
