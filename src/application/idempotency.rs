//! Replay protection for unsafe contact mutations.
//!
//! The guarantee is weak: there is no lock between `check` and
//! `store`, so two concurrent attempts carrying the same key may both execute.
//! The storage unique constraint remains the last line for duplicate creates.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::info;

use crate::cache::{Cache, idempotency_key};

const METRIC_IDEMPOTENT_REPLAY: &str = "rolodex_idempotent_replay_total";

pub const CREATE_CONTACT_OPERATION: &str = "create-contact";

pub fn update_contact_operation(id: uuid::Uuid) -> String {
    format!("update-contact-{id}")
}

#[derive(Clone)]
pub struct IdempotencyLedger {
    cache: Arc<Cache>,
    ttl: Duration,
}

impl IdempotencyLedger {
    pub fn new(cache: Arc<Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Previously recorded response for `(operation, key)`, if any. Without a
    /// key nothing is looked up.
    pub async fn check<T: DeserializeOwned>(
        &self,
        operation: &str,
        client_key: Option<&str>,
    ) -> Option<T> {
        let client_key = client_key?;
        let recorded = self
            .cache
            .get_json::<T>(&idempotency_key(operation, client_key))
            .await?;

        info!(
            target = "rolodex::idempotency",
            operation,
            idempotency_key = client_key,
            "Replaying recorded response"
        );
        counter!(METRIC_IDEMPOTENT_REPLAY, "operation" => operation_label(operation)).increment(1);
        Some(recorded)
    }

    /// Record the response of a committed mutation. No-op without a key.
    pub async fn store<T: Serialize>(&self, operation: &str, client_key: Option<&str>, response: &T) {
        let Some(client_key) = client_key else {
            return;
        };
        self.cache
            .set_json(&idempotency_key(operation, client_key), response, self.ttl)
            .await;
    }
}

// Update operations embed the id; collapse them so the label stays low-cardinality.
fn operation_label(operation: &str) -> &'static str {
    if operation == CREATE_CONTACT_OPERATION {
        "create-contact"
    } else {
        "update-contact"
    }
}
