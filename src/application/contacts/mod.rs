//! Contact reads and writes: cached listings, idempotent mutations.

mod commands;
mod queries;
mod seed;
mod types;

pub use queries::ListPlan;
pub use seed::{SeedReport, sample_contacts};
pub use types::{ContactError, ContactListEnvelope, ContactMutation, ListContactsQuery};

use std::{future::Future, sync::Arc, time::Duration, time::Instant};

use metrics::{counter, histogram};

use crate::application::idempotency::IdempotencyLedger;
use crate::application::repos::{ContactsRepo, ContactsWriteRepo, RepoError};
use crate::cache::Cache;

const METRIC_DB_QUERY_MS: &str = "rolodex_db_query_ms";
const METRIC_DB_QUERY_ERRORS: &str = "rolodex_db_query_errors_total";

#[derive(Clone)]
pub struct ContactService {
    reader: Arc<dyn ContactsRepo>,
    writer: Arc<dyn ContactsWriteRepo>,
    cache: Arc<Cache>,
    ledger: IdempotencyLedger,
    cache_ttl: Duration,
}

impl ContactService {
    pub fn new(
        reader: Arc<dyn ContactsRepo>,
        writer: Arc<dyn ContactsWriteRepo>,
        cache: Arc<Cache>,
        ledger: IdempotencyLedger,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            reader,
            writer,
            cache,
            ledger,
            cache_ttl,
        }
    }

    pub async fn health_check(&self) -> Result<(), RepoError> {
        self.reader.health_check().await
    }
}

/// Run a storage call, recording its latency and counting failures.
async fn observe<T, F>(operation: &'static str, call: F) -> Result<T, RepoError>
where
    F: Future<Output = Result<T, RepoError>>,
{
    let started = Instant::now();
    let result = call.await;
    histogram!(METRIC_DB_QUERY_MS, "operation" => operation)
        .record(started.elapsed().as_secs_f64() * 1000.0);
    if result.is_err() {
        counter!(METRIC_DB_QUERY_ERRORS, "operation" => operation).increment(1);
    }
    result
}
