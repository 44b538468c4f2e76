//! In-memory stand-in for the Postgres adapter.
//!
//! Writes are staged per unit of work and applied on commit, where the email
//! unique constraint is enforced the way the database does it.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use rolodex::application::contacts::ContactService;
use rolodex::application::idempotency::IdempotencyLedger;
use rolodex::application::pagination::{SortOrder, SortValue};
use rolodex::application::repos::{
    ContactOrdering, ContactSearch, ContactsRepo, ContactsUnitOfWork, ContactsWriteRepo,
    EMAIL_UNIQUE_CONSTRAINT, IsolationLevel, KeysetQuery, OffsetQuery, RepoError,
};
use rolodex::cache::{Cache, CacheConfig};
use rolodex::domain::contacts::{ContactPatch, NewContact, phone_digits};
use rolodex::domain::entities::ContactRecord;

#[derive(Default)]
struct Shared {
    rows: Mutex<HashMap<Uuid, ContactRecord>>,
    reads: AtomicUsize,
    commits: AtomicUsize,
    /// Constraint the next insert reports as violated.
    insert_violation: Mutex<Option<String>>,
}

#[derive(Default)]
pub struct InMemoryContacts {
    shared: Arc<Shared>,
}

impl InMemoryContacts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_rows(rows: impl IntoIterator<Item = ContactRecord>) -> Arc<Self> {
        let repo = Self::default();
        {
            let mut guard = repo.shared.rows.lock().expect("rows lock");
            for row in rows {
                guard.insert(row.id, row);
            }
        }
        Arc::new(repo)
    }

    pub fn len(&self) -> usize {
        self.shared.rows.lock().expect("rows lock").len()
    }

    pub fn snapshot(&self) -> Vec<ContactRecord> {
        let mut rows: Vec<_> = self.shared.rows.lock().expect("rows lock").values().cloned().collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    /// Number of list/count/find calls that reached storage.
    pub fn reads(&self) -> usize {
        self.shared.reads.load(AtomicOrdering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(AtomicOrdering::SeqCst)
    }

    /// Make the next insert fail with a unique violation on `constraint`.
    pub fn violate_on_next_insert(&self, constraint: &str) {
        *self.shared.insert_violation.lock().expect("violation lock") = Some(constraint.to_string());
    }

    /// Write a row behind the service's back, bypassing cache invalidation.
    pub fn put_raw(&self, row: ContactRecord) {
        self.shared.rows.lock().expect("rows lock").insert(row.id, row);
    }

    fn matching(&self, search: Option<&ContactSearch>, ordering: ContactOrdering) -> Vec<ContactRecord> {
        self.shared.reads.fetch_add(1, AtomicOrdering::SeqCst);
        let mut rows: Vec<_> = self
            .shared
            .rows
            .lock()
            .expect("rows lock")
            .values()
            .filter(|row| search.is_none_or(|search| matches_search(row, search)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| compare(a, b, ordering));
        rows
    }
}

fn matches_search(row: &ContactRecord, search: &ContactSearch) -> bool {
    let needle = search.text().to_lowercase();
    let text_hit = row.name.to_lowercase().contains(&needle)
        || row.email.to_lowercase().contains(&needle);

    match search {
        ContactSearch::Text(text) => text_hit || row.phone.contains(text.as_str()),
        ContactSearch::Phone { digits, .. } => {
            text_hit || phone_digits(&row.phone).contains(digits.as_str())
        }
    }
}

fn compare_values(a: &SortValue, b: &SortValue) -> Ordering {
    match (a, b) {
        (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
        (SortValue::Timestamp(a), SortValue::Timestamp(b)) => a.cmp(b),
        (SortValue::Text(_), SortValue::Timestamp(_)) => Ordering::Less,
        (SortValue::Timestamp(_), SortValue::Text(_)) => Ordering::Greater,
    }
}

fn compare(a: &ContactRecord, b: &ContactRecord, ordering: ContactOrdering) -> Ordering {
    let natural = compare_values(&ordering.field.value_of(a), &ordering.field.value_of(b))
        .then_with(|| a.id.cmp(&b.id));
    match ordering.order {
        SortOrder::Asc => natural,
        SortOrder::Desc => natural.reverse(),
    }
}

#[async_trait]
impl ContactsRepo for InMemoryContacts {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ContactRecord>, RepoError> {
        self.shared.reads.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self.shared.rows.lock().expect("rows lock").get(&id).cloned())
    }

    async fn list_page(&self, query: &OffsetQuery) -> Result<Vec<ContactRecord>, RepoError> {
        Ok(self
            .matching(query.search.as_ref(), query.ordering)
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn count(&self, search: Option<&ContactSearch>) -> Result<u64, RepoError> {
        Ok(self.matching(search, ContactOrdering::default()).len() as u64)
    }

    async fn list_after(&self, query: &KeysetQuery) -> Result<Vec<ContactRecord>, RepoError> {
        let field = query.ordering.field;
        let rows = self.matching(query.search.as_ref(), query.ordering);
        Ok(rows
            .into_iter()
            .filter(|row| match query.after.as_ref() {
                None => true,
                Some(after) => {
                    let natural = compare_values(&field.value_of(row), after.value())
                        .then_with(|| row.id.cmp(&after.id()));
                    match query.ordering.order {
                        SortOrder::Asc => natural == Ordering::Greater,
                        SortOrder::Desc => natural == Ordering::Less,
                    }
                }
            })
            .take(query.limit as usize)
            .collect())
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

#[async_trait]
impl ContactsWriteRepo for InMemoryContacts {
    async fn begin(
        &self,
        _isolation: IsolationLevel,
    ) -> Result<Box<dyn ContactsUnitOfWork>, RepoError> {
        Ok(Box::new(InMemoryUnitOfWork {
            store: self.shared.clone(),
            staged: Vec::new(),
        }))
    }
}

enum Staged {
    Upsert(ContactRecord),
    Delete(Uuid),
}

pub struct InMemoryUnitOfWork {
    store: Arc<Shared>,
    staged: Vec<Staged>,
}

impl InMemoryUnitOfWork {
    /// Committed rows with this unit of work's staged writes applied.
    fn view(&self) -> HashMap<Uuid, ContactRecord> {
        let mut rows = self.store.rows.lock().expect("rows lock").clone();
        for write in &self.staged {
            match write {
                Staged::Upsert(row) => {
                    rows.insert(row.id, row.clone());
                }
                Staged::Delete(id) => {
                    rows.remove(id);
                }
            }
        }
        rows
    }
}

fn email_taken(rows: &HashMap<Uuid, ContactRecord>, email: &str, except: Uuid) -> bool {
    rows.values().any(|row| row.email == email && row.id != except)
}

fn duplicate() -> RepoError {
    RepoError::Duplicate {
        constraint: EMAIL_UNIQUE_CONSTRAINT.to_string(),
    }
}

#[async_trait]
impl ContactsUnitOfWork for InMemoryUnitOfWork {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<ContactRecord>, RepoError> {
        Ok(self.view().get(&id).cloned())
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Option<ContactRecord>, RepoError> {
        Ok(self.view().values().find(|row| row.email == email).cloned())
    }

    async fn insert(&mut self, contact: &NewContact) -> Result<ContactRecord, RepoError> {
        if let Some(constraint) = self.store.insert_violation.lock().expect("violation lock").take() {
            return Err(RepoError::Duplicate { constraint });
        }
        let view = self.view();
        if email_taken(&view, &contact.email, Uuid::nil()) {
            return Err(duplicate());
        }
        let now = OffsetDateTime::now_utc();
        let record = ContactRecord {
            id: Uuid::new_v4(),
            name: contact.name.clone(),
            email: contact.email.clone(),
            phone: contact.phone.clone(),
            created_at: now,
            updated_at: now,
        };
        self.staged.push(Staged::Upsert(record.clone()));
        Ok(record)
    }

    async fn update(&mut self, id: Uuid, patch: &ContactPatch) -> Result<ContactRecord, RepoError> {
        let view = self.view();
        let mut record = view.get(&id).cloned().ok_or(RepoError::NotFound)?;
        if let Some(email) = patch.email.as_ref()
            && email_taken(&view, email, id)
        {
            return Err(duplicate());
        }
        if let Some(name) = patch.name.as_ref() {
            record.name = name.clone();
        }
        if let Some(email) = patch.email.as_ref() {
            record.email = email.clone();
        }
        if let Some(phone) = patch.phone.as_ref() {
            record.phone = phone.clone();
        }
        record.updated_at = OffsetDateTime::now_utc();
        self.staged.push(Staged::Upsert(record.clone()));
        Ok(record)
    }

    async fn delete(&mut self, id: Uuid) -> Result<(), RepoError> {
        if !self.view().contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        self.staged.push(Staged::Delete(id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        let Self { store, staged } = *self;
        let mut rows = store.rows.lock().expect("rows lock");
        let mut next = rows.clone();
        for write in staged {
            match write {
                Staged::Upsert(row) => {
                    if email_taken(&next, &row.email, row.id) {
                        return Err(duplicate());
                    }
                    next.insert(row.id, row);
                }
                Staged::Delete(id) => {
                    next.remove(&id);
                }
            }
        }
        *rows = next;
        store.commits.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        Ok(())
    }
}

pub fn memory_cache() -> Arc<Cache> {
    Arc::new(Cache::memory(&CacheConfig::default()))
}

pub fn service_with_cache(repo: Arc<InMemoryContacts>, cache: Arc<Cache>) -> ContactService {
    let config = CacheConfig::default();
    let ledger = IdempotencyLedger::new(cache.clone(), config.idempotency_ttl());
    let reader: Arc<dyn ContactsRepo> = repo.clone();
    let writer: Arc<dyn ContactsWriteRepo> = repo;
    ContactService::new(reader, writer, cache, ledger, config.list_ttl())
}

pub fn service(repo: Arc<InMemoryContacts>) -> ContactService {
    service_with_cache(repo, memory_cache())
}

/// Row with a fixed creation time `minutes` after a common epoch.
pub fn row(name: &str, email: &str, phone: &str, minutes: i64) -> ContactRecord {
    let created_at = OffsetDateTime::UNIX_EPOCH
        + time::Duration::seconds(1_700_000_000)
        + time::Duration::minutes(minutes);
    ContactRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: email.to_string(),
        phone: phone.to_string(),
        created_at,
        updated_at: created_at,
    }
}

pub fn new_contact(name: &str, email: &str, phone: &str) -> NewContact {
    NewContact::parse(name, email, phone).expect("valid contact input")
}
