//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::application::pagination::{ContactCursor, SortField, SortOrder};
use crate::domain::contacts::{ContactPatch, NewContact, PHONE_SEARCH_MIN_DIGITS, phone_digits};
use crate::domain::entities::ContactRecord;

/// Unique constraint guarding `contacts.email`.
pub const EMAIL_UNIQUE_CONSTRAINT: &str = "contacts_email_key";

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// How a free-text `q` is matched against contacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactSearch {
    /// Case-insensitive name/email substring, case-sensitive raw phone substring.
    Text(String),
    /// Like `Text`, but the phone column is compared digits-to-digits.
    Phone { text: String, digits: String },
}

impl ContactSearch {
    /// Classify a search term. Blank terms mean no search at all.
    pub fn from_query(q: &str) -> Option<Self> {
        if q.is_empty() {
            return None;
        }

        let digits = phone_digits(q);
        if digits.len() >= PHONE_SEARCH_MIN_DIGITS {
            Some(Self::Phone {
                text: q.to_string(),
                digits,
            })
        } else {
            Some(Self::Text(q.to_string()))
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::Phone { text, .. } => text,
        }
    }

    pub fn is_phone(&self) -> bool {
        matches!(self, Self::Phone { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactOrdering {
    pub field: SortField,
    pub order: SortOrder,
}

#[derive(Debug, Clone)]
pub struct OffsetQuery {
    pub search: Option<ContactSearch>,
    pub ordering: ContactOrdering,
    pub limit: u32,
    pub offset: u64,
}

/// Rows strictly after `after` in `ordering`, at most `limit` of them.
#[derive(Debug, Clone)]
pub struct KeysetQuery {
    pub search: Option<ContactSearch>,
    pub ordering: ContactOrdering,
    pub limit: u32,
    pub after: Option<ContactCursor>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
        }
    }
}

#[async_trait]
pub trait ContactsRepo: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ContactRecord>, RepoError>;

    async fn list_page(&self, query: &OffsetQuery) -> Result<Vec<ContactRecord>, RepoError>;

    async fn count(&self, search: Option<&ContactSearch>) -> Result<u64, RepoError>;

    async fn list_after(&self, query: &KeysetQuery) -> Result<Vec<ContactRecord>, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ContactsWriteRepo: Send + Sync {
    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn ContactsUnitOfWork>, RepoError>;
}

/// A single open transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait ContactsUnitOfWork: Send {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<ContactRecord>, RepoError>;

    async fn find_by_email(&mut self, email: &str) -> Result<Option<ContactRecord>, RepoError>;

    async fn insert(&mut self, contact: &NewContact) -> Result<ContactRecord, RepoError>;

    async fn update(&mut self, id: Uuid, patch: &ContactPatch) -> Result<ContactRecord, RepoError>;

    async fn delete(&mut self, id: Uuid) -> Result<(), RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepoError>;
}
