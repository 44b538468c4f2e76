use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::pagination::{
    DEFAULT_PAGE_SIZE, PaginationError, PaginationMode, SortField, SortOrder,
};
use crate::application::repos::RepoError;
use crate::domain::entities::ContactRecord;

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("email already exists")]
    EmailExists,
    #[error("contact not found")]
    NotFound,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Listing request after boundary validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListContactsQuery {
    pub q: Option<String>,
    pub page: u32,
    pub page_size: u32,
    pub sort: SortField,
    pub order: SortOrder,
    pub pagination: PaginationMode,
    pub cursor: Option<String>,
}

impl Default for ListContactsQuery {
    fn default() -> Self {
        Self {
            q: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: SortField::default(),
            order: SortOrder::default(),
            pagination: PaginationMode::default(),
            cursor: None,
        }
    }
}

impl ListContactsQuery {
    /// Drop empty optional strings so `?q=` and no `q` share one cache entry.
    pub fn normalized(mut self) -> Self {
        self.q = self.q.filter(|q| !q.is_empty());
        self.cursor = self.cursor.filter(|c| !c.is_empty());
        self
    }

    pub(super) fn canonical(&self) -> CanonicalListParams<'_> {
        CanonicalListParams {
            q: self.q.as_deref(),
            page: self.page,
            page_size: self.page_size,
            sort: self.sort,
            order: self.order,
            cursor: self.cursor.as_deref(),
            pagination: self.pagination,
        }
    }
}

/// Serialized into the list cache key. Every field is always present, with
/// defaults already applied.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CanonicalListParams<'a> {
    q: Option<&'a str>,
    page: u32,
    page_size: u32,
    sort: SortField,
    order: SortOrder,
    cursor: Option<&'a str>,
    pagination: PaginationMode,
}

/// Response body of a listing. The `pagination` tag tells clients which
/// strategy actually ran, which can differ from the one requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pagination", rename_all = "lowercase")]
pub enum ContactListEnvelope {
    #[serde(rename_all = "camelCase")]
    Offset {
        data: Vec<ContactRecord>,
        page: u32,
        page_size: u32,
        total: u64,
        total_pages: u64,
    },
    #[serde(rename_all = "camelCase")]
    Keyset {
        data: Vec<ContactRecord>,
        cursor: Option<String>,
        has_more: bool,
    },
}

impl ContactListEnvelope {
    pub fn data(&self) -> &[ContactRecord] {
        match self {
            Self::Offset { data, .. } | Self::Keyset { data, .. } => data,
        }
    }

    pub fn mode(&self) -> PaginationMode {
        match self {
            Self::Offset { .. } => PaginationMode::Offset,
            Self::Keyset { .. } => PaginationMode::Keyset,
        }
    }
}

/// Result of a create or update. `replayed` marks a response served from the
/// idempotency ledger instead of a fresh execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMutation {
    pub contact: ContactRecord,
    pub replayed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;
    use uuid::Uuid;

    #[test]
    fn normalization_drops_empty_strings() {
        let query = ListContactsQuery {
            q: Some(String::new()),
            cursor: Some(String::new()),
            ..Default::default()
        }
        .normalized();
        assert_eq!(query, ListContactsQuery::default());
    }

    #[test]
    fn canonical_params_serialize_every_field() {
        let value = serde_json::to_value(ListContactsQuery::default().canonical()).expect("json");
        assert_eq!(
            value,
            json!({
                "q": null,
                "page": 1,
                "pageSize": 10,
                "sort": "createdAt",
                "order": "asc",
                "cursor": null,
                "pagination": "offset",
            })
        );
    }

    #[test]
    fn envelopes_carry_their_mode_tag() {
        let at = datetime!(2024-01-02 03:04:05 UTC);
        let record = ContactRecord {
            id: Uuid::nil(),
            name: "Ann".into(),
            email: "ann@x.com".into(),
            phone: "+55 11 98888-8888".into(),
            created_at: at,
            updated_at: at,
        };

        let keyset = ContactListEnvelope::Keyset {
            data: vec![record.clone()],
            cursor: None,
            has_more: false,
        };
        let value = serde_json::to_value(&keyset).expect("json");
        assert_eq!(value["pagination"], "keyset");
        assert_eq!(value["hasMore"], false);
        assert!(value["cursor"].is_null());
        assert_eq!(value["data"][0]["createdAt"], "2024-01-02T03:04:05Z");

        let offset = ContactListEnvelope::Offset {
            data: vec![record],
            page: 1,
            page_size: 10,
            total: 1,
            total_pages: 1,
        };
        let value = serde_json::to_value(&offset).expect("json");
        assert_eq!(value["pagination"], "offset");
        assert_eq!(value["totalPages"], 1);

        let back: ContactListEnvelope = serde_json::from_value(value).expect("decode");
        assert_eq!(back, offset);
    }
}
