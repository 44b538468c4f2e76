//! Sorting and keyset cursor helpers for contact listings.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::domain::entities::ContactRecord;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Column a listing is ordered by. `id` is always appended as the tie-breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Name,
    Email,
    #[default]
    CreatedAt,
}

impl SortField {
    pub fn column(self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Email => "email",
            SortField::CreatedAt => "created_at",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Email => "email",
            SortField::CreatedAt => "createdAt",
        }
    }

    /// The value of this field on a record, as carried by a cursor.
    pub fn value_of(self, record: &ContactRecord) -> SortValue {
        match self {
            SortField::Name => SortValue::Text(record.name.clone()),
            SortField::Email => SortValue::Text(record.email.clone()),
            SortField::CreatedAt => SortValue::Timestamp(record.created_at),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    /// Comparison operator selecting rows strictly after a boundary in this order.
    pub fn after_operator(self) -> &'static str {
        match self {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    #[default]
    Offset,
    Keyset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortValue {
    Text(String),
    Timestamp(OffsetDateTime),
}

#[derive(Debug, Serialize, Deserialize)]
struct ContactCursorPayload {
    value: String,
    id: Uuid,
}

/// Position of the last row of a keyset page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactCursor {
    value: SortValue,
    id: Uuid,
}

impl ContactCursor {
    pub fn new(value: SortValue, id: Uuid) -> Self {
        Self { value, id }
    }

    pub fn for_record(field: SortField, record: &ContactRecord) -> Self {
        Self::new(field.value_of(record), record.id)
    }

    pub fn value(&self) -> &SortValue {
        &self.value
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn encode(&self) -> Result<String, PaginationError> {
        let value = match &self.value {
            SortValue::Text(text) => text.clone(),
            SortValue::Timestamp(at) => at
                .format(&Rfc3339)
                .map_err(|err| PaginationError::MalformedCursor(err.to_string()))?,
        };
        let payload = ContactCursorPayload { value, id: self.id };
        let serialized = serde_json::to_vec(&payload)
            .map_err(|err| PaginationError::MalformedCursor(err.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(serialized))
    }

    /// Decode a token produced by [`ContactCursor::encode`]. The caller names the
    /// sort field; the token itself does not record it.
    pub fn decode(cursor: &str, field: SortField) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::MalformedCursor(err.to_string()))?;
        let payload: ContactCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::MalformedCursor(err.to_string()))?;

        let value = match field {
            SortField::Name | SortField::Email => SortValue::Text(payload.value),
            SortField::CreatedAt => OffsetDateTime::parse(&payload.value, &Rfc3339)
                .map(SortValue::Timestamp)
                .map_err(|err| PaginationError::MalformedCursor(err.to_string()))?,
        };

        Ok(Self {
            value,
            id: payload.id,
        })
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("malformed cursor: {0}")]
    MalformedCursor(String),
}

/// `ceil(total / page_size)`, zero when there is nothing to show.
pub fn total_pages(total: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn text_cursor_round_trip() {
        let id = Uuid::new_v4();
        let cursor = ContactCursor::new(SortValue::Text("Ann".into()), id);
        let encoded = cursor.encode().expect("encoded");
        let decoded = ContactCursor::decode(&encoded, SortField::Name).expect("decoded");

        assert_eq!(decoded, cursor);
    }

    #[test]
    fn timestamp_cursor_round_trip() {
        let id = Uuid::new_v4();
        let at = datetime!(2024-03-01 12:30:45.123456 UTC);
        let cursor = ContactCursor::new(SortValue::Timestamp(at), id);
        let encoded = cursor.encode().expect("encoded");
        let decoded = ContactCursor::decode(&encoded, SortField::CreatedAt).expect("decoded");

        assert_eq!(decoded.value(), &SortValue::Timestamp(at));
        assert_eq!(decoded.id(), id);
    }

    #[test]
    fn token_is_url_safe_without_padding() {
        let cursor = ContactCursor::new(SortValue::Text("??>>".into()), Uuid::nil());
        let encoded = cursor.encode().expect("encoded");
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let not_json = URL_SAFE_NO_PAD.encode(b"nope");
        let missing_id = URL_SAFE_NO_PAD.encode(br#"{"value":"Ann"}"#);
        let bad_time =
            URL_SAFE_NO_PAD.encode(br#"{"value":"yesterday","id":"00000000-0000-0000-0000-000000000000"}"#);

        for token in ["not base64!", not_json.as_str(), missing_id.as_str()] {
            let err = ContactCursor::decode(token, SortField::Name).expect_err("rejected");
            assert!(matches!(err, PaginationError::MalformedCursor(_)));
        }

        assert!(ContactCursor::decode(&bad_time, SortField::CreatedAt).is_err());
        assert!(ContactCursor::decode(&bad_time, SortField::Email).is_ok());
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }
}
