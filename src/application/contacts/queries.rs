use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::application::pagination::{
    ContactCursor, PaginationError, PaginationMode, total_pages,
};
use crate::application::repos::{ContactOrdering, ContactSearch, KeysetQuery, OffsetQuery};
use crate::cache::{contact_key, list_key};
use crate::domain::entities::ContactRecord;

use super::types::{ContactError, ContactListEnvelope, ListContactsQuery};
use super::{ContactService, observe};

/// Pagination strategy chosen once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListPlan {
    Offset { page: u32, page_size: u32 },
    Keyset {
        page_size: u32,
        after: Option<ContactCursor>,
    },
}

impl ListPlan {
    /// Phone searches always paginate by offset, even when keyset was asked
    /// for. The cursor is then ignored rather than decoded.
    pub fn resolve(
        query: &ListContactsQuery,
        search: Option<&ContactSearch>,
    ) -> Result<Self, PaginationError> {
        let phone_search = search.is_some_and(ContactSearch::is_phone);

        match query.pagination {
            PaginationMode::Keyset if !phone_search => {
                let after = query
                    .cursor
                    .as_deref()
                    .map(|token| ContactCursor::decode(token, query.sort))
                    .transpose()?;
                Ok(Self::Keyset {
                    page_size: query.page_size,
                    after,
                })
            }
            _ => Ok(Self::Offset {
                page: query.page,
                page_size: query.page_size,
            }),
        }
    }
}

impl ContactService {
    #[instrument(skip_all, fields(q = query.q.as_deref(), mode = ?query.pagination))]
    pub async fn list(&self, query: ListContactsQuery) -> Result<ContactListEnvelope, ContactError> {
        let query = query.normalized();

        let cache_key = match list_key(&query.canonical()) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(error = %err, "Could not build list cache key, bypassing cache");
                None
            }
        };

        if let Some(key) = cache_key.as_deref()
            && let Some(cached) = self.cache.get_json::<ContactListEnvelope>(key).await
        {
            debug!(cache_key = key, "Cache hit");
            return Ok(cached);
        }

        let search = query.q.as_deref().and_then(ContactSearch::from_query);
        let plan = ListPlan::resolve(&query, search.as_ref())?;

        if query.pagination == PaginationMode::Keyset && matches!(plan, ListPlan::Offset { .. }) {
            debug!("Phone search requested keyset pagination, serving offset page instead");
        }

        let ordering = ContactOrdering {
            field: query.sort,
            order: query.order,
        };

        let envelope = match plan {
            ListPlan::Offset { page, page_size } => {
                self.list_offset(search, ordering, page, page_size).await?
            }
            ListPlan::Keyset { page_size, after } => {
                self.list_keyset(search, ordering, page_size, after).await?
            }
        };

        // A write committing between the read above and this store leaves a
        // stale envelope until the TTL runs out.
        if let Some(key) = cache_key.as_deref() {
            self.cache.set_json(key, &envelope, self.cache_ttl).await;
        }

        Ok(envelope)
    }

    async fn list_offset(
        &self,
        search: Option<ContactSearch>,
        ordering: ContactOrdering,
        page: u32,
        page_size: u32,
    ) -> Result<ContactListEnvelope, ContactError> {
        let query = OffsetQuery {
            search,
            ordering,
            limit: page_size,
            offset: u64::from(page.saturating_sub(1)) * u64::from(page_size),
        };

        let (data, total) = tokio::try_join!(
            observe("list", self.reader.list_page(&query)),
            observe("count", self.reader.count(query.search.as_ref())),
        )?;

        Ok(ContactListEnvelope::Offset {
            data,
            page,
            page_size,
            total,
            total_pages: total_pages(total, page_size),
        })
    }

    async fn list_keyset(
        &self,
        search: Option<ContactSearch>,
        ordering: ContactOrdering,
        page_size: u32,
        after: Option<ContactCursor>,
    ) -> Result<ContactListEnvelope, ContactError> {
        // One extra row tells us whether another page exists.
        let query = KeysetQuery {
            search,
            ordering,
            limit: page_size.saturating_add(1),
            after,
        };

        let mut data = observe("list_keyset", self.reader.list_after(&query)).await?;
        let page_len = page_size as usize;
        let has_more = data.len() > page_len;

        let cursor = if has_more {
            data.truncate(page_len);
            data.last()
                .map(|last| ContactCursor::for_record(ordering.field, last).encode())
                .transpose()?
        } else {
            None
        };

        Ok(ContactListEnvelope::Keyset {
            data,
            cursor,
            has_more,
        })
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<ContactRecord, ContactError> {
        let key = contact_key(id);
        if let Some(cached) = self.cache.get_json::<ContactRecord>(&key).await {
            debug!(cache_key = %key, "Cache hit");
            return Ok(cached);
        }

        let contact = observe("find", self.reader.find_by_id(id))
            .await?
            .ok_or(ContactError::NotFound)?;

        self.cache.set_json(&key, &contact, self.cache_ttl).await;
        Ok(contact)
    }
}
