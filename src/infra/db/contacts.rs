use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::pagination::SortValue,
    application::repos::{
        ContactOrdering, ContactSearch, ContactsRepo, ContactsUnitOfWork, ContactsWriteRepo,
        IsolationLevel, KeysetQuery, OffsetQuery, RepoError,
    },
    domain::contacts::{ContactPatch, NewContact},
    domain::entities::ContactRecord,
};

use super::PostgresRepositories;
use super::util::{contains_pattern, map_sqlx_error};

const CONTACT_COLUMNS: &str = "id, name, email, phone, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: Uuid,
    name: String,
    email: String,
    phone: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ContactRow> for ContactRecord {
    fn from(row: ContactRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PostgresRepositories {
    fn select_contacts<'q>() -> QueryBuilder<'q, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        qb.push(CONTACT_COLUMNS);
        qb.push(" FROM contacts WHERE 1=1 ");
        qb
    }

    fn apply_search<'q>(qb: &mut QueryBuilder<'q, Postgres>, search: Option<&ContactSearch>) {
        match search {
            None => {}
            Some(ContactSearch::Text(text)) => {
                let pattern = contains_pattern(text);
                qb.push(" AND (name ILIKE ");
                qb.push_bind(pattern.clone());
                qb.push(" OR email ILIKE ");
                qb.push_bind(pattern.clone());
                qb.push(" OR phone LIKE ");
                qb.push_bind(pattern);
                qb.push(") ");
            }
            Some(ContactSearch::Phone { text, digits }) => {
                Self::apply_phone_search(qb, text, digits);
            }
        }
    }

    /// Digits-only comparison of the phone column. This is the single place a
    /// raw SQL function touches user-facing search.
    fn apply_phone_search<'q>(qb: &mut QueryBuilder<'q, Postgres>, text: &str, digits: &str) {
        let pattern = contains_pattern(text);
        qb.push(" AND (name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR email ILIKE ");
        qb.push_bind(pattern);
        qb.push(" OR regexp_replace(phone, '[^0-9]', '', 'g') LIKE ");
        qb.push_bind(contains_pattern(digits));
        qb.push(") ");
    }

    fn push_order<'q>(qb: &mut QueryBuilder<'q, Postgres>, ordering: ContactOrdering) {
        let direction = ordering.order.as_sql();
        qb.push(" ORDER BY ");
        qb.push(ordering.field.column());
        qb.push(" ");
        qb.push(direction);
        qb.push(", id ");
        qb.push(direction);
    }

    fn push_sort_value<'q>(qb: &mut QueryBuilder<'q, Postgres>, value: &SortValue) {
        match value {
            SortValue::Text(text) => qb.push_bind(text.clone()),
            SortValue::Timestamp(at) => qb.push_bind(*at),
        };
    }
}

#[async_trait]
impl ContactsRepo for PostgresRepositories {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ContactRecord>, RepoError> {
        let mut qb = Self::select_contacts();
        qb.push(" AND id = ");
        qb.push_bind(id);

        let row = qb
            .build_query_as::<ContactRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(ContactRecord::from))
    }

    async fn list_page(&self, query: &OffsetQuery) -> Result<Vec<ContactRecord>, RepoError> {
        let mut qb = Self::select_contacts();
        Self::apply_search(&mut qb, query.search.as_ref());
        Self::push_order(&mut qb, query.ordering);
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(query.limit));
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));

        let rows = qb
            .build_query_as::<ContactRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ContactRecord::from).collect())
    }

    async fn count(&self, search: Option<&ContactSearch>) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM contacts WHERE 1=1 ");
        Self::apply_search(&mut qb, search);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        u64::try_from(count).map_err(|_| RepoError::Integrity {
            message: format!("negative contact count {count}"),
        })
    }

    async fn list_after(&self, query: &KeysetQuery) -> Result<Vec<ContactRecord>, RepoError> {
        let mut qb = Self::select_contacts();
        Self::apply_search(&mut qb, query.search.as_ref());

        if let Some(cursor) = query.after.as_ref() {
            let column = query.ordering.field.column();
            let op = query.ordering.order.after_operator();

            qb.push(" AND (");
            qb.push(column);
            qb.push(" ");
            qb.push(op);
            qb.push(" ");
            Self::push_sort_value(&mut qb, cursor.value());
            qb.push(" OR (");
            qb.push(column);
            qb.push(" = ");
            Self::push_sort_value(&mut qb, cursor.value());
            qb.push(" AND id ");
            qb.push(op);
            qb.push(" ");
            qb.push_bind(cursor.id());
            qb.push(")) ");
        }

        Self::push_order(&mut qb, query.ordering);
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(query.limit));

        let rows = qb
            .build_query_as::<ContactRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ContactRecord::from).collect())
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        PostgresRepositories::health_check(self)
            .await
            .map_err(map_sqlx_error)
    }
}

/// An open Postgres transaction. Dropped without commit, it rolls back.
pub struct PgContactsUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ContactsWriteRepo for PostgresRepositories {
    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn ContactsUnitOfWork>, RepoError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let statement = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Box::new(PgContactsUnitOfWork { tx }))
    }
}

#[async_trait]
impl ContactsUnitOfWork for PgContactsUnitOfWork {
    async fn find_by_id(&mut self, id: Uuid) -> Result<Option<ContactRecord>, RepoError> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT id, name, email, phone, created_at, updated_at FROM contacts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ContactRecord::from))
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Option<ContactRecord>, RepoError> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT id, name, email, phone, created_at, updated_at FROM contacts WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ContactRecord::from))
    }

    async fn insert(&mut self, contact: &NewContact) -> Result<ContactRecord, RepoError> {
        let row = sqlx::query_as::<_, ContactRow>(
            r#"
            INSERT INTO contacts (id, name, email, phone)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, email, phone, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn update(&mut self, id: Uuid, patch: &ContactPatch) -> Result<ContactRecord, RepoError> {
        let row = sqlx::query_as::<_, ContactRow>(
            r#"
            UPDATE contacts
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                updated_at = now()
            WHERE id = $1
            RETURNING id, name, email, phone, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.email.as_deref())
        .bind(patch.phone.as_deref())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        row.map(ContactRecord::from).ok_or(RepoError::NotFound)
    }

    async fn delete(&mut self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepoError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}
