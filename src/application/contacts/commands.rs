use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::idempotency::{CREATE_CONTACT_OPERATION, update_contact_operation};
use crate::application::repos::{
    ContactsUnitOfWork, EMAIL_UNIQUE_CONSTRAINT, IsolationLevel, RepoError,
};
use crate::cache::{LIST_PREFIX, contact_key};
use crate::domain::contacts::{ContactPatch, NewContact};
use crate::domain::entities::ContactRecord;

use super::types::{ContactError, ContactMutation};
use super::{ContactService, observe};

/// Only the email constraint is a client conflict. Any other unique violation
/// stays a repository failure.
fn translate_write_error(err: RepoError) -> ContactError {
    match err {
        RepoError::Duplicate { constraint } if constraint == EMAIL_UNIQUE_CONSTRAINT => {
            ContactError::EmailExists
        }
        RepoError::NotFound => ContactError::NotFound,
        other => ContactError::Repo(other),
    }
}

async fn rollback_quietly(uow: Box<dyn ContactsUnitOfWork>) {
    if let Err(err) = uow.rollback().await {
        warn!(error = %err, "Rollback failed; the transaction is discarded on drop");
    }
}

async fn insert_unique(
    uow: &mut dyn ContactsUnitOfWork,
    input: &NewContact,
) -> Result<ContactRecord, ContactError> {
    if uow.find_by_email(&input.email).await?.is_some() {
        return Err(ContactError::EmailExists);
    }
    uow.insert(input).await.map_err(translate_write_error)
}

async fn apply_patch(
    uow: &mut dyn ContactsUnitOfWork,
    id: Uuid,
    patch: &ContactPatch,
) -> Result<ContactRecord, ContactError> {
    let existing = uow.find_by_id(id).await?.ok_or(ContactError::NotFound)?;

    if let Some(email) = patch.email.as_deref()
        && email != existing.email
        && uow.find_by_email(email).await?.is_some()
    {
        return Err(ContactError::EmailExists);
    }

    uow.update(id, patch).await.map_err(translate_write_error)
}

async fn remove_existing(uow: &mut dyn ContactsUnitOfWork, id: Uuid) -> Result<(), ContactError> {
    if uow.find_by_id(id).await?.is_none() {
        return Err(ContactError::NotFound);
    }
    uow.delete(id).await.map_err(translate_write_error)
}

impl ContactService {
    async fn begin(&self) -> Result<Box<dyn ContactsUnitOfWork>, ContactError> {
        observe("begin", self.writer.begin(IsolationLevel::ReadCommitted))
            .await
            .map_err(ContactError::from)
    }

    async fn commit(&self, uow: Box<dyn ContactsUnitOfWork>) -> Result<(), ContactError> {
        observe("commit", uow.commit())
            .await
            .map_err(translate_write_error)
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create(
        &self,
        input: NewContact,
        idempotency_key: Option<&str>,
    ) -> Result<ContactMutation, ContactError> {
        if let Some(contact) = self
            .ledger
            .check::<ContactRecord>(CREATE_CONTACT_OPERATION, idempotency_key)
            .await
        {
            return Ok(ContactMutation {
                contact,
                replayed: true,
            });
        }

        let mut uow = self.begin().await?;
        let outcome = observe_outcome("create", insert_unique(uow.as_mut(), &input)).await;
        let created = match outcome {
            Ok(created) => created,
            Err(err) => {
                rollback_quietly(uow).await;
                return Err(err);
            }
        };
        self.commit(uow).await?;

        self.cache.delete_by_prefix(LIST_PREFIX).await;
        self.ledger
            .store(CREATE_CONTACT_OPERATION, idempotency_key, &created)
            .await;

        info!(contact_id = %created.id, "Contact created");
        Ok(ContactMutation {
            contact: created,
            replayed: false,
        })
    }

    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        id: Uuid,
        patch: ContactPatch,
        idempotency_key: Option<&str>,
    ) -> Result<ContactMutation, ContactError> {
        let operation = update_contact_operation(id);
        if let Some(contact) = self
            .ledger
            .check::<ContactRecord>(&operation, idempotency_key)
            .await
        {
            return Ok(ContactMutation {
                contact,
                replayed: true,
            });
        }

        let mut uow = self.begin().await?;
        let outcome = observe_outcome("update", apply_patch(uow.as_mut(), id, &patch)).await;
        let updated = match outcome {
            Ok(updated) => updated,
            Err(err) => {
                rollback_quietly(uow).await;
                return Err(err);
            }
        };
        self.commit(uow).await?;

        self.invalidate_contact(id).await;
        self.ledger
            .store(&operation, idempotency_key, &updated)
            .await;

        info!(contact_id = %id, "Contact updated");
        Ok(ContactMutation {
            contact: updated,
            replayed: false,
        })
    }

    /// Deletes are not idempotency-tracked; repeating one yields `NotFound`.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ContactError> {
        let mut uow = self.begin().await?;
        let outcome = observe_outcome("delete", remove_existing(uow.as_mut(), id)).await;
        if let Err(err) = outcome {
            rollback_quietly(uow).await;
            return Err(err);
        }
        self.commit(uow).await?;

        self.invalidate_contact(id).await;

        info!(contact_id = %id, "Contact deleted");
        Ok(())
    }

    async fn invalidate_contact(&self, id: Uuid) {
        self.cache.delete_by_prefix(LIST_PREFIX).await;
        self.cache.delete_by_prefix(&contact_key(id)).await;
    }
}

/// Like [`observe`], but only storage faults count as errors. Conflicts and
/// missing rows are ordinary outcomes.
async fn observe_outcome<T, F>(operation: &'static str, call: F) -> Result<T, ContactError>
where
    F: std::future::Future<Output = Result<T, ContactError>>,
{
    let result = observe(operation, async {
        match call.await {
            Err(ContactError::Repo(err)) => Err(err),
            other => Ok(other),
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(err) => Err(ContactError::Repo(err)),
    }
}
