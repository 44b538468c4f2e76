//! Sample data for local development.

use tracing::info;

use crate::domain::contacts::NewContact;

use super::types::ContactError;
use super::ContactService;

const FIRST_NAMES: &[&str] = &[
    "Ann", "Bea", "Caio", "Dara", "Enzo", "Fernanda", "Gus", "Helena", "Igor", "Julia",
    "Kenji", "Lara", "Miguel", "Nina", "Otto", "Paula",
];

const LAST_NAMES: &[&str] = &[
    "Silva", "Souza", "Costa", "Oliveira", "Pereira", "Lima", "Carvalho", "Ribeiro",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Deterministic sample contacts. Emails are unique within one call and
/// stable across calls, so reseeding skips what is already there.
pub fn sample_contacts(count: usize) -> Vec<NewContact> {
    (0..count)
        .map(|index| {
            let first = FIRST_NAMES[index % FIRST_NAMES.len()];
            let last = LAST_NAMES[(index / FIRST_NAMES.len()) % LAST_NAMES.len()];
            NewContact {
                name: format!("{first} {last}"),
                email: format!(
                    "{}.{}.{index}@example.com",
                    first.to_lowercase(),
                    last.to_lowercase()
                ),
                phone: format!("+55 11 9{:04}-{:04}", 8000 + index % 2000, (index * 37) % 10_000),
            }
        })
        .collect()
}

impl ContactService {
    /// Insert contacts whose email is not taken yet.
    pub async fn seed(&self, contacts: Vec<NewContact>) -> Result<SeedReport, ContactError> {
        let mut report = SeedReport::default();

        for contact in contacts {
            match self.create(contact, None).await {
                Ok(_) => report.inserted += 1,
                Err(ContactError::EmailExists) => report.skipped += 1,
                Err(err) => return Err(err),
            }
        }

        info!(
            inserted = report.inserted,
            skipped = report.skipped,
            "Seeded contacts"
        );
        Ok(report)
    }
}
