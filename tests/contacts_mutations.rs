mod support;

use std::sync::Arc;

use rolodex::application::contacts::{ContactError, ContactListEnvelope, ListContactsQuery};
use rolodex::application::pagination::{SortField, SortOrder};
use rolodex::application::repos::RepoError;
use rolodex::domain::contacts::ContactPatch;
use uuid::Uuid;

use support::{InMemoryContacts, memory_cache, new_contact, row, service, service_with_cache};

#[tokio::test]
async fn created_contact_reads_back() {
    let service = service(InMemoryContacts::new());

    let created = service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect("create");
    assert!(!created.replayed);

    let fetched = service.get(created.contact.id).await.expect("get");
    assert_eq!(fetched, created.contact);
    assert_eq!(fetched.created_at, fetched.updated_at);
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let repo = InMemoryContacts::new();
    let service = service(repo.clone());

    service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect("first create");
    let err = service
        .create(new_contact("Other Ann", "ann@x.com", "+55 11 97777-7777"), None)
        .await
        .expect_err("duplicate");

    assert!(matches!(err, ContactError::EmailExists));
    assert_eq!(repo.len(), 1);
}

#[tokio::test]
async fn other_unique_violations_are_storage_faults() {
    let repo = InMemoryContacts::new();
    let service = service(repo.clone());
    repo.violate_on_next_insert("contacts_pkey");

    let err = service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect_err("primary key clash");

    assert!(matches!(
        err,
        ContactError::Repo(RepoError::Duplicate { ref constraint }) if constraint == "contacts_pkey"
    ));
    assert_eq!(repo.len(), 0);
    assert_eq!(repo.commits(), 0);
}

#[tokio::test]
async fn email_comparison_is_case_sensitive() {
    let repo = InMemoryContacts::new();
    let service = service(repo.clone());

    service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect("first create");
    service
        .create(new_contact("Ann", "Ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect("different case is a different email");

    assert_eq!(repo.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_duplicate_creates_yield_one_winner() {
    let repo = InMemoryContacts::new();
    let service = service(repo.clone());

    let attempts: Vec<_> = (0..2)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .create(
                        new_contact(&format!("Racer {i}"), "race@x.com", "+55 11 98888-8888"),
                        None,
                    )
                    .await
            })
        })
        .collect();

    let mut created = 0;
    let mut conflicts = 0;
    for attempt in attempts {
        match attempt.await.expect("task joined") {
            Ok(_) => created += 1,
            Err(ContactError::EmailExists) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((created, conflicts), (1, 1));
    assert_eq!(repo.len(), 1);
}

#[tokio::test]
async fn update_keeps_own_email_and_rejects_taken_one() {
    let repo = InMemoryContacts::new();
    let service = service(repo.clone());

    let ann = service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect("create")
        .contact;
    service
        .create(new_contact("Bob", "bob@x.com", "+55 21 97777-1234"), None)
        .await
        .expect("create");

    let same_email = ContactPatch::parse(Some("Ann B."), Some("ann@x.com"), None).expect("patch");
    let updated = service
        .update(ann.id, same_email, None)
        .await
        .expect("unchanged email is fine");
    assert_eq!(updated.contact.name, "Ann B.");
    assert_eq!(updated.contact.phone, ann.phone);
    assert_eq!(updated.contact.created_at, ann.created_at);

    let taken = ContactPatch::parse(None, Some("bob@x.com"), None).expect("patch");
    let err = service
        .update(ann.id, taken, None)
        .await
        .expect_err("email belongs to Bob");
    assert!(matches!(err, ContactError::EmailExists));

    let stored = service.get(ann.id).await.expect("get");
    assert_eq!(stored.email, "ann@x.com");
}

#[tokio::test]
async fn update_of_missing_contact_is_not_found() {
    let service = service(InMemoryContacts::new());
    let patch = ContactPatch::parse(Some("Ghost"), None, None).expect("patch");

    let err = service
        .update(Uuid::new_v4(), patch, None)
        .await
        .expect_err("missing");
    assert!(matches!(err, ContactError::NotFound));
}

#[tokio::test]
async fn deleting_missing_contact_leaves_storage_untouched() {
    let existing = row("Ann", "ann@x.com", "+55 11 98888-8888", 0);
    let repo = InMemoryContacts::with_rows([existing]);
    let service = service(repo.clone());
    let before = repo.snapshot();

    let err = service
        .delete(Uuid::new_v4())
        .await
        .expect_err("missing");

    assert!(matches!(err, ContactError::NotFound));
    assert_eq!(repo.snapshot(), before);
    assert_eq!(repo.commits(), 0);
}

#[tokio::test]
async fn second_delete_is_not_found() {
    let service = service(InMemoryContacts::new());
    let ann = service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect("create")
        .contact;

    service.delete(ann.id).await.expect("delete");
    let err = service.delete(ann.id).await.expect_err("already gone");
    assert!(matches!(err, ContactError::NotFound));
}

#[tokio::test]
async fn idempotent_create_replays_without_inserting() {
    let repo = InMemoryContacts::new();
    let service = service(repo.clone());
    let input = new_contact("Ann", "ann@x.com", "+55 11 98888-8888");

    let first = service
        .create(input.clone(), Some("key-1"))
        .await
        .expect("first create");
    let second = service
        .create(input, Some("key-1"))
        .await
        .expect("replayed create");

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.contact, second.contact);
    assert_eq!(repo.len(), 1);
    assert_eq!(repo.commits(), 1);
}

#[tokio::test]
async fn idempotency_keys_are_scoped_per_operation() {
    let repo = InMemoryContacts::new();
    let service = service(repo.clone());

    let ann = service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), Some("shared"))
        .await
        .expect("create")
        .contact;

    // Same key on an update is a different ledger entry.
    let patch = ContactPatch::parse(Some("Anna"), None, None).expect("patch");
    let updated = service
        .update(ann.id, patch.clone(), Some("shared"))
        .await
        .expect("update");
    assert!(!updated.replayed);
    assert_eq!(updated.contact.name, "Anna");

    let replay = service
        .update(ann.id, patch, Some("shared"))
        .await
        .expect("replayed update");
    assert!(replay.replayed);
    assert_eq!(replay.contact, updated.contact);
    assert_eq!(repo.commits(), 2);
}

#[tokio::test]
async fn failed_create_records_nothing_in_the_ledger() {
    let repo = InMemoryContacts::new();
    let service = service(repo.clone());

    service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect("create");
    let dup = new_contact("Ann", "ann@x.com", "+55 11 98888-8888");
    assert!(matches!(
        service.create(dup.clone(), Some("retry")).await,
        Err(ContactError::EmailExists)
    ));
    assert!(matches!(
        service.create(dup, Some("retry")).await,
        Err(ContactError::EmailExists)
    ));
}

#[tokio::test]
async fn ledger_outlives_the_service_instance() {
    let repo = InMemoryContacts::new();
    let cache = memory_cache();
    let input = new_contact("Ann", "ann@x.com", "+55 11 98888-8888");

    let first = service_with_cache(repo.clone(), Arc::clone(&cache))
        .create(input.clone(), Some("k"))
        .await
        .expect("create");
    let second = service_with_cache(repo.clone(), cache)
        .create(input, Some("k"))
        .await
        .expect("replay");

    assert!(second.replayed);
    assert_eq!(first.contact.id, second.contact.id);
    assert_eq!(repo.len(), 1);
}

#[tokio::test]
async fn ann_scenario() {
    let seeded = [
        row("Bruno", "bruno@x.com", "+55 11 91111-1111", 0),
        row("Alice", "alice@x.com", "+55 11 92222-2222", 1),
        row("Aaron", "aaron@x.com", "+55 11 93333-3333", 2),
    ];
    let service = service(InMemoryContacts::with_rows(seeded));

    let ann = service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect("create Ann");
    assert!(!ann.contact.id.is_nil());

    let err = service
        .create(new_contact("Ann", "ann@x.com", "+55 11 98888-8888"), None)
        .await
        .expect_err("duplicate Ann");
    assert!(matches!(err, ContactError::EmailExists));

    // Bruno outranks Ann in descending name order.
    let top = service
        .list(ListContactsQuery {
            sort: SortField::Name,
            order: SortOrder::Desc,
            page_size: 1,
            page: 1,
            ..Default::default()
        })
        .await
        .expect("list");
    assert_eq!(top.data()[0].name, "Bruno");

    let ascending = service
        .list(ListContactsQuery {
            sort: SortField::Name,
            order: SortOrder::Asc,
            page_size: 10,
            ..Default::default()
        })
        .await
        .expect("list");
    let names: Vec<_> = ascending.data().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Aaron", "Alice", "Ann", "Bruno"]);
    assert!(matches!(ascending, ContactListEnvelope::Offset { total: 4, .. }));
}

#[tokio::test]
async fn seed_skips_existing_emails() {
    let repo = InMemoryContacts::new();
    let service = service(repo.clone());
    let samples = rolodex::application::contacts::sample_contacts(5);

    let first = service.seed(samples.clone()).await.expect("seed");
    assert_eq!((first.inserted, first.skipped), (5, 0));

    let second = service.seed(samples).await.expect("seed again");
    assert_eq!((second.inserted, second.skipped), (0, 5));
    assert_eq!(repo.len(), 5);
}
