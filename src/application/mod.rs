pub mod contacts;
pub mod error;
pub mod idempotency;
pub mod pagination;
pub mod repos;
