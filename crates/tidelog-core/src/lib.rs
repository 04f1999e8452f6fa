pub mod config;
pub mod context;
pub mod crypto;
pub mod entry;
pub mod errors;
pub mod query;
pub mod store;

pub use config::Config;
pub use context::Context;
pub use crypto::Identity;
pub use entry::{CustomColumn, DeletionRequest, DeletionRequestMessage, DumpRequest, EncryptedEntry, HistoryEntry};
pub use errors::{DatabaseError, Error, Result};
pub use store::{CreateOutcome, DeletePredicate, Store};
