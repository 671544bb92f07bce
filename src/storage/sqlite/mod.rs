//! `SQLite` key store and its connection plumbing.
//!
//! - [`connection`]: mutex handling, pragmas, database file removal
//! - [`metrics`]: per-operation metrics helpers
//! - [`key_store`]: the [`SqliteKeyStore`] itself

mod connection;
mod key_store;
mod metrics;

pub use connection::acquire_lock;
pub use key_store::{SCHEMA_VERSION, SqliteKeyStore};
