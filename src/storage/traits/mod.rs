//! Storage backend traits.

mod key_store;

pub use key_store::KeyStore;
