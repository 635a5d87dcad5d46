//! Persistence adapters implementing the document store and secret vault ports.

pub mod state_json;
pub mod store;
pub mod vault;

pub use state_json::ActiveBatchMirror;
pub use store::SqliteStore;
pub use vault::AesGcmVault;
