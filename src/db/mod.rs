//! Database module for the FinTrack server
//!
//! Account and refresh-token persistence: the storage traits the
//! authentication core depends on, a Postgres implementation and an
//! in-memory one.

pub mod memory;
pub mod models;
pub mod operations;
pub mod store;

pub use memory::MemoryStore;
pub use models::{Account, AccountProfile, RefreshToken};
pub use operations::DbOperations;
pub use store::{AccountStore, RefreshTokenStore};
