//! # parley-store
//!
//! Local persistence for the Parley client, backed by SQLite.
//!
//! Only small hints live here: the last channel viewed per server, the last
//! selected server, a rough server count for pre-connection placeholders and
//! the UI language. Everything else is refetched from the backend.

pub mod cache;
pub mod database;
pub mod migrations;

mod error;

pub use cache::LocalCache;
pub use database::Database;
pub use error::StoreError;
