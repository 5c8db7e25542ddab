//! # jarvis-store
//!
//! Local storage for the Jarvis gateway, backed by SQLite.
//!
//! The whole settings document (options, events and face models) lives in
//! memory inside a [`DocumentStore`] and is written through to a single row
//! after every mutation. The synchronous [`Database`] handle wraps the
//! `rusqlite::Connection` underneath it.

pub mod database;
pub mod document;
pub mod migrations;
pub mod store;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use store::DocumentStore;
