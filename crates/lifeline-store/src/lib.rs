//! # lifeline-store
//!
//! Persistent document store for the Lifeline engine, backed by SQLite.
//!
//! Two layers are exposed:
//! - [`Database`], a synchronous handle wrapping a `rusqlite::Connection`
//!   with typed CRUD helpers for every domain model;
//! - [`DocumentStore`], the async seam the engine talks to, implemented by
//!   [`SqliteStore`], which also publishes a [`StoreChange`] feed that backs
//!   live query subscriptions.
//!
//! Individual writes are atomic. Nothing here offers transactions spanning
//! several documents; the engine is written so it never needs them.

pub mod alerts;
pub mod chats;
pub mod contacts;
pub mod database;
pub mod emergencies;
pub mod messages;
pub mod migrations;
pub mod presence;
pub mod store;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use lifeline_shared::models::*;
pub use store::{DocumentStore, SqliteStore, StoreChange};
