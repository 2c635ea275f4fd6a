//! Database module: models and schema for the persistent credential cache.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows plus expiry predicates
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: keyed lookups, upserts, and cascaded deletes

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::{AccountRow, AuthorizationRow, CredentialRow, NewAccount, RealmRow};
pub use schema::SQLITE_INIT;
pub use sqlite::{SqlitePool, Store};
