//! SQLite backend for the Tend care store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Multi-row rules (the last core member,
//! single-use invitations) are checked inside the same transaction as the
//! write they guard.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
