//! # palaver-store
//!
//! Durable-storage interface of the messaging core.
//!
//! The server treats storage as an external collaborator: it only ever
//! needs "insert a message and get back `{id, created_at}`", group
//! membership checks, and user display lookups. Those contracts live here
//! as [`MessageStore`] and [`UserDirectory`] trait objects so that tests
//! can inject deterministic fakes, with [`PgStore`] as the Postgres
//! implementation used in production.

pub mod error;
pub mod models;
pub mod postgres;
pub mod traits;

pub use error::StoreError;
pub use models::{NewMessage, StoredMessage, UserProfile};
pub use postgres::PgStore;
pub use traits::{MessageStore, UserDirectory};
