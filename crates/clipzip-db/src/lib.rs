//! Postgres-backed video status store.
//!
//! The status column is the only state shared between workers. Every
//! transition is a conditional update, so two workers racing on the same
//! video cannot both win.

pub mod config;
pub mod error;
pub mod store;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use store::{connect, run_migrations, PgStatusStore, StatusStore};
