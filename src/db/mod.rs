/// Database module for query-suggest
///
/// Handles the query history log, the append-only suggestion/feedback
/// sink and the persisted engine state, all on SQLite via sqlx with
/// connection pooling.

pub mod connection;
pub mod models;
pub mod queries;

pub use connection::Database;
pub use models::*;
