//! Persistence layer: libSQL-backed storage for senders, groups, messages,
//! reactions, and knowledge topics.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
