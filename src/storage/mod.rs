// Persistent state for the reconciliation engine
//
// SQLite-backed storage split into connection management, schema
// migrations, data models and a repository with the CRUD operations.

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;
