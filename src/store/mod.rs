//! Persistence layer — libSQL-backed storage for sessions, profiles,
//! customers, and bookings, plus an in-memory backend for tests.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryBackend;
