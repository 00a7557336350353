//! Local SQLite database backing the key-value store

mod connection;
mod migrations;

pub use connection::Database;
