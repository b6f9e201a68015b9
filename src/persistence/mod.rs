//! Persistence layer - SQLite-backed storage

mod database;

pub use database::{Database, InstanceEvent, InstanceRow};
