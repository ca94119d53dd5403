//! SQLite backend for the reservation and settlement engine.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
