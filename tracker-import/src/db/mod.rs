//! SQLite persistence for tracker data
//!
//! The pool itself comes from [`tracker_common::db::init_database`]; this
//! module owns the tracker tables and the [`SqliteStore`] built on them.

mod rows;
pub mod schema;
pub mod store;

pub use store::SqliteStore;
