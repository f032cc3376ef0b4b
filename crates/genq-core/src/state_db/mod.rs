//! Durable shared state (SQLite via sqlx).
//!
//! Every scheduler instance on the machine opens the same database. It holds a
//! single key/value table: the job collection, the leadership lease and the
//! pending-upload list each live under one key and are written whole.

mod db;
mod kv;

pub use db::StateDb;
pub use db::unix_millis;

#[cfg(test)]
pub(crate) use db::open_memory;
