//! Postgres persistence
//!
//! Connection pooling, schema migrations and the store implementations the
//! pipelines run against in production.

pub mod migrations;
pub mod pool;
pub mod repositories;
