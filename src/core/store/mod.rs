//! Data Store
//!
//! Durable relational store for projects, sequences, tracks, clips,
//! media, properties, clip links, and command records. Only this module
//! (and the mutation applier built on it) issues SQL; executors and
//! planners go through the typed accessors.

mod db;
mod models;
mod queries;
mod schema;

pub use db::Database;
pub use models::*;

#[cfg(test)]
pub(crate) use queries::fixtures;
