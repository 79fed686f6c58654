// crates/db/src/queries/mod.rs
// Task and catalog queries, implemented as `impl Database` blocks.

pub mod catalog;
pub mod tasks;
