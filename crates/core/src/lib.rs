// crates/core/src/lib.rs
pub mod config;
pub mod fetch;
pub mod paths;
pub mod task;

pub use config::{ConfigError, FetchConfig};
pub use fetch::*;
pub use task::{TaskStatus, UnknownStatus};
