//! Resilient retrieval of remote units: one unit at a time ([`UnitFetcher`])
//! or a whole directory with bounded concurrency ([`BatchRetriever`]).

pub mod batch;
pub mod content;
pub mod outcome;
pub mod policy;
pub mod source;
pub mod unit;

pub use batch::{plan_units, BatchProgress, BatchReport, BatchRetriever};
pub use outcome::{FetchOutcome, TransientError, Unit, UnitRef};
pub use policy::{RetryDecision, RetryPolicy};
pub use source::{ContentEnvelope, HttpSource, SourceError, UnitSource};
pub use unit::{correlation_token, UnitFetcher};
