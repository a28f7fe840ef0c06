//! Shared Reading Store
//!
//! Holds the latest decoded value of each observed metric. Every metric has
//! its own lock, so updating one metric never blocks a read of another.
//! The store hands out a single writer handle and any number of readers.

mod store;

pub use store::{Reading, ReadingReader, ReadingStore, ReadingWriter};

use thiserror::Error;

/// Store access errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Metric has no slot in this store
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
}
