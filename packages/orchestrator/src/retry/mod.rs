//! Retry policy execution and error classification.

pub mod classifier;
pub mod executor;

pub use classifier::{
    categorize, is_retryable, ErrorCategory, ErrorClassifier, ErrorRecord, ErrorStats, Severity,
};
pub use executor::{Attempted, RetryExecutor, RetryFailure, RetryStats};
