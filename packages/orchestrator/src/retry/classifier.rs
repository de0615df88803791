//! Error classification for retry decisions and statistics.
//!
//! Categorizes step failures (network, timeout, rate-limit, parsing,
//! validation, unknown) and assigns an informational severity. The only
//! state is a bounded ring buffer of recent records used for statistics;
//! severity never drives control flow.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StepError;
use crate::types::config::RetryPolicy;
use crate::types::phase::Phase;

/// Default ring buffer size.
pub const DEFAULT_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Parsing,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Transient categories are retried under any policy.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::RateLimit
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// One observed failure. Purely observational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub phase: Phase,
    pub attempt: u32,
    pub max_attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view over the ring buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    pub total: usize,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "ratelimit", "429", "too many requests", "quota exceeded"];
const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out", "etimedout", "deadline exceeded"];
const NETWORK_PATTERNS: &[&str] = &[
    "network",
    "econnreset",
    "econnrefused",
    "enotfound",
    "socket",
    "connection",
    "dns",
    "502",
    "503",
    "504",
    "service unavailable",
];
const PARSING_PATTERNS: &[&str] = &["parse", "json", "unexpected token", "deserialize", "malformed"];
const VALIDATION_PATTERNS: &[&str] = &["invalid", "validation", "is required", "must be"];

/// Classify by message text alone.
pub fn categorize_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    let hit = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if hit(RATE_LIMIT_PATTERNS) {
        ErrorCategory::RateLimit
    } else if hit(TIMEOUT_PATTERNS) {
        ErrorCategory::Timeout
    } else if hit(NETWORK_PATTERNS) {
        ErrorCategory::Network
    } else if hit(PARSING_PATTERNS) {
        ErrorCategory::Parsing
    } else if hit(VALIDATION_PATTERNS) {
        ErrorCategory::Validation
    } else {
        ErrorCategory::Unknown
    }
}

/// Classify a step error. Typed variants map directly; `Other` falls back
/// to message patterns.
pub fn categorize(err: &StepError) -> ErrorCategory {
    match err {
        StepError::Network(_) => ErrorCategory::Network,
        StepError::Timeout(_) => ErrorCategory::Timeout,
        StepError::RateLimited { .. } => ErrorCategory::RateLimit,
        StepError::Parse(_) => ErrorCategory::Parsing,
        StepError::Validation(_) | StepError::MissingInput { .. } => ErrorCategory::Validation,
        StepError::Other(_) => categorize_message(&err.to_string()),
    }
}

/// Informational severity for a failure on `attempt` of `max_attempts`.
pub fn severity(category: ErrorCategory, attempt: u32, max_attempts: u32) -> Severity {
    let final_attempt = attempt >= max_attempts;
    match category {
        ErrorCategory::RateLimit if !final_attempt => Severity::Info,
        ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::RateLimit => {
            if final_attempt {
                Severity::Error
            } else {
                Severity::Warning
            }
        }
        ErrorCategory::Parsing | ErrorCategory::Validation => Severity::Error,
        ErrorCategory::Unknown => {
            if final_attempt {
                Severity::Critical
            } else {
                Severity::Error
            }
        }
    }
}

/// Whether `err` should be retried under `policy`.
///
/// Retryable when a configured signature matches, or when the category is
/// transient. Missing upstream input is never retried.
pub fn is_retryable(err: &StepError, category: ErrorCategory, policy: &RetryPolicy) -> bool {
    if matches!(err, StepError::MissingInput { .. }) {
        return false;
    }
    let message = err.to_string().to_lowercase();
    let signature_hit = policy.retryable_signatures.iter().any(|sig| {
        let sig = sig.to_lowercase();
        !sig.is_empty() && (message.contains(&sig) || category.as_str() == sig)
    });
    signature_hit || category.is_transient()
}

/// Classifier with a ring buffer of recent failures.
pub struct ErrorClassifier {
    recent: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Classify a failure and remember it.
    pub fn record(&self, err: &StepError, phase: Phase, attempt: u32, max_attempts: u32) -> ErrorRecord {
        let category = categorize(err);
        let record = ErrorRecord {
            category,
            severity: severity(category, attempt, max_attempts),
            message: err.to_string(),
            phase,
            attempt,
            max_attempts,
            timestamp: Utc::now(),
        };

        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(record.clone());

        record
    }

    /// Most recent `n` records, newest last.
    pub fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        let skip = recent.len().saturating_sub(n);
        recent.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> ErrorStats {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = ErrorStats {
            total: recent.len(),
            ..Default::default()
        };
        for record in recent.iter() {
            *stats.by_category.entry(record.category).or_default() += 1;
            *stats.by_severity.entry(record.severity).or_default() += 1;
        }
        stats
    }

    pub fn clear(&self) {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
