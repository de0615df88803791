//! Configuration types for the engine.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::links::LinkConfig;
use crate::types::phase::{Criticality, Phase};

/// Retry behaviour for one step type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Sleep before the second attempt.
    pub initial_delay_ms: u64,

    /// Upper bound for any single sleep.
    pub max_delay_ms: u64,

    /// Factor applied to the delay after every retry.
    pub backoff_multiplier: f64,

    /// Hard timeout per attempt. `None` waits indefinitely.
    pub timeout_ms: Option<u64>,

    /// Extra message/code fragments that mark an error retryable
    /// (matched case-insensitively).
    pub retryable_signatures: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            timeout_ms: Some(120_000),
            retryable_signatures: vec![],
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.retryable_signatures.push(signature.into());
        self
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// At least one attempt is always made.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// How the driver loop treats one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePolicy {
    pub criticality: Criticality,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl PhasePolicy {
    /// Built-in policy for a phase.
    pub fn for_phase(phase: Phase) -> Self {
        let retry = match phase {
            // Image synthesis is slow
            Phase::Image => RetryPolicy::default().with_timeout(Some(Duration::from_secs(300))),
            Phase::Meta | Phase::Category => {
                RetryPolicy::default().with_timeout(Some(Duration::from_secs(60)))
            }
            // Publishing is not idempotent on the remote side
            Phase::Publish => RetryPolicy::default().with_max_attempts(2),
            _ => RetryPolicy::default(),
        };
        Self {
            criticality: phase.default_criticality(),
            retry,
        }
    }
}

/// Duplicate-submission guard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub enabled: bool,
    /// Trailing window searched for equivalent work
    pub window_days: i64,
}

impl GuardConfig {
    /// Length of the trailing window. Saturates instead of overflowing.
    pub fn window(&self) -> TimeDelta {
        saturating_days(self.window_days)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_days: 30,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-phase overrides; phases not listed use `PhasePolicy::for_phase`.
    pub phases: BTreeMap<Phase, PhasePolicy>,

    pub guard: GuardConfig,

    /// Checkpoints older than this are removed by the retention sweep.
    pub checkpoint_retention_days: i64,

    /// Delete the checkpoint once a job completes instead of leaving the
    /// COMPLETED record for the retention sweep.
    pub clear_checkpoint_on_success: bool,

    pub links: LinkConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phases: BTreeMap::new(),
            guard: GuardConfig::default(),
            checkpoint_retention_days: 14,
            clear_checkpoint_on_success: false,
            links: LinkConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Age past which checkpoints are swept. Saturates instead of overflowing.
    pub fn checkpoint_retention(&self) -> TimeDelta {
        saturating_days(self.checkpoint_retention_days)
    }

    /// Effective policy for a phase.
    pub fn policy(&self, phase: Phase) -> PhasePolicy {
        self.phases
            .get(&phase)
            .cloned()
            .unwrap_or_else(|| PhasePolicy::for_phase(phase))
    }

    pub fn with_phase_policy(mut self, phase: Phase, policy: PhasePolicy) -> Self {
        self.phases.insert(phase, policy);
        self
    }

    /// Replace the retry policy of every pipeline phase.
    pub fn with_retry_for_all(mut self, retry: RetryPolicy) -> Self {
        for phase in Phase::PIPELINE {
            let mut policy = self.policy(phase);
            policy.retry = retry.clone();
            self.phases.insert(phase, policy);
        }
        self
    }

    pub fn with_criticality(mut self, phase: Phase, criticality: Criticality) -> Self {
        let mut policy = self.policy(phase);
        policy.criticality = criticality;
        self.phases.insert(phase, policy);
        self
    }

    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_links(mut self, links: LinkConfig) -> Self {
        self.links = links;
        self
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.checkpoint_retention_days = days;
        self
    }

    pub fn with_clear_checkpoint_on_success(mut self, clear: bool) -> Self {
        self.clear_checkpoint_on_success = clear;
        self
    }
}

/// Negative counts read as zero; counts too large for a `TimeDelta` read as
/// `TimeDelta::MAX`.
fn saturating_days(days: i64) -> TimeDelta {
    TimeDelta::try_days(days.max(0)).unwrap_or(TimeDelta::MAX)
}
