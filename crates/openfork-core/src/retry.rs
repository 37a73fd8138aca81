// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

/// Error-text markers that classify a provider failure as transient.
const RETRYABLE_MARKERS: &[&str] = &[
    // transport
    "connection",
    "timeout",
    "econnreset",
    "network",
    // rate limiting
    "rate",
    "too many requests",
    "429",
    "throttl",
    // server side
    "500",
    "502",
    "503",
    "504",
    "server error",
    "overloaded",
    "unavailable",
    // stream / capacity
    "exhausted",
    "capacity",
    "ended prematurely",
];

/// Classifier plus backoff schedule, extracted into a value so the loop can
/// be driven with a simulated clock in tests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            factor: 2.0,
            max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Case-insensitive substring classification of an error message.
    pub fn is_retryable(&self, error: &str) -> bool {
        let lowered = error.to_lowercase();
        RETRYABLE_MARKERS.iter().any(|m| lowered.contains(m))
    }

    /// Backoff before `attempt` (1-based): `min(initial × factor^(n−1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let delay = self.initial.as_secs_f64() * self.factor.powi(exp as i32);
        Duration::from_secs_f64(delay.min(self.max.as_secs_f64()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
