//! In-process quota limiter.
//!
//! Same window semantics as the Redis backend, but state lives in this
//! process only. Suitable for single-instance deployments and tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Local};

use super::{QuotaLimiter, QuotaPolicy, QuotaStatus, log_permitted, window};
use crate::error::QuotaError;

#[derive(Debug, Clone, Copy)]
struct Counter {
    remaining: i64,
    expires_at: DateTime<Local>,
}

#[derive(Debug, Default)]
struct Counters {
    by_key: HashMap<String, Counter>,
    /// Earliest expiry among `by_key`; nothing is stale before it.
    sweep_due: Option<DateTime<Local>>,
}

impl Counters {
    /// Drop every counter whose window has closed. Runs at most once per
    /// boundary since all counters opened in one window share its expiry.
    fn sweep(&mut self, now: DateTime<Local>) {
        if self.sweep_due.is_none_or(|due| due > now) {
            return;
        }
        let before = self.by_key.len();
        self.by_key.retain(|_, c| c.expires_at > now);
        self.sweep_due = self.by_key.values().map(|c| c.expires_at).min();
        tracing::debug!(
            removed = before - self.by_key.len(),
            tracked = self.by_key.len(),
            "Expired quota counters swept"
        );
    }

    fn insert(&mut self, key: String, counter: Counter) {
        self.sweep_due = Some(
            self.sweep_due
                .map_or(counter.expires_at, |due| due.min(counter.expires_at)),
        );
        self.by_key.insert(key, counter);
    }
}

/// Mutex-guarded map of identity key → counter.
///
/// Closed windows are swept whenever a new counter opens, so memory stays
/// bounded by the identities seen in the current window.
#[derive(Debug)]
pub struct MemoryQuotaLimiter {
    counters: Mutex<Counters>,
    policy: QuotaPolicy,
}

impl MemoryQuotaLimiter {
    pub fn new(policy: QuotaPolicy) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            policy,
        }
    }

    /// [`QuotaLimiter::allow`] evaluated at an explicit instant.
    pub fn allow_at(&self, identity: &str, now: DateTime<Local>) -> bool {
        let key = self.policy.key(identity);
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(counter) = counters.by_key.get_mut(&key) {
            if counter.expires_at > now {
                if counter.remaining <= 0 {
                    tracing::warn!(identity = %identity, "Quota exhausted");
                    return false;
                }
                counter.remaining -= 1;
                let remaining = counter.remaining;
                drop(counters);
                log_permitted(&self.policy, identity, remaining, None);
                return true;
            }
            counters.by_key.remove(&key);
        }
        counters.sweep(now);

        if self.policy.limit <= 0 {
            return false;
        }

        let expires_at = window::next_reset(&now, self.policy.reset_weekday);
        let remaining = self.policy.limit - 1;
        counters.insert(
            key,
            Counter {
                remaining,
                expires_at,
            },
        );
        drop(counters);
        log_permitted(&self.policy, identity, remaining, Some(expires_at.to_rfc3339()));
        true
    }

    /// [`QuotaLimiter::status`] evaluated at an explicit instant.
    pub fn status_at(&self, identity: &str, now: DateTime<Local>) -> QuotaStatus {
        let key = self.policy.key(identity);
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        match counters.by_key.get(&key) {
            Some(counter) if counter.expires_at > now => QuotaStatus {
                remaining: counter.remaining,
                resets_in: Some(window::ttl_until(&now, &counter.expires_at)),
            },
            _ => QuotaStatus {
                remaining: self.policy.limit,
                resets_in: None,
            },
        }
    }
}

#[async_trait]
impl QuotaLimiter for MemoryQuotaLimiter {
    async fn allow(&self, identity: &str) -> Result<bool, QuotaError> {
        Ok(self.allow_at(identity, Local::now()))
    }

    async fn status(&self, identity: &str) -> Result<QuotaStatus, QuotaError> {
        Ok(self.status_at(identity, Local::now()))
    }
}
