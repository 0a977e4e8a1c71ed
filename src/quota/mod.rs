//! Per-identity weekly quota.
//!
//! Each caller identity owns one counter in a shared store. The first
//! request in a window creates the counter at `limit - 1` with an expiry at
//! the next reset boundary (see [`window`]). Later requests decrement it
//! while it is positive. A counter at zero denies without mutation. The
//! expiry is set only on creation, so continued use never extends a window.
//!
//! # Backends
//!
//! - [`RedisQuotaLimiter`]: shared across service instances; check and
//!   decrement run as one server-side script
//! - [`MemoryQuotaLimiter`]: single process, same semantics behind a mutex

mod memory;
mod redis_store;
pub mod window;

pub use memory::MemoryQuotaLimiter;
pub use redis_store::RedisQuotaLimiter;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Weekday;
use serde::Serialize;

use crate::error::QuotaError;

/// Snapshot of an identity's allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    /// Requests left in the current window.
    pub remaining: i64,
    /// Time until the window resets. `None` when no window is open yet.
    #[serde(rename = "resetsInMs", serialize_with = "serialize_millis")]
    pub resets_in: Option<Duration>,
}

#[allow(clippy::ref_option)]
fn serialize_millis<S: serde::Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        None => serializer.serialize_none(),
    }
}

/// Settings shared by every backend.
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    /// Requests allowed per identity per window.
    pub limit: i64,
    /// Namespace prepended to every identity to form the store key.
    pub key_prefix: String,
    /// Weekday whose midnight ends a window.
    pub reset_weekday: Weekday,
}

impl QuotaPolicy {
    pub fn key(&self, identity: &str) -> String {
        format!("{}{identity}", self.key_prefix)
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            limit: 10,
            key_prefix: "limit:".to_string(),
            reset_weekday: Weekday::Thu,
        }
    }
}

/// Windowed allowance check for one identity.
#[async_trait]
pub trait QuotaLimiter: Send + Sync + std::fmt::Debug {
    /// Consume one unit of allowance if any is left.
    ///
    /// Returns `Ok(false)` when the allowance is exhausted, and `Err` only
    /// when the store itself could not be consulted.
    async fn allow(&self, identity: &str) -> Result<bool, QuotaError>;

    /// Read the current allowance without consuming it.
    async fn status(&self, identity: &str) -> Result<QuotaStatus, QuotaError>;
}

/// Log the notable outcomes of one permitted call.
fn log_permitted(policy: &QuotaPolicy, identity: &str, remaining: i64, reset: Option<String>) {
    if remaining == policy.limit - 1 {
        tracing::info!(
            identity = %identity,
            limit = policy.limit,
            resets_at = reset.as_deref().unwrap_or("unknown"),
            "Opened quota window for identity"
        );
    } else if remaining < 3 {
        tracing::info!(identity = %identity, remaining, "Identity is running low on quota");
    }
}
