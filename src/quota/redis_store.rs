//! Redis-backed quota limiter.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use redis::aio::ConnectionManager;

use super::{QuotaLimiter, QuotaPolicy, QuotaStatus, log_permitted, window};
use crate::error::QuotaError;

/// Check-and-decrement in one round trip.
///
/// KEYS[1] = counter key, ARGV[1] = limit, ARGV[2] = window TTL in ms.
/// Returns the remaining count after a permitted call, or -1 when denied.
const QUOTA_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])

local current = redis.call("GET", key)
if not current then
    if limit <= 0 then
        return -1
    end
    redis.call("SET", key, limit - 1, "PX", ttl)
    return limit - 1
end

current = tonumber(current)
if current == nil then
    return redis.error_reply("quota counter is not an integer")
end
if current <= 0 then
    return -1
end

return redis.call("DECR", key)
"#;

/// Quota limiter shared by every service instance that points at the same
/// Redis database.
#[derive(Clone)]
pub struct RedisQuotaLimiter {
    conn: ConnectionManager,
    script: redis::Script,
    policy: QuotaPolicy,
}

impl std::fmt::Debug for RedisQuotaLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQuotaLimiter")
            .field("policy", &self.policy)
            .finish()
    }
}

impl RedisQuotaLimiter {
    /// Wrap an existing connection manager.
    pub fn new(conn: ConnectionManager, policy: QuotaPolicy) -> Self {
        Self {
            conn,
            script: redis::Script::new(QUOTA_SCRIPT),
            policy,
        }
    }

    /// Open a managed connection to `redis_url` and verify it with a PING.
    pub async fn connect(redis_url: &str, policy: QuotaPolicy) -> Result<Self, QuotaError> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!(
            reply = %pong,
            limit = policy.limit,
            key_prefix = %policy.key_prefix,
            reset_weekday = %policy.reset_weekday,
            "Redis quota store connected"
        );
        Ok(Self::new(conn, policy))
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }
}

#[async_trait]
impl QuotaLimiter for RedisQuotaLimiter {
    async fn allow(&self, identity: &str) -> Result<bool, QuotaError> {
        let key = self.policy.key(identity);
        let now = Local::now();
        let reset = window::next_reset(&now, self.policy.reset_weekday);
        let ttl = window::ttl_until(&now, &reset);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        let mut conn = self.conn.clone();
        let remaining: i64 = self
            .script
            .key(&key)
            .arg(self.policy.limit)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        if remaining < 0 {
            tracing::warn!(identity = %identity, "Quota exhausted");
            return Ok(false);
        }

        log_permitted(&self.policy, identity, remaining, Some(reset.to_rfc3339()));
        Ok(true)
    }

    async fn status(&self, identity: &str) -> Result<QuotaStatus, QuotaError> {
        let key = self.policy.key(identity);
        let mut conn = self.conn.clone();
        let (current, pttl): (Option<i64>, i64) = redis::pipe()
            .atomic()
            .get(&key)
            .pttl(&key)
            .query_async(&mut conn)
            .await?;

        Ok(match current {
            // No window open: the next call starts one at the full limit.
            None => QuotaStatus {
                remaining: self.policy.limit,
                resets_in: None,
            },
            Some(remaining) => {
                let resets_in = match pttl {
                    ms if ms >= 0 => Some(Duration::from_millis(ms.unsigned_abs())),
                    -1 => {
                        return Err(QuotaError::Protocol(format!(
                            "quota counter {key} has no expiry"
                        )));
                    }
                    _ => None,
                };
                QuotaStatus {
                    remaining: remaining.max(0),
                    resets_in,
                }
            }
        })
    }
}
