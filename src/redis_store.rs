//! Redis-backed admission store for multi-instance deployments

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::info;

use crate::error::{Result, VerifierError};
use crate::rate_limit::{Admission, RateLimitConfig, RateLimitStore};

/// Same state machine as the in-memory limiter, run atomically server-side.
/// Returns `{allowed, remaining, reset_at}`.
const ADMIT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local max = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local count = tonumber(redis.call('HGET', KEYS[1], 'count') or '0')
local reset_at = tonumber(redis.call('HGET', KEYS[1], 'reset_at') or '0')

if count == 0 or now >= reset_at then
    if max <= 0 then
        return {0, 0, now + window}
    end
    reset_at = now + window
    redis.call('HSET', KEYS[1], 'count', 1, 'reset_at', reset_at)
    redis.call('PEXPIRE', KEYS[1], window)
    return {1, max - 1, reset_at}
end

if count >= max then
    return {0, 0, reset_at}
end

count = redis.call('HINCRBY', KEYS[1], 'count', 1)
return {1, max - count, reset_at}
"#;

const KEY_PREFIX: &str = "ratelimit";

fn admission_key(client_id: &str) -> String {
    format!("{}:{}", KEY_PREFIX, client_id)
}

/// Rate limit store with Redis backend
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    config: RateLimitConfig,
    script: Script,
}

impl RedisRateLimitStore {
    /// Create a new store
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `config` - Window and limit shared by every instance
    pub async fn new(redis_url: &str, config: RateLimitConfig) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| VerifierError::RateLimitStore(e.to_string()))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| VerifierError::RateLimitStore(format!("Failed to connect: {}", e)))?;

        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            config,
            script: Script::new(ADMIT_SCRIPT),
        })
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn admit(&self, client_id: &str, now_ms: i64) -> Result<Admission> {
        // Clones share the one managed connection
        let mut conn = self.conn.clone();

        let reply: Vec<i64> = self
            .script
            .key(admission_key(client_id))
            .arg(now_ms)
            .arg(self.config.max_requests)
            .arg(self.config.window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| VerifierError::RateLimitStore(e.to_string()))?;

        match reply.as_slice() {
            [allowed, remaining, reset_at] => Ok(Admission {
                allowed: *allowed == 1,
                limit: self.config.max_requests,
                remaining: u32::try_from(*remaining).unwrap_or(0),
                reset_at: *reset_at,
            }),
            other => Err(VerifierError::RateLimitStore(format!(
                "Unexpected admission reply: {:?}",
                other
            ))),
        }
    }

    fn config(&self) -> RateLimitConfig {
        self.config
    }
}
