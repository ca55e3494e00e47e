//! Per-client admission control
//!
//! Fixed-window counters keyed by client identity. The in-memory limiter
//! keeps every record behind one mutex so admit-and-increment is atomic;
//! multi-instance deployments plug in the Redis store instead.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;

use crate::error::Result;

/// Shared bucket for clients the transport cannot identify
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    /// Window duration in milliseconds
    pub window_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
        }
    }
}

/// Admission decision plus the advisory header values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch millis at which the client's window resets
    pub reset_at: i64,
}

/// Backing store for admission state
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn admit(&self, client_id: &str, now_ms: i64) -> Result<Admission>;

    fn config(&self) -> RateLimitConfig;
}

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    count: u32,
    window_reset_at: i64,
}

#[derive(Debug, Default)]
struct Table {
    records: HashMap<String, RateLimitRecord>,
    next_sweep_at: i64,
}

/// Process-local fixed-window limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    table: Mutex<Table>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            table: Mutex::new(Table::default()),
        }
    }

    /// Decide whether `client_id` may proceed at `now_ms`
    pub fn admit(&self, client_id: &str, now_ms: i64) -> Admission {
        let limit = self.config.max_requests;
        let mut table = self.table.lock();

        // Drop expired records at most once per window
        if now_ms >= table.next_sweep_at {
            let before = table.records.len();
            table.records.retain(|_, record| now_ms < record.window_reset_at);
            table.next_sweep_at = now_ms.saturating_add(self.config.window_ms);
            let evicted = before - table.records.len();
            if evicted > 0 {
                debug!("Evicted {} expired rate limit records", evicted);
            }
        }

        let window_reset_at = now_ms.saturating_add(self.config.window_ms);
        let record = table
            .records
            .entry(client_id.to_string())
            .and_modify(|record| {
                if now_ms >= record.window_reset_at {
                    *record = RateLimitRecord {
                        count: 0,
                        window_reset_at,
                    };
                }
            })
            .or_insert(RateLimitRecord {
                count: 0,
                window_reset_at,
            });

        if record.count >= limit {
            return Admission {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: record.window_reset_at,
            };
        }

        record.count += 1;
        Admission {
            allowed: true,
            limit,
            remaining: limit - record.count,
            reset_at: record.window_reset_at,
        }
    }

    /// Records currently held
    pub fn tracked_clients(&self) -> usize {
        self.table.lock().records.len()
    }
}

#[async_trait]
impl RateLimitStore for RateLimiter {
    async fn admit(&self, client_id: &str, now_ms: i64) -> Result<Admission> {
        Ok(RateLimiter::admit(self, client_id, now_ms))
    }

    fn config(&self) -> RateLimitConfig {
        self.config
    }
}

/// Client identity from proxy headers and the socket address.
///
/// First `X-Forwarded-For` entry, else the peer IP, else [`UNKNOWN_CLIENT`].
pub fn client_identity(forwarded_for: Option<&str>, remote: Option<SocketAddr>) -> String {
    forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn test_hundred_allowed_then_rejected() {
        let limiter = RateLimiter::new(RateLimitConfig::default());

        for i in 1..=100u32 {
            let admission = limiter.admit("10.0.0.1", T0 + i as i64);
            assert!(admission.allowed, "request {} should be allowed", i);
            assert_eq!(admission.remaining, 100 - i);
            assert_eq!(admission.reset_at, T0 + 1 + 60_000);
        }

        let rejected = limiter.admit("10.0.0.1", T0 + 500);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.limit, 100);
    }

    #[test]
    fn test_fresh_window_after_reset() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 2,
            window_ms: 1_000,
        });

        assert!(limiter.admit("client", T0).allowed);
        assert!(limiter.admit("client", T0 + 10).allowed);
        assert!(!limiter.admit("client", T0 + 999).allowed);

        let fresh = limiter.admit("client", T0 + 1_000);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 1);
        assert_eq!(fresh.reset_at, T0 + 2_000);
    }

    #[test]
    fn test_clients_isolated() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window_ms: 60_000,
        });

        assert!(limiter.admit("a", T0).allowed);
        assert!(!limiter.admit("a", T0).allowed);
        assert!(limiter.admit("b", T0).allowed);
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 0,
            window_ms: 60_000,
        });
        let admission = limiter.admit("a", T0);
        assert!(!admission.allowed);
        assert_eq!(admission.remaining, 0);
    }

    #[test]
    fn test_huge_window_saturates() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 2,
            window_ms: i64::MAX,
        });

        let first = limiter.admit("x", T0);
        assert!(first.allowed);
        assert_eq!(first.reset_at, i64::MAX);
        assert!(limiter.admit("x", T0 + 1).allowed);
        assert!(!limiter.admit("x", T0 + 2).allowed);
    }

    #[test]
    fn test_expired_records_evicted() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 5,
            window_ms: 1_000,
        });

        for i in 0..50 {
            limiter.admit(&format!("client-{}", i), T0);
        }
        assert_eq!(limiter.tracked_clients(), 50);

        let admission = limiter.admit("late", T0 + 5_000);
        assert!(admission.allowed);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_concurrent_admission_is_exact() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_requests: 100,
            window_ms: 60_000,
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.admit(UNKNOWN_CLIENT, T0).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
    }

    #[test]
    fn test_store_trait_delegates() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let store: &dyn RateLimitStore = &limiter;

        let admission = tokio_test::block_on(store.admit("trait-client", T0)).unwrap();
        assert!(admission.allowed);
        assert_eq!(admission.remaining, 99);
        assert_eq!(store.config().max_requests, 100);
    }

    #[test]
    fn test_client_identity_derivation() {
        let remote: SocketAddr = "192.168.1.5:4433".parse().unwrap();

        assert_eq!(
            client_identity(Some("203.0.113.7, 10.0.0.1"), Some(remote)),
            "203.0.113.7"
        );
        assert_eq!(client_identity(Some("  "), Some(remote)), "192.168.1.5");
        assert_eq!(client_identity(None, Some(remote)), "192.168.1.5");
        assert_eq!(client_identity(None, None), UNKNOWN_CLIENT);
        assert_eq!(client_identity(Some(""), None), UNKNOWN_CLIENT);
    }
}
