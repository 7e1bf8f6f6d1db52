//! Rate limiting for the public menu API
//!
//! Fixed one-minute windows keyed by caller, counted in Redis so limits hold
//! across instances. Falls back to an in-memory window when Redis is not
//! configured (development). Limiter failures fail open: a broken Redis must
//! not take the public API down with it.

use std::collections::HashMap;

use redis::aio::ConnectionManager;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Rate limit check result
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_seconds: u32,
}

enum Backend {
    Redis(ConnectionManager),
    /// key -> (count, window_start)
    Memory(RwLock<HashMap<String, (u32, i64)>>),
}

/// Fixed-window rate limiter
pub struct RateLimiter {
    backend: Backend,
}

impl RateLimiter {
    /// Connect to Redis, falling back to the in-memory limiter on failure
    pub async fn connect(redis_url: &str) -> Self {
        match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(manager) => {
                    tracing::info!("Rate limiter connected to Redis");
                    return Self {
                        backend: Backend::Redis(manager),
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Redis unavailable, using in-memory rate limiter");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Invalid Redis URL, using in-memory rate limiter");
            }
        }
        Self::new_in_memory()
    }

    /// In-memory limiter for development and tests
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::Memory(RwLock::new(HashMap::new())),
        }
    }

    /// Check and count one request for `key` against a per-minute limit
    pub async fn check(&self, key: &str, limit_per_minute: u32) -> RateLimitResult {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let window_start = now - (now % 60);
        let retry_after = (window_start + 60 - now).max(1) as u32;

        match &self.backend {
            Backend::Redis(manager) => {
                let redis_key = format!("rl:{}:{}", key, window_start);
                let mut conn = manager.clone();

                let count: Result<u32, redis::RedisError> = redis::pipe()
                    .atomic()
                    .incr(&redis_key, 1u32)
                    .expire(&redis_key, 120)
                    .ignore()
                    .query_async(&mut conn)
                    .await
                    .map(|(count,): (u32,)| count);

                match count {
                    Ok(count) => RateLimitResult {
                        allowed: count <= limit_per_minute,
                        remaining: limit_per_minute.saturating_sub(count),
                        retry_after_seconds: retry_after,
                    },
                    Err(e) => {
                        // Fail open: metering must not break the read path
                        tracing::warn!(error = %e, "Rate limit check failed, allowing request");
                        RateLimitResult {
                            allowed: true,
                            remaining: limit_per_minute,
                            retry_after_seconds: 0,
                        }
                    }
                }
            }
            Backend::Memory(windows) => {
                let mut windows = windows.write().await;
                let entry = windows.entry(key.to_string()).or_insert((0, window_start));

                // Reset if in new window
                if entry.1 != window_start {
                    entry.0 = 0;
                    entry.1 = window_start;
                }

                entry.0 += 1;
                RateLimitResult {
                    allowed: entry.0 <= limit_per_minute,
                    remaining: limit_per_minute.saturating_sub(entry.0),
                    retry_after_seconds: retry_after,
                }
            }
        }
    }
}
