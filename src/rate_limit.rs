//! Per-client admission control over calendar minute and hour buckets.

use crate::config::RateLimitSettings;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use time::OffsetDateTime;

/// Window whose limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateWindow {
    /// Current calendar minute.
    Minute,
    /// Current calendar hour.
    Hour,
}

impl RateWindow {
    const fn seconds(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3600,
        }
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        })
    }
}

/// Admission denied for one client.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("rate limit exceeded: {limit} requests per {window}")]
pub struct RateLimitRejection {
    /// Window that was full.
    pub window: RateWindow,
    /// Limit configured for that window.
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    client: String,
    window: RateWindow,
    bucket: i64,
}

/// Counts requests per `(client, window, bucket)` and admits while both windows have room.
pub struct RateLimiter {
    settings: RateLimitSettings,
    counters: Mutex<HashMap<BucketKey, u32>>,
}

impl RateLimiter {
    /// Limiter enforcing `settings`.
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Admit and count one request from `client` at `now`, or report which window is full.
    ///
    /// The check and both increments happen under one lock, so concurrent callers can never
    /// be admitted past a limit.
    pub fn check_and_consume(
        &self,
        client: &str,
        now: OffsetDateTime,
    ) -> Result<(), RateLimitRejection> {
        let timestamp = now.unix_timestamp();
        let minute = bucket_key(client, RateWindow::Minute, timestamp);
        let hour = bucket_key(client, RateWindow::Hour, timestamp);

        let mut counters = self.lock();
        self.purge(&mut counters, timestamp);

        let minute_count = counters.get(&minute).copied().unwrap_or(0);
        if minute_count >= self.settings.per_minute {
            return Err(self.reject(client, RateWindow::Minute, self.settings.per_minute));
        }
        let hour_count = counters.get(&hour).copied().unwrap_or(0);
        if hour_count >= self.settings.per_hour {
            return Err(self.reject(client, RateWindow::Hour, self.settings.per_hour));
        }

        counters.insert(minute, minute_count + 1);
        counters.insert(hour, hour_count + 1);
        Ok(())
    }

    /// Number of live buckets, for diagnostics.
    pub fn tracked_buckets(&self) -> usize {
        self.lock().len()
    }

    fn purge(&self, counters: &mut HashMap<BucketKey, u32>, timestamp: i64) {
        let retention = i64::try_from(self.settings.retention.as_secs()).unwrap_or(i64::MAX);
        let horizon = timestamp.saturating_sub(retention);
        counters.retain(|key, _| {
            let bucket_end = (key.bucket + 1) * key.window.seconds();
            bucket_end > horizon
        });
    }

    fn reject(&self, client: &str, window: RateWindow, limit: u32) -> RateLimitRejection {
        tracing::warn!(client_id = client, %window, limit, "Rate limit exceeded");
        RateLimitRejection { window, limit }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BucketKey, u32>> {
        self.counters
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

fn bucket_key(client: &str, window: RateWindow, timestamp: i64) -> BucketKey {
    BucketKey {
        client: client.to_string(),
        window,
        bucket: timestamp.div_euclid(window.seconds()),
    }
}
