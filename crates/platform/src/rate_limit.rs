//! Fixed-window rate limiter backed by DashMap.
//!
//! Limits are keyed by policy name and caller (account id or client IP),
//! so one caller exhausting `portal.login` does not affect anyone else.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;

/// A named limit: at most `max_requests` per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub name: &'static str,
    pub max_requests: u32,
    pub window_secs: i64,
}

impl RatePolicy {
    pub const fn per_minute(name: &'static str, max_requests: u32) -> Self {
        Self {
            name,
            max_requests,
            window_secs: 60,
        }
    }

    pub const fn per_hour(name: &'static str, max_requests: u32) -> Self {
        Self {
            name,
            max_requests,
            window_secs: 3600,
        }
    }
}

impl fmt::Display for RatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.window_secs {
            60 => "minute".to_string(),
            3600 => "hour".to_string(),
            secs => format!("{secs} seconds"),
        };
        write!(f, "{} per {}", self.max_requests, unit)
    }
}

/// Policies applied to the admin and portal APIs.
pub mod policies {
    use super::RatePolicy;

    pub const ADMIN_LOGIN: RatePolicy = RatePolicy::per_minute("admin.login", 5);
    pub const ADMIN_TENANT_CREATE: RatePolicy = RatePolicy::per_hour("admin.tenant_create", 20);
    pub const ADMIN_TENANT_UPDATE: RatePolicy = RatePolicy::per_hour("admin.tenant_update", 30);
    pub const ADMIN_TENANT_DELETE: RatePolicy = RatePolicy::per_hour("admin.tenant_delete", 10);
    pub const ADMIN_TENANT_SUSPEND: RatePolicy = RatePolicy::per_hour("admin.tenant_suspend", 20);
    pub const ADMIN_BACKUP: RatePolicy = RatePolicy::per_hour("admin.backup", 5);
    pub const ADMIN_RESTORE: RatePolicy = RatePolicy::per_hour("admin.restore", 3);

    pub const PORTAL_LOGIN: RatePolicy = RatePolicy::per_minute("portal.login", 10);
    pub const PORTAL_REGISTER: RatePolicy = RatePolicy::per_minute("portal.register", 5);
    pub const PORTAL_TENANT_CREATE: RatePolicy = RatePolicy::per_hour("portal.tenant_create", 5);
    pub const PORTAL_TENANT_UPDATE: RatePolicy = RatePolicy::per_hour("portal.tenant_update", 10);
    pub const PORTAL_TENANT_DELETE: RatePolicy = RatePolicy::per_hour("portal.tenant_delete", 3);
    pub const PORTAL_BACKUP: RatePolicy = RatePolicy::per_hour("portal.backup", 2);
    pub const PORTAL_MODULE: RatePolicy = RatePolicy::per_hour("portal.module", 5);
    pub const PORTAL_CANCEL_SUBSCRIPTION: RatePolicy =
        RatePolicy::per_hour("portal.cancel_subscription", 5);
    pub const PORTAL_SUPPORT_CREATE: RatePolicy = RatePolicy::per_minute("portal.support_create", 5);
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    started_at: DateTime<Utc>,
    window_secs: i64,
}

/// Result returned by [`RateLimiter::check`].
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub limit: u32,
}

impl RateLimitResult {
    /// Seconds until the window resets, never below one.
    pub fn retry_after_secs(&self) -> i64 {
        (self.reset_at - Utc::now()).num_seconds().max(1)
    }
}

pub struct RateLimiter {
    entries: DashMap<String, Window>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            enabled,
        }
    }

    /// Check (and consume) one request for `caller` under `policy`.
    pub fn check(&self, policy: &RatePolicy, caller: &str) -> RateLimitResult {
        self.check_at(policy, caller, Utc::now())
    }

    fn check_at(&self, policy: &RatePolicy, caller: &str, now: DateTime<Utc>) -> RateLimitResult {
        let window = Duration::seconds(policy.window_secs);
        if !self.enabled {
            return RateLimitResult {
                allowed: true,
                remaining: policy.max_requests,
                reset_at: now + window,
                limit: policy.max_requests,
            };
        }

        let key = format!("{}:{}", policy.name, caller);
        let mut entry = self.entries.entry(key).or_insert_with(|| Window {
            count: 0,
            started_at: now,
            window_secs: policy.window_secs,
        });

        if now.signed_duration_since(entry.started_at) >= window {
            entry.count = 0;
            entry.started_at = now;
        }

        let reset_at = entry.started_at + window;
        if entry.count < policy.max_requests {
            entry.count += 1;
            RateLimitResult {
                allowed: true,
                remaining: policy.max_requests - entry.count,
                reset_at,
                limit: policy.max_requests,
            }
        } else {
            RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_at,
                limit: policy.max_requests,
            }
        }
    }

    /// Drop windows that have already closed.
    pub fn purge_stale(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, w| now.signed_duration_since(w.started_at) < Duration::seconds(w.window_secs));
        before - self.entries.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}
