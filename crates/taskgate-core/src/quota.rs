use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use taskgate_common::{Admission, QuotaLimits};

/// Window length for both the request and token counters. The window is
/// anchored at the user's first request after the previous window expired,
/// not at wall-clock minute boundaries.
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct UserWindow {
    current_rpm: u32,
    current_tpm: u64,
    window_started_at: Instant,
}

impl UserWindow {
    fn fresh() -> Self {
        Self {
            current_rpm: 0,
            current_tpm: 0,
            window_started_at: Instant::now(),
        }
    }

    fn reset_if_expired(&mut self, now: Instant) {
        if now.duration_since(self.window_started_at) >= WINDOW {
            self.current_rpm = 0;
            self.current_tpm = 0;
            self.window_started_at = now;
        }
    }

    fn retry_after(&self, now: Instant) -> u64 {
        let remaining = WINDOW.saturating_sub(now.duration_since(self.window_started_at));
        // Round up so a denied caller never retries into the same window.
        let mut secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs += 1;
        }
        secs
    }
}

/// Per-user fixed-window rate limiter for request and token consumption.
///
/// One `UserWindow` per user; the map's per-entry exclusive access
/// serializes all mutations for a single user while keeping users from
/// contending with each other. No lock is ever held across an await point.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    windows: DashMap<String, UserWindow>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one request for `user_id`, incrementing the request counter on
    /// success. Denial carries the seconds until the window rolls over.
    pub fn admit(&self, user_id: &str, limits: QuotaLimits) -> Admission {
        let mut window = self
            .windows
            .entry(user_id.to_string())
            .or_insert_with(UserWindow::fresh);
        let now = Instant::now();
        window.reset_if_expired(now);

        if window.current_rpm >= limits.rpm_limit {
            let retry_after_secs = window.retry_after(now);
            warn!(
                user_id,
                current_rpm = window.current_rpm,
                rpm_limit = limits.rpm_limit,
                "request quota exceeded"
            );
            return Admission::Denied {
                retry_after_secs,
                reason: format!(
                    "{}/{} requests per minute",
                    window.current_rpm, limits.rpm_limit
                ),
            };
        }

        window.current_rpm += 1;
        debug!(
            user_id,
            current_rpm = window.current_rpm,
            rpm_limit = limits.rpm_limit,
            "request admitted"
        );
        Admission::Allowed
    }

    /// Prospective token check against the estimate for a not-yet-executed
    /// call. Does not mutate the counter; actual usage is recorded with
    /// [`record_tokens`](Self::record_tokens) after the provider replies.
    pub fn admit_tokens(&self, user_id: &str, limits: QuotaLimits, estimated: u64) -> Admission {
        if estimated == 0 {
            return Admission::Allowed;
        }

        let mut window = self
            .windows
            .entry(user_id.to_string())
            .or_insert_with(UserWindow::fresh);
        let now = Instant::now();
        window.reset_if_expired(now);

        let prospective = window.current_tpm.saturating_add(estimated);
        if prospective > limits.tpm_limit {
            let retry_after_secs = window.retry_after(now);
            warn!(
                user_id,
                prospective,
                tpm_limit = limits.tpm_limit,
                "token quota exceeded"
            );
            return Admission::Denied {
                retry_after_secs,
                reason: format!(
                    "would use {}/{} tokens per minute",
                    prospective, limits.tpm_limit
                ),
            };
        }

        Admission::Allowed
    }

    /// Record actual token consumption. Never denies; the prospective check
    /// already ran before the call.
    pub fn record_tokens(&self, user_id: &str, tokens: u64) {
        if tokens == 0 {
            return;
        }
        let mut window = self
            .windows
            .entry(user_id.to_string())
            .or_insert_with(UserWindow::fresh);
        window.reset_if_expired(Instant::now());
        window.current_tpm = window.current_tpm.saturating_add(tokens);
    }

    /// Rough token estimate when exact counts are unavailable: one token
    /// per four characters, minimum one for non-empty text.
    pub fn estimate_tokens(text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        ((text.len() / 4) as u64).max(1)
    }

    /// Current `(current_rpm, current_tpm)` for a user, if a window exists.
    pub fn usage(&self, user_id: &str) -> Option<(u32, u64)> {
        self.windows
            .get(user_id)
            .map(|w| (w.current_rpm, w.current_tpm))
    }

    #[cfg(test)]
    fn rewind_window(&self, user_id: &str, by: Duration) {
        if let Some(mut window) = self.windows.get_mut(user_id) {
            window.window_started_at -= by;
        }
    }
}
