//! Linker configuration - passed from higher layers.

use chrono::Duration;

/// Service configuration. Higher layers construct this.
#[derive(Debug, Clone)]
pub struct LinkerConfig {
    /// How long an unconsumed link code stays valid. Codes are meant for an
    /// immediate scan-and-link, so minutes, not hours.
    pub code_expiry: Duration,
    /// Characters per link code.
    pub code_length: usize,
    /// Retained messages per recipient feed.
    pub backlog_cap: usize,
    /// Retained session→client bindings; the oldest ages out past the cap.
    pub session_cap: usize,
    /// Client identity cookie lifetime, surfaced to the transport layer.
    pub cookie_days: i64,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            code_expiry: Duration::minutes(5),
            code_length: 8,
            backlog_cap: 512,
            session_cap: 4096,
            cookie_days: 15,
        }
    }
}

impl LinkerConfig {
    pub fn new() -> Self { Self::default() }
    pub fn with_code_expiry(mut self, expiry: Duration) -> Self { self.code_expiry = expiry; self }
    pub fn with_code_expiry_secs(mut self, secs: i64) -> Self { self.code_expiry = Duration::seconds(secs); self }
    pub fn with_code_length(mut self, len: usize) -> Self { self.code_length = len.max(4); self }
    pub fn with_backlog_cap(mut self, cap: usize) -> Self { self.backlog_cap = cap.max(1); self }
    pub fn with_session_cap(mut self, cap: usize) -> Self { self.session_cap = cap.max(1); self }
    pub fn with_cookie_days(mut self, days: i64) -> Self { self.cookie_days = days.max(1); self }
}
