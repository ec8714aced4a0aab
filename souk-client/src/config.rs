//! Sync client configuration

use std::time::Duration;

/// Sync client configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Snapshot/request timeout
    pub request_timeout: Duration,
    /// Base reconnect delay
    pub reconnect_delay: Duration,
    /// Maximum reconnect delay (exponential backoff cap)
    pub max_reconnect_delay: Duration,
    /// Maximum reconnect attempts (0 = retry forever)
    pub max_reconnect_attempts: u32,
    /// Out-of-order pending buffer: max entries per channel
    pub pending_buffer_limit: usize,
    /// Out-of-order pending buffer: max age before eviction + resync
    pub pending_buffer_ttl: Duration,
}

impl Default for SyncConfig {
    /// LAN-optimized configuration
    ///
    /// - fast disconnect detection
    /// - fast reconnect (backoff capped at 10 seconds)
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(3),
            reconnect_delay: Duration::from_millis(500),
            max_reconnect_delay: Duration::from_secs(10),
            max_reconnect_attempts: 20,
            pending_buffer_limit: 50,
            pending_buffer_ttl: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Create the default configuration (LAN-optimized)
    pub fn new() -> Self {
        Self::default()
    }

    /// LAN profile (default)
    pub fn lan() -> Self {
        Self::default()
    }

    /// WAN/internet profile
    ///
    /// Tolerates high latency; backoff capped at 60 seconds.
    pub fn wan() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            max_reconnect_attempts: 20,
            pending_buffer_limit: 50,
            pending_buffer_ttl: Duration::from_secs(30),
        }
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the base reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the maximum reconnect delay
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Set the maximum reconnect attempts (0 = retry forever)
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the out-of-order buffer capacity (per channel)
    pub fn with_pending_buffer_limit(mut self, limit: usize) -> Self {
        self.pending_buffer_limit = limit;
        self
    }

    /// Set the out-of-order buffer maximum age
    pub fn with_pending_buffer_ttl(mut self, ttl: Duration) -> Self {
        self.pending_buffer_ttl = ttl;
        self
    }

    /// Backoff delay for the given attempt: base * 2^attempt, capped,
    /// plus up to 25% jitter
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_ms = self.reconnect_delay.as_millis() as u64;
        let cap_ms = self.max_reconnect_delay.as_millis() as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(20));
        let delay = exp.min(cap_ms);
        let jitter = if delay > 0 {
            rand::thread_rng().gen_range(0..=delay / 4)
        } else {
            0
        };
        Duration::from_millis(delay + jitter)
    }
}
