//! Statistics counters: plain atomics, no locking. Every counter is
//! monotonically non-decreasing within a run; a `reload` never resets them.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Live counters. Fields map 1:1 onto the [`StatisticsSnapshot`] returned by
/// [`Statistics::snapshot`].
#[derive(Default)]
pub struct Statistics {
    pub discover: Counter,
    pub offer: Counter,
    pub request: Counter,
    pub decline: Counter,
    pub release: Counter,
    pub inform: Counter,
    pub ack: Counter,
    pub nak: Counter,
    pub dropped: Counter,
    pub malformed: Counter,
    pub pool_exhausted: Counter,
    pub deny_snooping: Counter,
    pub deny_mac_filter: Counter,
    pub deny_ip_filter: Counter,
    pub deny_rate_limit: Counter,
    pub deny_option82: Counter,
    pub deny_authentication: Counter,
    pub persistence_write_failures: Counter,
    pub persistence_load_failures: Counter,
}

/// Point-in-time copy of [`Statistics`], returned by `get_statistics()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatisticsSnapshot {
    pub discover: u64,
    pub offer: u64,
    pub request: u64,
    pub decline: u64,
    pub release: u64,
    pub inform: u64,
    pub ack: u64,
    pub nak: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub pool_exhausted: u64,
    pub deny_snooping: u64,
    pub deny_mac_filter: u64,
    pub deny_ip_filter: u64,
    pub deny_rate_limit: u64,
    pub deny_option82: u64,
    pub deny_authentication: u64,
    pub persistence_write_failures: u64,
    pub persistence_load_failures: u64,
}

impl Statistics {
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            discover: self.discover.get(),
            offer: self.offer.get(),
            request: self.request.get(),
            decline: self.decline.get(),
            release: self.release.get(),
            inform: self.inform.get(),
            ack: self.ack.get(),
            nak: self.nak.get(),
            dropped: self.dropped.get(),
            malformed: self.malformed.get(),
            pool_exhausted: self.pool_exhausted.get(),
            deny_snooping: self.deny_snooping.get(),
            deny_mac_filter: self.deny_mac_filter.get(),
            deny_ip_filter: self.deny_ip_filter.get(),
            deny_rate_limit: self.deny_rate_limit.get(),
            deny_option82: self.deny_option82.get(),
            deny_authentication: self.deny_authentication.get(),
            persistence_write_failures: self.persistence_write_failures.get(),
            persistence_load_failures: self.persistence_load_failures.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let stats = Statistics::default();
        stats.discover.inc();
        stats.discover.inc();
        assert_eq!(stats.snapshot().discover, 2);
    }
}
