//! Runtime control-plane state shared between the operator and the workers.
//!
//! [`RuntimeConfig`] is written by exactly one thread (the control surface)
//! and polled by every TX worker. Workers never take a lock: they watch the
//! generation counter with acquire ordering and re-read the remaining fields
//! only after observing a bump, so a writer storing fields relaxed and the
//! counter last (release) is sufficient to publish a consistent update.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Swapping a flow slot faster than the device-under-test can expire it
/// nullifies the churn entirely, so the derived per-flow TTL is floored at
/// this multiple of the DUT epoch.
pub const MIN_CHURN_ACTION_TIME_MULTIPLIER: u64 = 10;
/// Expiration epoch assumed for the device under test.
pub const EPOCH_TIME_NS: u64 = 100_000_000;

/// Single-writer, multi-reader runtime knobs.
pub struct RuntimeConfig {
    running: AtomicBool,
    update_cnt: AtomicU64,
    /// f64 bit pattern; per-core target rate in Gbps.
    rate_per_core: AtomicU64,
    flow_ttl_ns: AtomicU64,
}

/// Plain copy of the runtime fields, frozen at one generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeSnapshot {
    pub running: bool,
    pub update_cnt: u64,
    pub rate_per_core: f64,
    pub flow_ttl_ns: u64,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            update_cnt: AtomicU64::new(0),
            rate_per_core: AtomicU64::new(0f64.to_bits()),
            flow_ttl_ns: AtomicU64::new(0),
        }
    }

    /// Current generation. Readers compare this against their cached value
    /// and re-snapshot on divergence.
    #[inline]
    pub fn update_cnt(&self) -> u64 {
        self.update_cnt.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        let update_cnt = self.update_cnt();
        RuntimeSnapshot {
            running: self.running.load(Ordering::Relaxed),
            update_cnt,
            rate_per_core: f64::from_bits(self.rate_per_core.load(Ordering::Relaxed)),
            flow_ttl_ns: self.flow_ttl_ns.load(Ordering::Relaxed),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
        self.bump();
    }

    pub fn set_rate_per_core(&self, gbps: f64) {
        self.rate_per_core.store(gbps.to_bits(), Ordering::Relaxed);
        self.bump();
    }

    pub fn set_flow_ttl_ns(&self, ttl_ns: u64) {
        self.flow_ttl_ns.store(ttl_ns, Ordering::Relaxed);
        self.bump();
    }

    // The counter bump is the store the readers synchronize on; it must come
    // after the field store.
    fn bump(&self) {
        self.update_cnt.fetch_add(1, Ordering::Release);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-flow TTL derived from a churn rate in flows-per-minute over the whole
/// population. Zero churn disables flow replacement.
pub fn flow_ttl_from_churn(churn_fpm: u64, num_flows: u32) -> u64 {
    if churn_fpm == 0 {
        return 0;
    }
    let ttl = 60_000_000_000u128 * num_flows as u128 / churn_fpm as u128;
    let floor = MIN_CHURN_ACTION_TIME_MULTIPLIER * EPOCH_TIME_NS;
    if ttl < floor as u128 {
        tracing::warn!(
            requested_fpm = churn_fpm,
            floor_ns = floor,
            "churn rate exceeds what the DUT can expire; clamping flow TTL"
        );
        return floor;
    }
    ttl as u64
}

// ---------------------------------------------------------------------------
// Process-wide cancellation
// ---------------------------------------------------------------------------

static QUIT: AtomicBool = AtomicBool::new(false);

/// Request shutdown. Async-signal-safe: a plain atomic store.
pub fn request_quit() {
    QUIT.store(true, Ordering::SeqCst);
}

#[inline]
pub fn quit_requested() -> bool {
    QUIT.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_cnt_bumps_once_per_mutation() {
        let rt = RuntimeConfig::new();
        assert_eq!(rt.update_cnt(), 0);
        rt.set_running(true);
        assert_eq!(rt.update_cnt(), 1);
        rt.set_rate_per_core(2.5);
        assert_eq!(rt.update_cnt(), 2);
        rt.set_flow_ttl_ns(1_000_000);
        assert_eq!(rt.update_cnt(), 3);
        // No intervening command: stable.
        assert_eq!(rt.update_cnt(), 3);
    }

    #[test]
    fn test_snapshot_sees_settled_fields() {
        let rt = RuntimeConfig::new();
        rt.set_rate_per_core(5.0);
        rt.set_flow_ttl_ns(42);
        rt.set_running(true);
        let snap = rt.snapshot();
        assert!(snap.running);
        assert_eq!(snap.rate_per_core, 5.0);
        assert_eq!(snap.flow_ttl_ns, 42);
        assert_eq!(snap.update_cnt, 3);
    }

    #[test]
    fn test_flow_ttl_from_churn() {
        assert_eq!(flow_ttl_from_churn(0, 100), 0);
        // 100 flows at 100 fpm: every flow lives one minute.
        assert_eq!(flow_ttl_from_churn(100, 100), 60_000_000_000);
        // 60k fpm over 100 flows: 100ms per flow, below the 1s floor.
        assert_eq!(
            flow_ttl_from_churn(60_000, 100),
            MIN_CHURN_ACTION_TIME_MULTIPLIER * EPOCH_TIME_NS
        );
    }
}
