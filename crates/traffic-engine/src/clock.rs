//! Cycle-granularity timekeeping for the rate-limit window.
//!
//! A tick is a free-running monotonic counter: the TSC on x86_64, a
//! `CLOCK_MONOTONIC_RAW` nanosecond count elsewhere (immune to NTP slew, the
//! same source the receive path timestamps against). [`clock_scale`]
//! calibrates ticks-per-microsecond once and caches the result; the hot loop
//! only ever pays for [`now`].

use std::sync::OnceLock;
use std::time::Duration;

pub type Ticks = u64;

/// Current tick of the free-running counter.
#[inline(always)]
pub fn now() -> Ticks {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
    #[cfg(not(target_arch = "x86_64"))]
    mono_ns()
}

/// Nanoseconds from the OS monotonic clock; calibration reference only.
#[inline]
fn mono_ns() -> u64 {
    #[cfg(target_os = "linux")]
    {
        let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::time::Instant;
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}

/// Ticks per microsecond.
///
/// The first call blocks for a fraction of a second to measure the tick rate
/// against the OS monotonic clock; every later call returns the cached value.
/// Workers invoke this once during initialization, before signalling ready,
/// so the calibration pause never lands inside the send loop.
pub fn clock_scale() -> u64 {
    static SCALE: OnceLock<u64> = OnceLock::new();
    *SCALE.get_or_init(calibrate)
}

const CALIBRATION_WINDOW: Duration = Duration::from_millis(100);

fn calibrate() -> u64 {
    let t0 = now();
    let ns0 = mono_ns();
    std::thread::sleep(CALIBRATION_WINDOW);
    let ticks = now().wrapping_sub(t0);
    let ns = mono_ns().saturating_sub(ns0).max(1);
    ((ticks as u128 * 1_000) / ns as u128).max(1) as u64
}

/// Polite wait used outside the send loop (start gate, link polling).
pub fn sleep_ms(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_is_cached_and_positive() {
        let a = clock_scale();
        let b = clock_scale();
        assert!(a >= 1);
        assert_eq!(a, b);
    }

    #[test]
    fn test_now_advances() {
        let a = now();
        std::thread::sleep(Duration::from_millis(1));
        let b = now();
        assert!(b > a);
    }
}
