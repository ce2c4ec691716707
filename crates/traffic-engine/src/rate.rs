//! Rate-limit planner: target throughput to ticks-per-burst.

use crate::clock;
use crate::BURST_SIZE;

/// Preamble + inter-packet gap and CRC overhead that occupy the wire per
/// frame but are absent from the buffers we transmit.
const WIRE_OVERHEAD_BITS: u64 = (20 + 4) * 8;

/// Ticks one burst may occupy at `rate_gbps` with frames of `pkt_size_bits`
/// (on-wire frame size including CRC, in bits). Zero rate disables the
/// generator and yields a zero-length window.
pub fn ticks_per_burst(rate_gbps: f64, pkt_size_bits: u64) -> u64 {
    ticks_per_burst_scaled(rate_gbps, pkt_size_bits, clock::clock_scale())
}

/// Pure form, parameterized on the tick rate for testability.
pub fn ticks_per_burst_scaled(rate_gbps: f64, pkt_size_bits: u64, ticks_per_us: u64) -> u64 {
    if rate_gbps == 0.0 {
        return 0;
    }
    let eff_bits = pkt_size_bits + WIRE_OVERHEAD_BITS;
    let packets_per_us = rate_gbps * 1000.0 / eff_bits as f64;
    ((ticks_per_us * BURST_SIZE as u64) as f64 / packets_per_us) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE: u64 = 2_500; // 2.5 GHz TSC

    #[test]
    fn test_zero_rate_disables() {
        assert_eq!(ticks_per_burst_scaled(0.0, 64 * 8, SCALE), 0);
    }

    #[test]
    fn test_strictly_decreasing_in_rate() {
        let mut prev = u64::MAX;
        for rate in [1.0, 2.0, 5.0, 10.0, 40.0, 100.0] {
            let t = ticks_per_burst_scaled(rate, 64 * 8, SCALE);
            assert!(t > 0);
            assert!(t < prev, "rate {} did not shrink the window", rate);
            prev = t;
        }
    }

    #[test]
    fn test_halving_rate_doubles_window() {
        let full = ticks_per_burst_scaled(10.0, 64 * 8, SCALE);
        let half = ticks_per_burst_scaled(5.0, 64 * 8, SCALE);
        // Each value truncates independently, so allow a couple of ticks.
        assert!(half.abs_diff(2 * full) <= 2);
    }

    #[test]
    fn test_known_value() {
        // 64B frame + 24B overhead = 704 bits; 10 Gbps → 14.2 Mpps;
        // 2500 * 32 / (10*1000/704) = 80000 * 704 / 10000 = 5632.
        assert!(ticks_per_burst_scaled(10.0, 64 * 8, SCALE).abs_diff(5632) <= 1);
    }
}
