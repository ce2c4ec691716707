//! Flow-index distribution builder.
//!
//! Materializes the reference sequence of flow indices the TX workers cycle
//! through. Uniform traffic is the identity sequence; Zipfian traffic samples
//! a Newton-iteration inverse CDF of the continuous Zipf approximation until
//! every flow index has been seen at least once (or a draw cap is hit, which
//! is survivable: high-skew parameters may never reach the tail).

use crate::rng::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDist {
    Uniform,
    Zipf,
}

impl std::fmt::Display for TrafficDist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrafficDist::Uniform => write!(f, "uniform"),
            TrafficDist::Zipf => write!(f, "zipf"),
        }
    }
}

/// Draw cap: give up on full coverage after this many samples per flow.
const MAX_DRAWS_PER_FLOW: u64 = 1000;
/// Newton iteration tolerance on the rank estimate.
const NEWTON_TOLERANCE: f64 = 0.01;

pub fn generate_flow_idx_sequence(
    dist: TrafficDist,
    num_flows: u32,
    zipf_param: f64,
    rng: &mut Rng,
) -> Vec<u32> {
    match dist {
        TrafficDist::Uniform => generate_uniform(num_flows),
        TrafficDist::Zipf => generate_zipf(num_flows, zipf_param, rng),
    }
}

fn generate_uniform(num_flows: u32) -> Vec<u32> {
    (0..num_flows).collect()
}

fn generate_zipf(num_flows: u32, zipf_param: f64, rng: &mut Rng) -> Vec<u32> {
    // The inverse CDF divides by (1 - s) and by log-like terms that vanish at
    // s = 0 and s = 1; nudge off the poles rather than reject.
    let s = if zipf_param == 0.0 || zipf_param == 1.0 {
        zipf_param + 1e-12
    } else {
        zipf_param
    };

    let cap = MAX_DRAWS_PER_FLOW * num_flows as u64;
    let mut seen = vec![false; num_flows as usize];
    let mut covered = 0u32;
    let mut seq = Vec::with_capacity(num_flows as usize);

    let mut draws = 0u64;
    while covered < num_flows {
        if draws == cap {
            tracing::warn!(
                covered,
                num_flows,
                draws,
                "zipf sampler did not reach every flow; continuing with partial coverage"
            );
            break;
        }
        let idx = zipf_sample(rng.next_f64(), num_flows, s);
        draws += 1;
        if !seen[idx as usize] {
            seen[idx as usize] = true;
            covered += 1;
        }
        // Every draw is kept, duplicates included: the sequence is the
        // distribution, not a permutation.
        seq.push(idx);
    }
    seq
}

/// One inverse-CDF sample: probability `p ∈ [0,1)` to a zero-based flow index.
///
/// Newton iteration over the continuous approximation of the Zipf CDF with
/// parameter `s`; the caller must have nudged `s` off `{0, 1}`.
pub fn zipf_sample(p: f64, total_flows: u32, s: f64) -> u32 {
    let n = (total_flows + 1) as f64;
    let d = p
        * (12.0 * (n.powf(1.0 - s) - 1.0) / (1.0 - s) + 6.0 - 6.0 * n.powf(-s) + s
            - n.powf(-1.0 - s) * s);

    let mut x = n / 2.0;
    for _ in 0..256 {
        let m = x.powf(-2.0 - s);
        let mx = m * x; // x^(-1-s)
        let mxx = mx * x; // x^(-s)
        let mxxx = mxx * x; // x^(1-s)

        let a = 12.0 * (mxxx - 1.0) / (1.0 - s) + 6.0 * (1.0 - mxx) + (s - mx * s) - d;
        let b = 12.0 * mxx + 6.0 * (s * mx) + m * s * (s + 1.0);
        let newx = (x - a / b).max(1.0);

        if (newx - x).abs() <= NEWTON_TOLERANCE {
            x = newx;
            break;
        }
        x = newx;
    }

    let idx = (x - 1.0) as u32;
    idx.min(total_flows - 1)
}

/// Round-robin striping of the global sequence across workers; order within
/// each stripe is preserved and stripe lengths differ by at most one.
pub fn stripe_per_worker(seq: &[u32], num_tx_cores: u16) -> Vec<Vec<u32>> {
    let cores = num_tx_cores as usize;
    let mut stripes: Vec<Vec<u32>> = (0..cores)
        .map(|_| Vec::with_capacity(seq.len() / cores + 1))
        .collect();
    for (i, &idx) in seq.iter().enumerate() {
        stripes[i % cores].push(idx);
    }
    stripes
}

/// CDF of the traffic share of the hottest flows, one row per ~10% of mass.
/// Feed for the operator's `dist` command.
pub fn cdf_lines(seq: &[u32], num_flows: u32) -> Vec<String> {
    let mut counts = vec![0u64; num_flows as usize];
    for &idx in seq {
        counts[idx as usize] += 1;
    }
    counts.sort_unstable_by(|a, b| b.cmp(a));
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return Vec::new();
    }

    let mut lines = Vec::new();
    let mut cumulative = 0u64;
    let mut last_printed = 0.0;
    for (i, &count) in counts.iter().enumerate() {
        cumulative += count;
        let cdf = cumulative as f64 / total as f64;
        if i == 0 || cdf >= last_printed + 0.1 || i == counts.len() - 1 {
            let flows = i + 1;
            let flows_pct = flows as f64 / num_flows as f64 * 100.0;
            lines.push(format!("{:8} {:7.2}% : {:7.2}%", flows, flows_pct, cdf * 100.0));
            last_printed = cdf;
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uniform_is_identity() {
        let mut rng = Rng::from_seed(1);
        let seq = generate_flow_idx_sequence(TrafficDist::Uniform, 5, 1.26, &mut rng);
        assert_eq!(seq, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zipf_covers_all_indices() {
        let mut rng = Rng::from_seed(1);
        let num_flows = 100;
        let seq = generate_flow_idx_sequence(TrafficDist::Zipf, num_flows, 1.26, &mut rng);
        let distinct: HashSet<u32> = seq.iter().copied().collect();
        assert_eq!(distinct.len(), num_flows as usize);
        assert!(seq.len() as u64 <= MAX_DRAWS_PER_FLOW * num_flows as u64);
        assert!(seq.iter().all(|&i| i < num_flows));
    }

    #[test]
    fn test_zipf_head_is_hot() {
        let mut rng = Rng::from_seed(7);
        let seq = generate_flow_idx_sequence(TrafficDist::Zipf, 50, 1.26, &mut rng);
        let head = seq.iter().filter(|&&i| i == 0).count();
        let tail = seq.iter().filter(|&&i| i == 49).count();
        assert!(head > tail);
    }

    #[test]
    fn test_zipf_sample_boundaries() {
        // p = 0 lands on the hottest rank.
        assert_eq!(zipf_sample(0.0, 100, 1.26), 0);
        // Every sample is in range even at the far end of [0, 1).
        for p in [0.0, 0.25, 0.5, 0.9, 0.999999] {
            assert!(zipf_sample(p, 100, 1.26) < 100);
        }
    }

    #[test]
    fn test_zipf_pole_nudge() {
        // s exactly 0 and 1 must not produce NaN or panic.
        let mut rng = Rng::from_seed(11);
        for s in [0.0, 1.0] {
            let seq = generate_flow_idx_sequence(TrafficDist::Zipf, 10, s, &mut rng);
            assert!(!seq.is_empty());
            assert!(seq.iter().all(|&i| i < 10));
        }
    }

    #[test]
    fn test_stripe_round_robin() {
        let seq = vec![0u32, 1, 2, 3];
        let stripes = stripe_per_worker(&seq, 2);
        assert_eq!(stripes, vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn test_stripe_skew_at_most_one() {
        let seq: Vec<u32> = (0..103).collect();
        let stripes = stripe_per_worker(&seq, 4);
        let total: usize = stripes.iter().map(Vec::len).sum();
        assert_eq!(total, 103);
        let min = stripes.iter().map(Vec::len).min().unwrap();
        let max = stripes.iter().map(Vec::len).max().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn test_stripe_positions_match_worker() {
        let seq: Vec<u32> = (0..10).map(|i| i * 7 % 5).collect();
        let stripes = stripe_per_worker(&seq, 3);
        for (w, stripe) in stripes.iter().enumerate() {
            for (k, &idx) in stripe.iter().enumerate() {
                assert_eq!(seq[w + k * 3], idx);
            }
        }
    }

    #[test]
    fn test_cdf_lines_uniform() {
        let seq: Vec<u32> = (0..100).collect();
        let lines = cdf_lines(&seq, 100);
        assert!(!lines.is_empty());
        // Last row accounts for all traffic.
        assert!(lines.last().unwrap().contains("100.00%"));
    }
}
