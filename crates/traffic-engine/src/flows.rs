//! Flow population: generation, identity, in-place churn, KVS op plans.
//!
//! The table owns `num_flows` slots for the lifetime of the process. Slots
//! store their fields in per-field atomics so the churn path can replace a
//! flow in place while the display/pcap paths read concurrently, without any
//! lock near the send loop. Slot ownership follows the index stripes: only
//! the worker whose stripe contains an index replaces that slot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering::Relaxed};

use crate::profile::TrafficProfile;
use crate::rng::Rng;

/// A single randomized packet identity. The 4-tuple view and the KVS view
/// coexist so switching modes costs no allocation; which fields participate
/// in equality depends on the mode.
///
/// Address and port values hold the network-order wire words: serializing a
/// field is `to_be_bytes`, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub kvs_key: u32,
    pub kvs_value: u32,
}

impl Flow {
    fn random(rng: &mut Rng) -> Self {
        Self {
            src_ip: rng.next_u32(),
            dst_ip: rng.next_u32(),
            src_port: rng.next_u16(),
            dst_port: rng.next_u16(),
            kvs_key: rng.next_u32(),
            kvs_value: rng.next_u32(),
        }
    }

    /// Mode-specific identity projection: the KVS key alone in KVS mode, the
    /// 4-tuple otherwise.
    fn identity(&self, kvs_mode: bool) -> u128 {
        if kvs_mode {
            self.kvs_key as u128
        } else {
            (self.src_ip as u128) << 64
                | (self.dst_ip as u128) << 32
                | (self.src_port as u128) << 16
                | self.dst_port as u128
        }
    }

    /// Operator-facing rendering: `a.b.c.d:p -> a.b.c.d:p`, or the key in
    /// KVS mode.
    pub fn display(&self, kvs_mode: bool) -> String {
        if kvs_mode {
            format!("0x{:08x}", self.kvs_key)
        } else {
            let s = self.src_ip.to_be_bytes();
            let d = self.dst_ip.to_be_bytes();
            format!(
                "{}.{}.{}.{}:{} -> {}.{}.{}.{}:{}",
                s[0], s[1], s[2], s[3], self.src_port, d[0], d[1], d[2], d[3], self.dst_port
            )
        }
    }
}

struct FlowSlot {
    src_ip: AtomicU32,
    dst_ip: AtomicU32,
    src_port: AtomicU16,
    dst_port: AtomicU16,
    kvs_key: AtomicU32,
    kvs_value: AtomicU32,
}

impl FlowSlot {
    fn new(flow: Flow) -> Self {
        Self {
            src_ip: AtomicU32::new(flow.src_ip),
            dst_ip: AtomicU32::new(flow.dst_ip),
            src_port: AtomicU16::new(flow.src_port),
            dst_port: AtomicU16::new(flow.dst_port),
            kvs_key: AtomicU32::new(flow.kvs_key),
            kvs_value: AtomicU32::new(flow.kvs_value),
        }
    }

    fn load(&self) -> Flow {
        Flow {
            src_ip: self.src_ip.load(Relaxed),
            dst_ip: self.dst_ip.load(Relaxed),
            src_port: self.src_port.load(Relaxed),
            dst_port: self.dst_port.load(Relaxed),
            kvs_key: self.kvs_key.load(Relaxed),
            kvs_value: self.kvs_value.load(Relaxed),
        }
    }

    fn store(&self, flow: Flow) {
        self.src_ip.store(flow.src_ip, Relaxed);
        self.dst_ip.store(flow.dst_ip, Relaxed);
        self.src_port.store(flow.src_port, Relaxed);
        self.dst_port.store(flow.dst_port, Relaxed);
        self.kvs_key.store(flow.kvs_key, Relaxed);
        self.kvs_value.store(flow.kvs_value, Relaxed);
    }
}

pub struct FlowTable {
    slots: Vec<FlowSlot>,
    kvs_mode: bool,
}

impl FlowTable {
    /// Populate `num_flows` records. Without `force_unique_flows` every slot
    /// is an independent draw with no deduplication, the fast path. With it, a
    /// rejection loop keyed on the mode-specific identity fills the table
    /// with pairwise-distinct flows.
    pub fn generate(profile: &TrafficProfile, rng: &mut Rng) -> Self {
        let num_flows = profile.num_flows as usize;
        tracing::info!(num_flows, "generating flows");

        let mut slots = Vec::with_capacity(num_flows);
        if !profile.force_unique_flows {
            for _ in 0..num_flows {
                slots.push(FlowSlot::new(Flow::random(rng)));
            }
            return Self { slots, kvs_mode: profile.kvs_mode };
        }

        let mut seen: HashSet<u128> = HashSet::with_capacity(num_flows);
        while seen.len() != num_flows {
            let flow = Flow::random(rng);
            // Collisions are unlikely at these population sizes, but the
            // table must be distinct under the mode's equality.
            if !seen.insert(flow.identity(profile.kvs_mode)) {
                continue;
            }
            slots.push(FlowSlot::new(flow));
        }
        Self { slots, kvs_mode: profile.kvs_mode }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn kvs_mode(&self) -> bool {
        self.kvs_mode
    }

    #[inline]
    pub fn load(&self, idx: usize) -> Flow {
        self.slots[idx].load()
    }

    /// Replace slot `idx` with a fresh draw. Uniqueness is not preserved once
    /// churn starts; only the initial population guarantees it.
    #[inline]
    pub fn randomize_flow(&self, idx: usize, rng: &mut Rng) {
        self.slots[idx].store(Flow::random(rng));
    }

    pub fn iter_loaded(&self) -> impl Iterator<Item = Flow> + '_ {
        self.slots.iter().map(FlowSlot::load)
    }
}

// ---------------------------------------------------------------------------
// KVS op plan
// ---------------------------------------------------------------------------

/// Wire opcodes of the tiny key-value-store request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KvsOp {
    Get = 0,
    Put = 1,
    Del = 2,
}

impl KvsOp {
    #[inline]
    pub fn wire(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KvsStatus {
    Miss = 0,
    Hit = 1,
}

/// Convert the GET ratio into an integral `get:put` pair by repeated ×10,
/// then reduce. Non-terminating fractions are cut off after six digits.
fn kvs_ratio_split(get_ratio: f64) -> (u64, u64) {
    let mut total: u64 = 1;
    let mut get = get_ratio;
    let mut digits = 0;
    while get.fract() != 0.0 && digits < 6 {
        total *= 10;
        get *= 10.0;
        digits += 1;
    }
    if get.fract() != 0.0 {
        tracing::warn!(get_ratio, "kvs get ratio is not expressible in six digits; rounding");
    }
    let get = (get.round() as u64).min(total);
    let put = total - get;

    let d = gcd(get, put);
    (get / d, put / d)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

/// Per-flow operation rotation: `get` GETs followed by `put` PUTs. Workers
/// advance an independent cursor per flow.
pub fn generate_kvs_ops_per_flow(num_flows: u32, get_ratio: f64) -> Vec<Vec<KvsOp>> {
    let (get, put) = kvs_ratio_split(get_ratio);
    let mut plan = Vec::with_capacity((get + put) as usize);
    plan.extend(std::iter::repeat(KvsOp::Get).take(get as usize));
    plan.extend(std::iter::repeat(KvsOp::Put).take(put as usize));
    (0..num_flows).map(|_| plan.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::TrafficDist;

    fn profile(num_flows: u32, unique: bool, kvs: bool) -> TrafficProfile {
        TrafficProfile {
            seed: 1,
            num_flows,
            dist: TrafficDist::Uniform,
            zipf_param: 1.26,
            force_unique_flows: unique,
            pkt_size: 64,
            kvs_mode: kvs,
            kvs_get_ratio: 0.0,
            mark_warmup_packets: false,
        }
    }

    #[test]
    fn test_generate_exact_population() {
        let mut rng = Rng::from_seed(1);
        let table = FlowTable::generate(&profile(1000, false, false), &mut rng);
        assert_eq!(table.len(), 1000);
    }

    #[test]
    fn test_unique_flows_distinct_by_tuple() {
        let mut rng = Rng::from_seed(1);
        let table = FlowTable::generate(&profile(500, true, false), &mut rng);
        let idents: HashSet<u128> =
            table.iter_loaded().map(|f| f.identity(false)).collect();
        assert_eq!(idents.len(), 500);
    }

    #[test]
    fn test_unique_flows_distinct_by_key_in_kvs_mode() {
        let mut rng = Rng::from_seed(1);
        let table = FlowTable::generate(&profile(500, true, true), &mut rng);
        let keys: HashSet<u32> = table.iter_loaded().map(|f| f.kvs_key).collect();
        assert_eq!(keys.len(), 500);
    }

    #[test]
    fn test_generation_is_reproducible() {
        let mut a = Rng::from_seed(9);
        let mut b = Rng::from_seed(9);
        let ta = FlowTable::generate(&profile(64, true, false), &mut a);
        let tb = FlowTable::generate(&profile(64, true, false), &mut b);
        assert!(ta.iter_loaded().zip(tb.iter_loaded()).all(|(x, y)| x == y));
    }

    #[test]
    fn test_randomize_flow_replaces_slot() {
        let mut rng = Rng::from_seed(1);
        let table = FlowTable::generate(&profile(4, false, false), &mut rng);
        let before = table.load(2);
        table.randomize_flow(2, &mut rng);
        assert_ne!(table.load(2), before);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_display_shapes() {
        let flow = Flow {
            src_ip: 0x0a000001,
            dst_ip: 0xc0a80102,
            src_port: 1234,
            dst_port: 80,
            kvs_key: 0xdeadbeef,
            kvs_value: 0,
        };
        assert_eq!(flow.display(false), "10.0.0.1:1234 -> 192.168.1.2:80");
        assert_eq!(flow.display(true), "0xdeadbeef");
    }

    #[test]
    fn test_kvs_op_wire_values() {
        assert_eq!(KvsOp::Get.wire(), 0);
        assert_eq!(KvsOp::Put.wire(), 1);
        assert_eq!(KvsOp::Del.wire(), 2);
        assert_eq!(KvsStatus::Miss as u8, 0);
        assert_eq!(KvsStatus::Hit as u8, 1);
    }

    #[test]
    fn test_kvs_plan_seventy_thirty() {
        let plans = generate_kvs_ops_per_flow(2, 0.7);
        assert_eq!(plans.len(), 2);
        for plan in &plans {
            assert_eq!(plan.len(), 10);
            assert!(plan[..7].iter().all(|&op| op == KvsOp::Get));
            assert!(plan[7..].iter().all(|&op| op == KvsOp::Put));
        }
    }

    #[test]
    fn test_kvs_plan_boundaries() {
        let all_put = &generate_kvs_ops_per_flow(1, 0.0)[0];
        assert_eq!(all_put, &vec![KvsOp::Put]);

        let all_get = &generate_kvs_ops_per_flow(1, 1.0)[0];
        assert_eq!(all_get, &vec![KvsOp::Get]);

        let half = &generate_kvs_ops_per_flow(1, 0.5)[0];
        assert_eq!(half, &vec![KvsOp::Get, KvsOp::Put]);
    }
}
