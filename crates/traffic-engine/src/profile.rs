//! Static traffic profile fixed at startup.
//!
//! Everything an individual worker needs to know that never changes at
//! runtime lives here; the mutable knobs are in [`crate::runtime`].

use crate::dist::TrafficDist;

#[derive(Debug, Clone)]
pub struct TrafficProfile {
    pub seed: u64,
    pub num_flows: u32,
    pub dist: TrafficDist,
    pub zipf_param: f64,
    pub force_unique_flows: bool,
    /// On-wire frame size in bytes, CRC included.
    pub pkt_size: u64,
    pub kvs_mode: bool,
    pub kvs_get_ratio: f64,
    pub mark_warmup_packets: bool,
}
