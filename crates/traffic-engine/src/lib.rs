//! Core engine of the pktgen traffic generator.
//!
//! Builds a population of randomized flows, materializes a flow-index sequence
//! drawn from a configurable distribution, and runs one lock-free transmit
//! worker per core, each pacing bursts of template-derived UDP/IPv4 frames
//! against a cycle-accurate rate budget while churning flows in place.

pub mod clock;
pub mod dist;
pub mod flows;
pub mod nic;
pub mod packet;
pub mod pcap;
pub mod profile;
pub mod rate;
pub mod rng;
pub mod runtime;
pub mod stats;
pub mod worker;

/// Packets transmitted per NIC call.
pub const BURST_SIZE: usize = 32;
/// TX descriptor ring depth the per-worker frame ring is dimensioned against.
pub const DESC_RING_SIZE: usize = 1024;
/// Pre-built frames per worker; a multiple of [`BURST_SIZE`] so burst windows
/// never wrap mid-burst.
pub const NUM_SAMPLE_PACKETS: usize = 2 * DESC_RING_SIZE;
/// Default output path for the one-shot flow dump.
pub const DEFAULT_FLOWS_FILE: &str = "flows.pcap";
/// Smallest flow population that still exercises churn.
pub const MIN_FLOWS_NUM: u32 = 2;

pub use dist::TrafficDist;
pub use flows::{Flow, FlowTable, KvsOp};
pub use nic::NicPort;
pub use profile::TrafficProfile;
pub use runtime::RuntimeConfig;
pub use stats::{PortStats, Stats};
pub use worker::TxWorker;
