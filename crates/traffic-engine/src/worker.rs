//! Per-core transmit worker: the hot loop.
//!
//! Each worker owns its TX queue, its stripe of the flow-index sequence, a
//! ring of pre-built frames, and every piece of derived timing state. The
//! only shared reads in steady state are the runtime generation counter and
//! the flow slots; there is no lock anywhere a packet passes through.
//!
//! Pacing: each iteration stamps and transmits one burst, then busy-spins on
//! the tick counter until the rate-limit window closes. Churn: every flow
//! carries a next-replacement tick; when the window start passes it, the
//! timer is bumped additively (keeping the churn rate accurate under drift)
//! and the slot is re-randomized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::{self, Ticks};
use crate::flows::{generate_kvs_ops_per_flow, FlowTable};
use crate::nic::NicPort;
use crate::packet::{generate_template_packet, modify_packet, ETHER_CRC_LEN};
use crate::profile::TrafficProfile;
use crate::rate;
use crate::rng::Rng;
use crate::runtime::RuntimeConfig;
use crate::{BURST_SIZE, NUM_SAMPLE_PACKETS};

pub struct TxWorker {
    pub queue_id: u16,
    /// This worker's stripe of the global flow-index sequence.
    pub flow_idx_seq: Vec<u32>,
    pub flows: Arc<FlowTable>,
    pub profile: Arc<TrafficProfile>,
    pub runtime: Arc<RuntimeConfig>,
    pub port: Arc<dyn NicPort>,
    pub quit: Arc<AtomicBool>,
    /// Flipped true once the frame ring is built and the clock calibrated.
    pub ready: Arc<AtomicBool>,
    /// Read per burst; combined with the profile's marking flag.
    pub warmup_active: Arc<AtomicBool>,
    pub rng: Rng,
}

impl TxWorker {
    /// Spawn on a named thread, optionally pinned to `core`.
    pub fn spawn(self, core: Option<usize>) -> std::thread::JoinHandle<()> {
        let name = format!("tx-{}", self.queue_id);
        std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                if let Some(core) = core {
                    pin_to_core(core);
                }
                self.run();
            })
            .expect("failed to spawn tx worker")
    }

    pub fn run(mut self) {
        let num_flows = self.flows.len();
        let pkt_size = self.profile.pkt_size;
        let frame_len = (pkt_size - ETHER_CRC_LEN) as usize;
        let kvs_mode = self.profile.kvs_mode;
        let mark_warmup = self.profile.mark_warmup_packets;
        let seq_len = self.flow_idx_seq.len();

        let kvs_ops_per_flow =
            generate_kvs_ops_per_flow(num_flows as u32, self.profile.kvs_get_ratio);
        let ops_per_flow = kvs_ops_per_flow[0].len();

        let mut template = vec![0u8; frame_len];
        generate_template_packet(&mut template, kvs_mode);

        // Frame ring, prefilled from the template. Frames are never handed
        // back to any pool: the same buffers are rewritten and re-sent for
        // the life of the worker.
        let mut frames: Vec<Box<[u8]>> = (0..NUM_SAMPLE_PACKETS)
            .map(|_| template.clone().into_boxed_slice())
            .collect();

        // Absorb the up-to-a-second calibration before declaring ready.
        let ticks_per_us = clock::clock_scale();

        self.ready.store(true, Ordering::Release);
        self.wait_to_start();

        let mut snap = self.runtime.snapshot();
        let mut last_update_cnt = snap.update_cnt;
        let mut ticks_per_burst = rate::ticks_per_burst(snap.rate_per_core, pkt_size * 8);

        let first_tick = clock::now();
        let mut period_start_tick = first_tick;

        let mut flow_ticks = ttl_to_ticks(snap.flow_ttl_ns, ticks_per_us);
        let mut flow_ticks_offset_inc = flow_ticks / num_flows as u64;

        // Stagger the initial churn deadlines so replacement is spread over
        // the TTL instead of arriving as one burst.
        let mut flows_timers: Vec<Ticks> = (0..num_flows as u64)
            .map(|i| first_tick + i * flow_ticks_offset_inc)
            .collect();
        let mut chosen_kvs_op_idxs = vec![0usize; num_flows];

        let mut flow_idx_counter = 0usize;
        let mut burst_offset = 0usize;
        let mut num_total_tx = 0u64;

        while !self.quit.load(Ordering::Relaxed) {
            // Runtime generation changed: park if stopped, then recompute
            // all derived timing state from a fresh snapshot.
            if self.runtime.update_cnt() != last_update_cnt {
                self.wait_to_start();
                if self.quit.load(Ordering::Relaxed) {
                    break;
                }
                snap = self.runtime.snapshot();
                last_update_cnt = snap.update_cnt;
                ticks_per_burst = rate::ticks_per_burst(snap.rate_per_core, pkt_size * 8);
                flow_ticks = ttl_to_ticks(snap.flow_ttl_ns, ticks_per_us);
                flow_ticks_offset_inc = flow_ticks / num_flows as u64;

                let restart_tick = clock::now();
                for (i, timer) in flows_timers.iter_mut().enumerate() {
                    *timer = restart_tick + i as u64 * flow_ticks_offset_inc;
                }
            }

            let period_end_tick = period_start_tick + ticks_per_burst;

            let window = burst_offset..burst_offset + BURST_SIZE;
            for (i, frame) in frames[window.clone()].iter_mut().enumerate() {
                let flow_idx =
                    self.flow_idx_seq[(flow_idx_counter + i) % seq_len] as usize;

                let op_idx = &mut chosen_kvs_op_idxs[flow_idx];
                let op = kvs_ops_per_flow[flow_idx][*op_idx];
                *op_idx = (*op_idx + 1) % ops_per_flow;

                if flow_ticks > 0 && period_start_tick >= flows_timers[flow_idx] {
                    flows_timers[flow_idx] += flow_ticks;
                    self.flows.randomize_flow(flow_idx, &mut self.rng);
                }

                let flow = self.flows.load(flow_idx);
                let warmup = mark_warmup && self.warmup_active.load(Ordering::Relaxed);
                modify_packet(frame, &flow, op, kvs_mode, warmup);
            }

            let mut refs: [&[u8]; BURST_SIZE] = [&[]; BURST_SIZE];
            for (r, frame) in refs.iter_mut().zip(&frames[window]) {
                *r = frame;
            }
            num_total_tx += self.port.tx_burst(self.queue_id, &refs) as u64;

            flow_idx_counter = (flow_idx_counter + BURST_SIZE) % seq_len;
            burst_offset = (burst_offset + BURST_SIZE) % NUM_SAMPLE_PACKETS;

            // Close the rate-limit window.
            loop {
                period_start_tick = clock::now();
                if period_start_tick >= period_end_tick {
                    break;
                }
                std::hint::spin_loop();
            }
        }

        tracing::debug!(queue = self.queue_id, packets = num_total_tx, "tx worker stopped");
    }

    /// Park until the runtime says go (`running` with a nonzero rate), or
    /// shutdown. Polls politely; this never runs inside the send loop.
    fn wait_to_start(&self) {
        let mut last_cnt = self.runtime.update_cnt();
        while !self.quit.load(Ordering::Relaxed) {
            let snap = self.runtime.snapshot();
            if snap.running && snap.rate_per_core > 0.0 {
                break;
            }
            while self.runtime.update_cnt() == last_cnt && !self.quit.load(Ordering::Relaxed)
            {
                clock::sleep_ms(100);
            }
            last_cnt = self.runtime.update_cnt();
        }
    }
}

fn ttl_to_ticks(flow_ttl_ns: u64, ticks_per_us: u64) -> u64 {
    (flow_ttl_ns as u128 * ticks_per_us as u128 / 1000) as u64
}

fn pin_to_core(core_id: usize) {
    #[cfg(target_os = "linux")]
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = core_id;
}
