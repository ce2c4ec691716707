//! pktgen: multi-core UDP/IPv4 traffic generator.
//!
//! Synthesizes a controlled flow population over a raw-socket transmit path,
//! one pinned worker per TX core, with runtime rate/churn control from an
//! interactive CLI. Run `pktgen --help` for usage.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;
mod control;

use cli::{Cli, Ports};
use traffic_engine::clock::sleep_ms;
use traffic_engine::nic::{self, NicPort};
use traffic_engine::rng::Rng;
use traffic_engine::runtime::{quit_requested, request_quit, RuntimeConfig};
use traffic_engine::{dist, pcap, FlowTable, TrafficProfile, TxWorker, DEFAULT_FLOWS_FILE};

extern "C" fn handle_signal(_: libc::c_int) {
    request_quit();
}

fn install_signal_handlers() {
    unsafe {
        let handler = handle_signal as *const () as libc::sighandler_t;
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGQUIT, handler);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    install_signal_handlers();

    let devices = nic::available_devices();
    let nb_cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let (profile, ports) = cli.build_profile(devices.len(), nb_cores)?;
    let profile = Arc::new(profile);
    print_config(&profile, &ports, &devices);

    let (tx_port, rx_port, rx_counter) = open_ports(&ports, &devices)?;

    // Build-time artifacts all draw from the root seed so a run is
    // reproducible end to end.
    let mut rng = Rng::from_seed(profile.seed);
    let flows = Arc::new(FlowTable::generate(&profile, &mut rng));

    info!("generating distribution of flow indexes");
    let flow_idx_seq = Arc::new(dist::generate_flow_idx_sequence(
        profile.dist,
        profile.num_flows,
        profile.zipf_param,
        &mut rng,
    ));
    let stripes = dist::stripe_per_worker(&flow_idx_seq, ports.num_tx_cores);

    if cli.dump_flows_to_file {
        pcap::dump_flows(Path::new(DEFAULT_FLOWS_FILE), &flows, profile.pkt_size)?;
    }

    let runtime = Arc::new(RuntimeConfig::new());
    let warmup_active = Arc::new(AtomicBool::new(false));
    let worker_quit = Arc::new(AtomicBool::new(false));

    let mut ready_flags = Vec::with_capacity(stripes.len());
    let mut workers = Vec::with_capacity(stripes.len());
    for (i, stripe) in stripes.into_iter().enumerate() {
        let ready = Arc::new(AtomicBool::new(false));
        ready_flags.push(ready.clone());
        let worker = TxWorker {
            queue_id: i as u16,
            flow_idx_seq: stripe,
            flows: flows.clone(),
            profile: profile.clone(),
            runtime: runtime.clone(),
            port: tx_port.clone(),
            quit: worker_quit.clone(),
            ready,
            warmup_active: warmup_active.clone(),
            rng: Rng::for_worker(profile.seed, i as u16),
        };
        // Core 0 stays with the main thread; workers take the next cores.
        workers.push(worker.spawn(Some(i + 1)));
    }

    info!("waiting for workers");
    for ready in &ready_flags {
        while !ready.load(Ordering::Acquire) && !quit_requested() {
            sleep_ms(100);
        }
    }

    wait_port_up(rx_port.as_ref());
    wait_port_up(tx_port.as_ref());

    let mut plane = control::ControlPlane {
        runtime,
        profile: profile.clone(),
        flows,
        flow_idx_seq,
        tx_port,
        rx_port,
        num_tx_cores: ports.num_tx_cores,
        warmup: control::Warmup::new(cli.warmup_duration, cli.warmup_rate, warmup_active),
    };

    if cli.test {
        plane.run_test()?;
    } else {
        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(16);
        control::spawn_command_reader(cmd_tx);
        plane.run_interactive(cmd_rx);
    }

    request_quit();
    worker_quit.store(true, Ordering::SeqCst);
    info!("waiting for workers to finish");
    for handle in workers {
        let _ = handle.join();
    }
    if let Some(handle) = rx_counter {
        let _ = handle.join();
    }

    Ok(())
}

fn print_config(profile: &TrafficProfile, ports: &Ports, devices: &[String]) {
    info!("----- Config -----");
    info!("RX port:          {} ({})", ports.rx, devices[ports.rx as usize]);
    info!("TX port:          {} ({})", ports.tx, devices[ports.tx as usize]);
    info!("TX cores:         {}", ports.num_tx_cores);
    info!("Random seed:      {}", profile.seed);
    info!("Flows:            {}", profile.num_flows);
    info!("Traffic dist:     {}", profile.dist);
    info!("Zipf param:       {}", profile.zipf_param);
    info!("Unique flows:     {}", profile.force_unique_flows);
    info!("Packet size:      {} bytes", profile.pkt_size);
    info!("Mark warmup pkts: {}", profile.mark_warmup_packets);
    info!("KVS mode:         {}", profile.kvs_mode);
    info!("KVS get ratio:    {}", profile.kvs_get_ratio);
    info!("------------------");
}

/// Open the TX and RX ports and start the RX counter thread. A shared index
/// means one port serves both roles.
#[allow(clippy::type_complexity)]
fn open_ports(
    ports: &Ports,
    devices: &[String],
) -> Result<(Arc<dyn NicPort>, Arc<dyn NicPort>, Option<std::thread::JoinHandle<()>>)> {
    #[cfg(target_os = "linux")]
    {
        use traffic_engine::nic::AfPacketPort;

        let tx_name = &devices[ports.tx as usize];
        let tx = AfPacketPort::open(tx_name, ports.num_tx_cores)
            .with_context(|| format!("cannot init tx port {}", ports.tx))?;
        let (rx, handle) = if ports.rx == ports.tx {
            let handle = tx.spawn_rx_counter();
            (tx.clone() as Arc<dyn NicPort>, handle)
        } else {
            let rx_name = &devices[ports.rx as usize];
            let rx = AfPacketPort::open(rx_name, 1)
                .with_context(|| format!("cannot init rx port {}", ports.rx))?;
            let handle = rx.spawn_rx_counter();
            (rx as Arc<dyn NicPort>, handle)
        };
        Ok((tx as Arc<dyn NicPort>, rx, Some(handle)))
    }
    #[cfg(not(target_os = "linux"))]
    {
        use traffic_engine::nic::LoopbackPort;
        let _ = devices;
        let tx = LoopbackPort::new("loop-tx");
        let rx: Arc<dyn NicPort> = if ports.rx == ports.tx {
            tx.clone()
        } else {
            LoopbackPort::new("loop-rx")
        };
        Ok((tx as Arc<dyn NicPort>, rx, None))
    }
}

fn wait_port_up(port: &dyn NicPort) {
    info!(port = port.name(), "waiting for link");
    while !port.link_up() && !quit_requested() {
        sleep_ms(100);
    }
}
