//! Interactive control surface and test mode.
//!
//! A reader thread turns stdin lines into [`Command`] values and ships them
//! over a channel; the main thread is the only writer of the runtime config,
//! so workers never see a half-applied update. Command output goes to stdout;
//! engine progress and soft errors go through tracing like everything else.

use anyhow::{bail, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use traffic_engine::clock::sleep_ms;
use traffic_engine::dist;
use traffic_engine::nic::NicPort;
use traffic_engine::runtime::{flow_ttl_from_churn, quit_requested, RuntimeConfig};
use traffic_engine::stats::Stats;
use traffic_engine::{FlowTable, TrafficProfile};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Rate(f64),
    Churn(u64),
    Timer(u64),
    Stats,
    StatsReset,
    Flows,
    Dist,
    Help,
    Quit,
}

/// Parse one operator line. Empty input is not a command; unknown words and
/// malformed arguments are reported to the operator, not fatal.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };

    let cmd = match word {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "rate" => {
            let gbps: f64 = parse_arg(parts.next(), "rate <gbps>")?;
            if gbps < 0.0 {
                bail!("rate must be >= 0");
            }
            Command::Rate(gbps)
        }
        "churn" => Command::Churn(parse_arg(parts.next(), "churn <fpm>")?),
        "timer" => Command::Timer(parse_arg(parts.next(), "timer <seconds>")?),
        "stats" => Command::Stats,
        "stats-reset" => Command::StatsReset,
        "flows" => Command::Flows,
        "dist" => Command::Dist,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command: {}", other),
    };
    Ok(Some(cmd))
}

fn parse_arg<T: std::str::FromStr>(arg: Option<&str>, usage: &str) -> Result<T> {
    let Some(arg) = arg else {
        bail!("usage: {}", usage);
    };
    match arg.parse() {
        Ok(v) => Ok(v),
        Err(_) => bail!("invalid argument '{}'; usage: {}", arg, usage),
    }
}

/// Read stdin on a dedicated thread; parsed commands flow to the control
/// loop. EOF is treated as `quit`.
pub fn spawn_command_reader(tx: Sender<Command>) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("cli-reader".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            print!("pktgen> ");
            std::io::stdout().flush().ok();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Ok(Some(cmd)) => {
                        let is_quit = cmd == Command::Quit;
                        if tx.send(cmd).is_err() || is_quit {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
                print!("pktgen> ");
                std::io::stdout().flush().ok();
            }
            let _ = tx.send(Command::Quit);
        })
        .expect("failed to spawn cli reader")
}

/// Warmup phase settings; `active` is observed by the workers per burst.
pub struct Warmup {
    pub duration_s: u64,
    pub rate_mbps: f64,
    pub active: Arc<AtomicBool>,
    done: bool,
}

impl Warmup {
    pub fn new(duration_s: u64, rate_mbps: f64, active: Arc<AtomicBool>) -> Self {
        Self { duration_s, rate_mbps, active, done: false }
    }
}

pub struct ControlPlane {
    pub runtime: Arc<RuntimeConfig>,
    pub profile: Arc<TrafficProfile>,
    pub flows: Arc<FlowTable>,
    pub flow_idx_seq: Arc<Vec<u32>>,
    pub tx_port: Arc<dyn NicPort>,
    pub rx_port: Arc<dyn NicPort>,
    pub num_tx_cores: u16,
    pub warmup: Warmup,
}

impl ControlPlane {
    pub fn cmd_start(&mut self) {
        if self.warmup.duration_s > 0 && !self.warmup.done {
            self.run_warmup();
        }
        self.runtime.set_running(true);
    }

    pub fn cmd_stop(&self) {
        self.runtime.set_running(false);
    }

    pub fn cmd_rate(&self, gbps: f64) {
        self.runtime.set_rate_per_core(gbps / self.num_tx_cores as f64);
    }

    pub fn cmd_churn(&self, fpm: u64) {
        let ttl = flow_ttl_from_churn(fpm, self.profile.num_flows);
        self.runtime.set_flow_ttl_ns(ttl);
    }

    /// Measure for a fixed window at the current settings.
    pub fn cmd_timer(&mut self, seconds: u64) {
        let before = Stats::collect(self.tx_port.as_ref(), self.rx_port.as_ref());
        self.cmd_start();
        sleep_interruptible(seconds);
        self.cmd_stop();
        let delta =
            Stats::collect(self.tx_port.as_ref(), self.rx_port.as_ref()).since(&before);
        self.print_summary(&delta, seconds);
    }

    pub fn cmd_stats(&self) {
        let tx = self.tx_port.stats();
        let rx = self.rx_port.stats();
        let stats = Stats::collect(self.tx_port.as_ref(), self.rx_port.as_ref());
        println!();
        println!("~~~~~~ Stats ~~~~~~");
        println!("  TX port {}: {} pkts, {} bytes", self.tx_port.name(), tx.tx_pkts, tx.tx_bytes);
        println!("  RX port {}: {} pkts, {} bytes", self.rx_port.name(), rx.rx_pkts, rx.rx_bytes);
        println!("  Loss: {:.2}%", stats.loss_pct());
    }

    pub fn cmd_stats_reset(&self) {
        self.tx_port.reset_stats();
        self.rx_port.reset_stats();
    }

    pub fn cmd_flows(&self) {
        println!();
        println!("~~~~~~ {} flows ~~~~~~", self.flows.len());
        for flow in self.flows.iter_loaded() {
            println!("{}", flow.display(self.profile.kvs_mode));
        }
    }

    pub fn cmd_dist(&self) {
        println!();
        println!("~~~~~~ Traffic distribution ~~~~~~");
        for line in dist::cdf_lines(&self.flow_idx_seq, self.profile.num_flows) {
            println!("{}", line);
        }
    }

    fn run_warmup(&mut self) {
        let prev_rate = self.runtime.snapshot().rate_per_core;
        info!(
            duration_s = self.warmup.duration_s,
            rate_mbps = self.warmup.rate_mbps,
            "warmup phase"
        );
        self.warmup.active.store(true, Ordering::Relaxed);
        self.runtime
            .set_rate_per_core(self.warmup.rate_mbps / 1e3 / self.num_tx_cores as f64);
        self.runtime.set_running(true);
        sleep_interruptible(self.warmup.duration_s);
        self.warmup.active.store(false, Ordering::Relaxed);
        self.runtime.set_rate_per_core(prev_rate);
        self.warmup.done = true;
    }

    fn print_summary(&self, stats: &Stats, duration_s: u64) {
        println!();
        println!("~~~~~~ Pktgen ~~~~~~");
        println!("  TX:   {}", stats.tx_pkts);
        println!("  RX:   {}", stats.rx_pkts);
        println!("  Loss: {:.2}", stats.loss_pct());
        println!("  Mpps: {:.2}", stats.mpps(duration_s));
        println!("  Gbps: {:.2}", stats.gbps(duration_s, self.profile.pkt_size));
    }

    /// Main command loop; returns when the operator quits or a signal lands.
    pub fn run_interactive(&mut self, commands: Receiver<Command>) {
        println!("Type 'help' for available commands.");
        loop {
            if quit_requested() {
                break;
            }
            match commands.recv_timeout(Duration::from_millis(100)) {
                Ok(Command::Quit) => break,
                Ok(cmd) => self.dispatch(cmd),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn dispatch(&mut self, cmd: Command) {
        match cmd {
            Command::Start => self.cmd_start(),
            Command::Stop => self.cmd_stop(),
            Command::Rate(gbps) => self.cmd_rate(gbps),
            Command::Churn(fpm) => self.cmd_churn(fpm),
            Command::Timer(s) => self.cmd_timer(s),
            Command::Stats => self.cmd_stats(),
            Command::StatsReset => self.cmd_stats_reset(),
            Command::Flows => self.cmd_flows(),
            Command::Dist => self.cmd_dist(),
            Command::Help => print_help(),
            Command::Quit => {}
        }
    }

    /// `--test`: full rate, no churn, fixed window, machine-readable report.
    pub fn run_test(&mut self) -> Result<()> {
        let duration_s = 5;
        let rate_gbps = 100.0;

        info!(rate_gbps, duration_s, "test: sending with zero churn");
        self.cmd_rate(rate_gbps);
        self.cmd_churn(0);
        self.cmd_stats_reset();

        self.cmd_start();
        sleep_interruptible(duration_s);
        self.cmd_stop();

        let stats = Stats::collect(self.tx_port.as_ref(), self.rx_port.as_ref());
        let report = TestReport {
            duration_secs: duration_s,
            tx_pkts: stats.tx_pkts,
            rx_pkts: stats.rx_pkts,
            loss_pct: stats.loss_pct(),
            mpps: stats.mpps(duration_s),
            gbps: stats.gbps(duration_s, self.profile.pkt_size),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        self.print_summary(&stats, duration_s);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct TestReport {
    pub duration_secs: u64,
    pub tx_pkts: u64,
    pub rx_pkts: u64,
    pub loss_pct: f64,
    pub mpps: f64,
    pub gbps: f64,
}

fn print_help() {
    println!("Commands:");
    println!("  start           begin transmitting at the configured rate");
    println!("  stop            park the TX workers");
    println!("  rate <gbps>     set the aggregate target rate");
    println!("  churn <fpm>     set flow churn in flows per minute (0 disables)");
    println!("  timer <s>       run for <s> seconds and print the stats delta");
    println!("  stats           show TX/RX counters and loss");
    println!("  stats-reset     zero the counters");
    println!("  flows           list the current flow population");
    println!("  dist            show the traffic distribution CDF");
    println!("  quit            stop and exit");
}

/// Sleep `seconds`, waking early on shutdown.
fn sleep_interruptible(seconds: u64) {
    let mut waited = 0u64;
    while waited < seconds * 10 && !quit_requested() {
        sleep_ms(100);
        waited += 1;
    }
}
