//! CLI definitions and startup validation for pktgen.

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use traffic_engine::dist::TrafficDist;
use traffic_engine::packet::{KVS_PKT_SIZE, MAX_PKT_SIZE, MIN_PKT_SIZE};
use traffic_engine::profile::TrafficProfile;
use traffic_engine::MIN_FLOWS_NUM;

#[derive(Parser)]
#[clap(
    name = "pktgen",
    version,
    about = "Multi-core UDP/IPv4 traffic generator\n\nDrive a device-under-test at a target line rate with a controlled flow population, arrival distribution, and flow churn.",
    long_about = None
)]
pub struct Cli {
    /// Run a 5-second self-test at full rate and exit
    #[clap(long)]
    pub test: bool,

    /// Total number of flows
    #[clap(long, default_value_t = 10_000)]
    pub total_flows: u32,

    /// Packet size in bytes, CRC included (64-1518)
    #[clap(long)]
    pub pkt_size: Option<u64>,

    /// TX device index
    #[clap(long)]
    pub tx: u16,

    /// RX device index
    #[clap(long)]
    pub rx: u16,

    /// Number of TX worker cores
    #[clap(long, default_value_t = 1)]
    pub tx_cores: u16,

    /// Force the initial flow population to be pairwise distinct
    #[clap(long)]
    pub unique_flows: bool,

    /// Random seed (default: wall-clock time at startup)
    #[clap(long)]
    pub seed: Option<u64>,

    /// Mark warmup packets with a reserved transport proto id
    #[clap(long)]
    pub mark_warmup_packets: bool,

    /// Warmup phase duration in seconds before the main rate kicks in
    #[clap(long, default_value_t = 0)]
    pub warmup_duration: u64,

    /// Warmup phase rate in Mbps
    #[clap(long, default_value_t = 1.0)]
    pub warmup_rate: f64,

    /// Dump one templated packet per flow to flows.pcap before starting
    #[clap(long)]
    pub dump_flows_to_file: bool,

    /// Carry a key-value-store request header in every packet
    #[clap(long)]
    pub kvs_mode: bool,

    /// Fraction of KVS operations that are GETs (0.0-1.0)
    #[clap(long, default_value_t = 0.0)]
    pub kvs_get_ratio: f64,

    /// Traffic distribution across flows
    #[clap(long, value_enum, default_value_t = Dist::Uniform)]
    pub dist: Dist,

    /// Zipf skew parameter (>= 0)
    #[clap(long, default_value_t = 1.26, allow_negative_numbers = true)]
    pub zipf_param: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Dist {
    Uniform,
    Zipf,
}

impl From<Dist> for TrafficDist {
    fn from(dist: Dist) -> Self {
        match dist {
            Dist::Uniform => TrafficDist::Uniform,
            Dist::Zipf => TrafficDist::Zipf,
        }
    }
}

impl Cli {
    /// Validate against the discovered environment and fix up the profile.
    /// Every failure is a single-line reason; the caller exits nonzero.
    pub fn build_profile(&self, nb_devices: usize, nb_cores: usize) -> Result<(TrafficProfile, Ports)> {
        if nb_devices < 2 {
            bail!(
                "insufficient number of available devices ({} detected, but at least 2 are required)",
                nb_devices
            );
        }
        if nb_cores < 2 {
            bail!(
                "insufficient number of cores ({} available, but at least 2 are required)",
                nb_cores
            );
        }
        if self.total_flows < MIN_FLOWS_NUM {
            bail!(
                "number of flows must be >= {} (requested {})",
                MIN_FLOWS_NUM,
                self.total_flows
            );
        }
        if self.tx_cores == 0 {
            bail!("number of TX cores must be positive");
        }
        if (self.tx_cores as usize) + 1 > nb_cores {
            bail!(
                "insufficient number of cores (main=1, tx={}, available={})",
                self.tx_cores,
                nb_cores
            );
        }
        if self.total_flows < self.tx_cores as u32 {
            bail!(
                "too many cores ({}) for the requested number of flows ({})",
                self.tx_cores,
                self.total_flows
            );
        }
        if self.tx as usize >= nb_devices {
            bail!(
                "invalid TX device: requested {} but only {} available",
                self.tx,
                nb_devices
            );
        }
        if self.rx as usize >= nb_devices {
            bail!(
                "invalid RX device: requested {} but only {} available",
                self.rx,
                nb_devices
            );
        }
        if !(0.0..=1.0).contains(&self.kvs_get_ratio) {
            bail!(
                "KVS get ratio must be in the interval [0.0-1.0] (requested {})",
                self.kvs_get_ratio
            );
        }
        if self.zipf_param < 0.0 {
            bail!("Zipf parameter must be >= 0 (requested {})", self.zipf_param);
        }

        let mut pkt_size = self.pkt_size.unwrap_or(MIN_PKT_SIZE);
        if !(MIN_PKT_SIZE..=MAX_PKT_SIZE).contains(&pkt_size) {
            bail!(
                "packet size must be in the interval [{}-{}] (requested {})",
                MIN_PKT_SIZE,
                MAX_PKT_SIZE,
                pkt_size
            );
        }
        if self.kvs_mode {
            if self.pkt_size.is_some() && pkt_size != KVS_PKT_SIZE {
                tracing::warn!(
                    requested = pkt_size,
                    forced = KVS_PKT_SIZE,
                    "KVS mode requires a fixed packet size; overriding"
                );
            }
            pkt_size = KVS_PKT_SIZE;
        }

        let seed = self.seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        });

        let profile = TrafficProfile {
            seed,
            num_flows: self.total_flows,
            dist: self.dist.into(),
            zipf_param: self.zipf_param,
            force_unique_flows: self.unique_flows,
            pkt_size,
            kvs_mode: self.kvs_mode,
            kvs_get_ratio: self.kvs_get_ratio,
            mark_warmup_packets: self.mark_warmup_packets,
        };
        let ports = Ports {
            tx: self.tx,
            rx: self.rx,
            num_tx_cores: self.tx_cores,
        };
        Ok((profile, ports))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Ports {
    pub tx: u16,
    pub rx: u16,
    pub num_tx_cores: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli::parse_from(["pktgen", "--tx", "0", "--rx", "1"])
    }

    #[test]
    fn test_defaults() {
        let cli = base_cli();
        assert_eq!(cli.total_flows, 10_000);
        assert_eq!(cli.tx_cores, 1);
        assert_eq!(cli.dist, Dist::Uniform);
        assert_eq!(cli.zipf_param, 1.26);
        let (profile, ports) = cli.build_profile(2, 8).unwrap();
        assert_eq!(profile.pkt_size, 64);
        assert_eq!(ports.num_tx_cores, 1);
    }

    #[test]
    fn test_rejects_too_few_devices() {
        assert!(base_cli().build_profile(1, 8).is_err());
    }

    #[test]
    fn test_rejects_too_many_tx_cores() {
        let cli = Cli::parse_from(["pktgen", "--tx", "0", "--rx", "1", "--tx-cores", "8"]);
        assert!(cli.build_profile(2, 8).is_err());
        let cli = Cli::parse_from(["pktgen", "--tx", "0", "--rx", "1", "--tx-cores", "7"]);
        assert!(cli.build_profile(2, 8).is_ok());
    }

    #[test]
    fn test_rejects_fewer_flows_than_cores() {
        let cli = Cli::parse_from([
            "pktgen", "--tx", "0", "--rx", "1", "--tx-cores", "4", "--total-flows", "3",
        ]);
        assert!(cli.build_profile(2, 16).is_err());
    }

    #[test]
    fn test_rejects_bad_pkt_size() {
        for size in ["63", "1519"] {
            let cli =
                Cli::parse_from(["pktgen", "--tx", "0", "--rx", "1", "--pkt-size", size]);
            assert!(cli.build_profile(2, 8).is_err());
        }
    }

    #[test]
    fn test_rejects_bad_port_index() {
        let cli = Cli::parse_from(["pktgen", "--tx", "2", "--rx", "1"]);
        assert!(cli.build_profile(2, 8).is_err());
    }

    #[test]
    fn test_kvs_mode_forces_pkt_size() {
        let cli = Cli::parse_from([
            "pktgen", "--tx", "0", "--rx", "1", "--kvs-mode", "--pkt-size", "512",
        ]);
        let (profile, _) = cli.build_profile(2, 8).unwrap();
        assert_eq!(profile.pkt_size, KVS_PKT_SIZE);
    }

    #[test]
    fn test_rejects_bad_ratio_and_zipf() {
        let cli = Cli::parse_from([
            "pktgen", "--tx", "0", "--rx", "1", "--kvs-get-ratio", "1.5",
        ]);
        assert!(cli.build_profile(2, 8).is_err());
        let cli = Cli::parse_from([
            "pktgen", "--tx", "0", "--rx", "1", "--zipf-param", "-0.1",
        ]);
        assert!(cli.build_profile(2, 8).is_err());
    }

    #[test]
    fn test_seed_is_honored() {
        let cli = Cli::parse_from(["pktgen", "--tx", "0", "--rx", "1", "--seed", "77"]);
        let (profile, _) = cli.build_profile(2, 8).unwrap();
        assert_eq!(profile.seed, 77);
    }
}
