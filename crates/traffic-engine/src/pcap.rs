//! One-shot dump of the flow population as templated packets.
//!
//! Runs before the workers start: one fully-rewritten frame per flow, link
//! type Ethernet, zero timestamps. Lets the operator inspect exactly what
//! will hit the wire without attaching a capture to the DUT.

use anyhow::{anyhow, Context, Result};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::{DataLink, Endianness, TsResolution};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use crate::flows::{FlowTable, KvsOp};
use crate::packet::{generate_template_packet, modify_packet, ETHER_CRC_LEN};

fn pcap_header() -> PcapHeader {
    PcapHeader {
        version_major: 2,
        version_minor: 4,
        ts_correction: 0,
        ts_accuracy: 0,
        snaplen: 65535,
        datalink: DataLink::ETHERNET,
        ts_resolution: TsResolution::MicroSecond,
        endianness: Endianness::native(),
    }
}

pub fn dump_flows(path: &Path, flows: &FlowTable, pkt_size: u64) -> Result<()> {
    let cap = (pkt_size - ETHER_CRC_LEN) as usize;
    let kvs_mode = flows.kvs_mode();

    let mut template = vec![0u8; cap];
    generate_template_packet(&mut template, kvs_mode);

    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = PcapWriter::with_header(BufWriter::new(file), pcap_header())
        .map_err(|e| anyhow!("pcap header: {}", e))?;

    for flow in flows.iter_loaded() {
        modify_packet(&mut template, &flow, KvsOp::Get, kvs_mode, false);
        let pkt = PcapPacket::new(Duration::ZERO, cap as u32, &template);
        writer
            .write_packet(&pkt)
            .map_err(|e| anyhow!("pcap write: {}", e))?;
    }

    tracing::info!(flows = flows.len(), path = %path.display(), "dumped flow packets");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::TrafficDist;
    use crate::packet::extract_flow;
    use crate::profile::TrafficProfile;
    use crate::rng::Rng;
    use pcap_file::pcap::PcapReader;

    #[test]
    fn test_dump_one_packet_per_flow() {
        let profile = TrafficProfile {
            seed: 1,
            num_flows: 3,
            dist: TrafficDist::Uniform,
            zipf_param: 1.26,
            force_unique_flows: true,
            pkt_size: 64,
            kvs_mode: false,
            kvs_get_ratio: 0.0,
            mark_warmup_packets: false,
        };
        let mut rng = Rng::from_seed(profile.seed);
        let flows = FlowTable::generate(&profile, &mut rng);

        let path =
            std::env::temp_dir().join(format!("pktgen-flows-{}.pcap", std::process::id()));
        dump_flows(&path, &flows, profile.pkt_size).unwrap();

        let mut reader = PcapReader::new(File::open(&path).unwrap()).unwrap();
        let mut seen = Vec::new();
        while let Some(pkt) = reader.next_packet() {
            let pkt = pkt.unwrap();
            assert_eq!(pkt.data.len(), 60);
            seen.push(extract_flow(&pkt.data, false));
        }
        assert_eq!(seen.len(), 3);
        for (got, want) in seen.iter().zip(flows.iter_loaded()) {
            assert_eq!(got.src_ip, want.src_ip);
            assert_eq!(got.dst_ip, want.dst_ip);
        }
        std::fs::remove_file(&path).ok();
    }
}
