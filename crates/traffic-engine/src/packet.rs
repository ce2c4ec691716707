//! Fixed-layout UDP/IPv4 frame template.
//!
//! Frames are plain byte buffers with compile-time offsets; nothing here
//! parses a header. Each worker builds the template once and afterwards
//! [`modify_packet`] rewrites only the per-flow fields, so the steady-state
//! cost per packet is a handful of stores.

use crate::flows::{Flow, KvsOp, KvsStatus};

pub const ETHER_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;
pub const UDP_HDR_LEN: usize = 8;
/// Packed `{op:u8, key[4], value[4], status:u8, client_port:be16}`.
pub const KVS_HDR_LEN: usize = 12;
pub const ETHER_CRC_LEN: u64 = 4;

/// Frame size bounds, CRC included.
pub const MIN_PKT_SIZE: u64 = 64;
pub const MAX_PKT_SIZE: u64 = 1518;

/// Smallest frame that fits the KVS header, floored at the Ethernet minimum.
pub const KVS_PKT_SIZE: u64 = {
    let kvs = ETHER_CRC_LEN + (ETHER_HDR_LEN + IPV4_HDR_LEN + UDP_HDR_LEN + KVS_HDR_LEN) as u64;
    if kvs > MIN_PKT_SIZE {
        kvs
    } else {
        MIN_PKT_SIZE
    }
};

/// Reserved transport proto id stamped on warmup packets so receivers can
/// separate warmup from measurement traffic.
pub const WARMUP_PROTO_ID: u8 = 0x92;
pub const IPPROTO_UDP: u8 = 17;
/// UDP destination port of the key-value store under test.
pub const KVSTORE_PORT: u16 = 670;

const SRC_MAC: [u8; 6] = [0xb4, 0x96, 0x91, 0xa4, 0x02, 0xe9];
const DST_MAC: [u8; 6] = [0xb4, 0x96, 0x91, 0xa4, 0x04, 0x21];
const ETHERTYPE_IPV4: u16 = 0x0800;

// Byte offsets into the frame.
const ETH_DST_OFF: usize = 0;
const ETH_SRC_OFF: usize = 6;
const ETH_TYPE_OFF: usize = 12;
const IP_OFF: usize = ETHER_HDR_LEN;
const IP_TOTAL_LEN_OFF: usize = IP_OFF + 2;
const IP_TTL_OFF: usize = IP_OFF + 8;
const IP_PROTO_OFF: usize = IP_OFF + 9;
const IP_SRC_OFF: usize = IP_OFF + 12;
const IP_DST_OFF: usize = IP_OFF + 16;
const UDP_OFF: usize = IP_OFF + IPV4_HDR_LEN;
const UDP_SRC_OFF: usize = UDP_OFF;
const UDP_DST_OFF: usize = UDP_OFF + 2;
const UDP_LEN_OFF: usize = UDP_OFF + 4;
const KVS_OFF: usize = UDP_OFF + UDP_HDR_LEN;
const KVS_OP_OFF: usize = KVS_OFF;
const KVS_KEY_OFF: usize = KVS_OFF + 1;
const KVS_VALUE_OFF: usize = KVS_OFF + 5;
const KVS_STATUS_OFF: usize = KVS_OFF + 9;
const KVS_CLIENT_PORT_OFF: usize = KVS_OFF + 10;

/// Build the invariant parts of the frame into `pkt`, whose length is the
/// on-wire frame size minus CRC. IP and UDP checksums stay zero (checksum
/// offload is assumed on the transmit side; the UDP checksum is legitimately
/// optional over IPv4).
pub fn generate_template_packet(pkt: &mut [u8], kvs_mode: bool) {
    let size = pkt.len();
    pkt.fill(0);

    pkt[ETH_DST_OFF..ETH_DST_OFF + 6].copy_from_slice(&DST_MAC);
    pkt[ETH_SRC_OFF..ETH_SRC_OFF + 6].copy_from_slice(&SRC_MAC);
    pkt[ETH_TYPE_OFF..ETH_TYPE_OFF + 2].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    // IPv4: default IHL, no fragmentation, zeroed checksum; src/dst are
    // parameters written by modify_packet.
    pkt[IP_OFF] = 0x45;
    let ip_total = (size - ETHER_HDR_LEN) as u16;
    pkt[IP_TOTAL_LEN_OFF..IP_TOTAL_LEN_OFF + 2].copy_from_slice(&ip_total.to_be_bytes());
    pkt[IP_TTL_OFF] = 64;
    pkt[IP_PROTO_OFF] = IPPROTO_UDP;

    let udp_len = (size - ETHER_HDR_LEN - IPV4_HDR_LEN) as u16;
    pkt[UDP_LEN_OFF..UDP_LEN_OFF + 2].copy_from_slice(&udp_len.to_be_bytes());

    let mut payload_off = UDP_OFF + UDP_HDR_LEN;
    if kvs_mode {
        pkt[UDP_DST_OFF..UDP_DST_OFF + 2].copy_from_slice(&KVSTORE_PORT.to_be_bytes());
        pkt[KVS_OP_OFF] = KvsOp::Put.wire();
        pkt[KVS_STATUS_OFF] = KvsStatus::Miss as u8;
        pkt[KVS_CLIENT_PORT_OFF..KVS_CLIENT_PORT_OFF + 2]
            .copy_from_slice(&0u16.to_be_bytes());
        payload_off = KVS_OFF + KVS_HDR_LEN;
    }

    pkt[payload_off..].fill(0xff);
}

/// Rewrite only the per-packet fields: IP source (and destination outside of
/// KVS mode), UDP source (and destination outside of KVS mode), the KVS
/// op/key/value in KVS mode, and the transport proto when warmup marking is
/// in effect.
#[inline]
pub fn modify_packet(pkt: &mut [u8], flow: &Flow, kvs_op: KvsOp, kvs_mode: bool, mark_warmup: bool) {
    pkt[IP_PROTO_OFF] = if mark_warmup { WARMUP_PROTO_ID } else { IPPROTO_UDP };

    pkt[IP_SRC_OFF..IP_SRC_OFF + 4].copy_from_slice(&flow.src_ip.to_be_bytes());
    pkt[UDP_SRC_OFF..UDP_SRC_OFF + 2].copy_from_slice(&flow.src_port.to_be_bytes());

    if kvs_mode {
        pkt[UDP_DST_OFF..UDP_DST_OFF + 2].copy_from_slice(&KVSTORE_PORT.to_be_bytes());
        pkt[KVS_OP_OFF] = kvs_op.wire();
        pkt[KVS_KEY_OFF..KVS_KEY_OFF + 4].copy_from_slice(&flow.kvs_key.to_be_bytes());
        pkt[KVS_VALUE_OFF..KVS_VALUE_OFF + 4].copy_from_slice(&flow.kvs_value.to_be_bytes());
    } else {
        pkt[IP_DST_OFF..IP_DST_OFF + 4].copy_from_slice(&flow.dst_ip.to_be_bytes());
        pkt[UDP_DST_OFF..UDP_DST_OFF + 2].copy_from_slice(&flow.dst_port.to_be_bytes());
    }
}

/// Read the flow identity back out of a built frame. The inverse of
/// [`modify_packet`] for whichever fields the mode stamps.
pub fn extract_flow(pkt: &[u8], kvs_mode: bool) -> Flow {
    let be32 = |off: usize| u32::from_be_bytes(pkt[off..off + 4].try_into().unwrap());
    let be16 = |off: usize| u16::from_be_bytes(pkt[off..off + 2].try_into().unwrap());
    Flow {
        src_ip: be32(IP_SRC_OFF),
        dst_ip: be32(IP_DST_OFF),
        src_port: be16(UDP_SRC_OFF),
        dst_port: be16(UDP_DST_OFF),
        kvs_key: if kvs_mode { be32(KVS_KEY_OFF) } else { 0 },
        kvs_value: if kvs_mode { be32(KVS_VALUE_OFF) } else { 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_flow() -> Flow {
        Flow {
            src_ip: 0x0a000001,
            dst_ip: 0xc0a80102,
            src_port: 1234,
            dst_port: 5678,
            kvs_key: 0x11223344,
            kvs_value: 0xaabbccdd,
        }
    }

    #[test]
    fn test_template_invariant_fields() {
        let mut pkt = vec![0u8; 60]; // 64B frame minus CRC
        generate_template_packet(&mut pkt, false);

        assert_eq!(&pkt[0..6], &DST_MAC);
        assert_eq!(&pkt[6..12], &SRC_MAC);
        assert_eq!(&pkt[12..14], &[0x08, 0x00]);
        assert_eq!(pkt[IP_OFF], 0x45);
        assert_eq!(pkt[IP_TTL_OFF], 64);
        assert_eq!(pkt[IP_PROTO_OFF], IPPROTO_UDP);
        // 60 - 14 = 46 byte IP datagram, 26 byte UDP datagram.
        assert_eq!(&pkt[IP_TOTAL_LEN_OFF..IP_TOTAL_LEN_OFF + 2], &46u16.to_be_bytes());
        assert_eq!(&pkt[UDP_LEN_OFF..UDP_LEN_OFF + 2], &26u16.to_be_bytes());
        // Checksums zeroed.
        assert_eq!(&pkt[IP_OFF + 10..IP_OFF + 12], &[0, 0]);
        assert_eq!(&pkt[UDP_OFF + 6..UDP_OFF + 8], &[0, 0]);
        // Payload fill.
        assert!(pkt[UDP_OFF + UDP_HDR_LEN..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_template_kvs_header() {
        let mut pkt = vec![0u8; KVS_PKT_SIZE as usize - ETHER_CRC_LEN as usize];
        generate_template_packet(&mut pkt, true);

        assert_eq!(&pkt[UDP_DST_OFF..UDP_DST_OFF + 2], &KVSTORE_PORT.to_be_bytes());
        assert_eq!(pkt[KVS_OP_OFF], KvsOp::Put.wire());
        assert_eq!(pkt[KVS_STATUS_OFF], KvsStatus::Miss as u8);
        assert_eq!(&pkt[KVS_CLIENT_PORT_OFF..KVS_CLIENT_PORT_OFF + 2], &[0, 0]);
        assert!(pkt[KVS_OFF + KVS_HDR_LEN..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_modify_roundtrip_tuple_mode() {
        let mut pkt = vec![0u8; 60];
        generate_template_packet(&mut pkt, false);
        let flow = test_flow();
        modify_packet(&mut pkt, &flow, KvsOp::Get, false, false);

        let got = extract_flow(&pkt, false);
        assert_eq!(got.src_ip, flow.src_ip);
        assert_eq!(got.dst_ip, flow.dst_ip);
        assert_eq!(got.src_port, flow.src_port);
        assert_eq!(got.dst_port, flow.dst_port);
    }

    #[test]
    fn test_modify_roundtrip_kvs_mode() {
        let mut pkt = vec![0u8; KVS_PKT_SIZE as usize - ETHER_CRC_LEN as usize];
        generate_template_packet(&mut pkt, true);
        let flow = test_flow();
        modify_packet(&mut pkt, &flow, KvsOp::Get, true, false);

        assert_eq!(pkt[KVS_OP_OFF], KvsOp::Get.wire());
        let got = extract_flow(&pkt, true);
        assert_eq!(got.src_ip, flow.src_ip);
        assert_eq!(got.src_port, flow.src_port);
        assert_eq!(got.kvs_key, flow.kvs_key);
        assert_eq!(got.kvs_value, flow.kvs_value);
        // Destination stays pinned to the store port.
        assert_eq!(got.dst_port, KVSTORE_PORT);
    }

    #[test]
    fn test_warmup_marking_toggles_proto() {
        let mut pkt = vec![0u8; 60];
        generate_template_packet(&mut pkt, false);
        let flow = test_flow();

        modify_packet(&mut pkt, &flow, KvsOp::Get, false, true);
        assert_eq!(pkt[IP_PROTO_OFF], WARMUP_PROTO_ID);
        modify_packet(&mut pkt, &flow, KvsOp::Get, false, false);
        assert_eq!(pkt[IP_PROTO_OFF], IPPROTO_UDP);
    }

    #[test]
    fn test_kvs_pkt_size_is_ethernet_minimum() {
        // 4 + 14 + 20 + 8 + 12 = 58, floored at 64.
        assert_eq!(KVS_PKT_SIZE, 64);
    }
}
