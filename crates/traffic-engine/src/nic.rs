//! Thin NIC abstraction the engine transmits through.
//!
//! The contract is deliberately small: burst-transmit on a per-worker queue,
//! per-port counters, link state. The Linux backend drives an `AF_PACKET`
//! raw socket per TX queue and batches frames through a single `sendmmsg`
//! call per burst; received traffic on the RX port is counted by a dedicated
//! thread draining `recvmmsg`. [`LoopbackPort`] is the in-memory double used
//! by tests and non-Linux builds.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

#[cfg(target_os = "linux")]
use crate::runtime::quit_requested;
use crate::stats::PortStats;
use crate::BURST_SIZE;

pub trait NicPort: Send + Sync {
    fn name(&self) -> &str;
    /// Transmit up to [`BURST_SIZE`] frames on `queue_id`. Returns the number
    /// actually accepted; short writes are expected under backpressure and
    /// are not an error.
    fn tx_burst(&self, queue_id: u16, frames: &[&[u8]]) -> usize;
    fn stats(&self) -> PortStats;
    fn reset_stats(&self);
    fn link_up(&self) -> bool;
}

#[derive(Default)]
struct Counters {
    rx_pkts: AtomicU64,
    rx_bytes: AtomicU64,
    tx_pkts: AtomicU64,
    tx_bytes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PortStats {
        PortStats {
            rx_pkts: self.rx_pkts.load(Relaxed),
            rx_bytes: self.rx_bytes.load(Relaxed),
            tx_pkts: self.tx_pkts.load(Relaxed),
            tx_bytes: self.tx_bytes.load(Relaxed),
        }
    }

    fn reset(&self) {
        self.rx_pkts.store(0, Relaxed);
        self.rx_bytes.store(0, Relaxed);
        self.tx_pkts.store(0, Relaxed);
        self.tx_bytes.store(0, Relaxed);
    }
}

/// Interfaces usable as ports, in enumeration order. `--tx`/`--rx` are
/// indices into this list.
pub fn available_devices() -> Vec<String> {
    #[cfg(target_os = "linux")]
    {
        use std::ffi::CStr;
        use std::ptr::null_mut;

        let mut names: Vec<String> = Vec::new();
        unsafe {
            let mut addrs: *mut libc::ifaddrs = null_mut();
            if libc::getifaddrs(&mut addrs) != 0 {
                return names;
            }
            let mut current = addrs;
            while !current.is_null() {
                let ifa = &*current;
                if !ifa.ifa_name.is_null()
                    && !ifa.ifa_addr.is_null()
                    && (*ifa.ifa_addr).sa_family == libc::AF_PACKET as libc::sa_family_t
                {
                    let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();
                    if name != "lo" && !names.contains(&name) {
                        names.push(name);
                    }
                }
                current = ifa.ifa_next;
            }
            libc::freeifaddrs(addrs);
        }
        names
    }
    #[cfg(not(target_os = "linux"))]
    Vec::new()
}

// ---------------------------------------------------------------------------
// AF_PACKET backend (Linux)
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
pub use af_packet::AfPacketPort;

#[cfg(target_os = "linux")]
mod af_packet {
    use super::*;
    use anyhow::{Context, Result};
    use socket2::{Domain, Protocol, SockAddr, Socket, Type};
    use std::mem::size_of;
    use std::os::unix::io::AsRawFd;
    use std::time::Duration;

    // recvmmsg batch for the RX counter. Counting needs no burst alignment,
    // so a larger batch than the TX side amortises the syscall further.
    const RX_BATCH: usize = 64;
    const RX_PKT_CAP: usize = 2048;
    // MSG_WAITFORONE: return as soon as ≥1 message is available. Value
    // 0x10000 from <linux/socket.h>; may not be exposed by the libc crate.
    const MSG_WAITFORONE: libc::c_int = 0x10000;
    // sll_pkttype for frames we sent ourselves, from <linux/if_packet.h>.
    const PACKET_OUTGOING: u8 = 4;

    pub struct AfPacketPort {
        name: String,
        tx_socks: Vec<Socket>,
        rx_sock: Socket,
        counters: Counters,
    }

    impl AfPacketPort {
        /// Open one TX socket per queue plus an RX socket on `ifname`.
        /// Requires CAP_NET_RAW; failure here is a startup resource error.
        pub fn open(ifname: &str, num_tx_queues: u16) -> Result<Arc<Self>> {
            let c_name = std::ffi::CString::new(ifname)?;
            let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
            if ifindex == 0 {
                anyhow::bail!("interface {} not found", ifname);
            }

            // TX sockets carry protocol 0 so the kernel never queues ingress
            // traffic on them; only the RX socket subscribes to ETH_P_ALL.
            let tx_socks = (0..num_tx_queues)
                .map(|q| {
                    open_packet_socket(ifindex, 0)
                        .with_context(|| format!("tx queue {} on {}", q, ifname))
                })
                .collect::<Result<Vec<_>>>()?;

            let eth_p_all = (libc::ETH_P_ALL as u16).to_be();
            let rx_sock = open_packet_socket(ifindex, eth_p_all)
                .with_context(|| format!("rx socket on {}", ifname))?;
            // Bounded block so the counter thread can observe quit.
            rx_sock.set_read_timeout(Some(Duration::from_millis(100)))?;

            Ok(Arc::new(Self {
                name: ifname.to_string(),
                tx_socks,
                rx_sock,
                counters: Counters::default(),
            }))
        }

        /// Start the thread that drains the RX socket and maintains the
        /// port's receive counters. Runs until process shutdown.
        pub fn spawn_rx_counter(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
            let port = Arc::clone(self);
            std::thread::Builder::new()
                .name(format!("rx-{}", port.name))
                .spawn(move || port.run_rx_counter())
                .expect("failed to spawn rx counter thread")
        }

        fn run_rx_counter(&self) {
            let fd = self.rx_sock.as_raw_fd();
            let mut bufs = vec![[0u8; RX_PKT_CAP]; RX_BATCH];
            let mut names: Vec<libc::sockaddr_ll> =
                vec![unsafe { std::mem::zeroed() }; RX_BATCH];
            let mut iovs: Vec<libc::iovec> = bufs
                .iter_mut()
                .map(|b| libc::iovec { iov_base: b.as_mut_ptr() as _, iov_len: RX_PKT_CAP })
                .collect();
            let mut msgs: Vec<libc::mmsghdr> = (0..RX_BATCH)
                .map(|i| {
                    let mut msg: libc::mmsghdr = unsafe { std::mem::zeroed() };
                    msg.msg_hdr.msg_name = &mut names[i] as *mut libc::sockaddr_ll as _;
                    msg.msg_hdr.msg_namelen = size_of::<libc::sockaddr_ll>() as _;
                    msg.msg_hdr.msg_iov = &mut iovs[i];
                    msg.msg_hdr.msg_iovlen = 1;
                    msg
                })
                .collect();

            while !quit_requested() {
                for msg in msgs.iter_mut() {
                    msg.msg_hdr.msg_namelen = size_of::<libc::sockaddr_ll>() as _;
                }
                let n = unsafe {
                    libc::recvmmsg(
                        fd,
                        msgs.as_mut_ptr(),
                        RX_BATCH as _,
                        MSG_WAITFORONE,
                        std::ptr::null_mut(),
                    )
                };
                if n <= 0 {
                    // EAGAIN from the read timeout; loop to re-check quit.
                    continue;
                }
                for i in 0..n as usize {
                    // Our own transmissions loop back as PACKET_OUTGOING on a
                    // shared tx/rx port; only count genuine ingress.
                    if names[i].sll_pkttype == PACKET_OUTGOING {
                        continue;
                    }
                    self.counters.rx_pkts.fetch_add(1, Relaxed);
                    self.counters.rx_bytes.fetch_add(msgs[i].msg_len as u64, Relaxed);
                }
            }
        }
    }

    impl NicPort for AfPacketPort {
        fn name(&self) -> &str {
            &self.name
        }

        fn tx_burst(&self, queue_id: u16, frames: &[&[u8]]) -> usize {
            let n = frames.len().min(BURST_SIZE);
            if n == 0 {
                return 0;
            }
            let fd = self.tx_socks[queue_id as usize].as_raw_fd();

            let mut iovs =
                [libc::iovec { iov_base: std::ptr::null_mut(), iov_len: 0 }; BURST_SIZE];
            let mut msgs: [libc::mmsghdr; BURST_SIZE] = unsafe { std::mem::zeroed() };
            for i in 0..n {
                iovs[i].iov_base = frames[i].as_ptr() as *mut libc::c_void;
                iovs[i].iov_len = frames[i].len();
                msgs[i].msg_hdr.msg_iov = &mut iovs[i];
                msgs[i].msg_hdr.msg_iovlen = 1;
            }

            let sent = unsafe { libc::sendmmsg(fd, msgs.as_mut_ptr(), n as _, 0) };
            if sent <= 0 {
                return 0;
            }
            let sent = sent as usize;
            let bytes: u64 = frames[..sent].iter().map(|f| f.len() as u64).sum();
            self.counters.tx_pkts.fetch_add(sent as u64, Relaxed);
            self.counters.tx_bytes.fetch_add(bytes, Relaxed);
            sent
        }

        fn stats(&self) -> PortStats {
            self.counters.snapshot()
        }

        fn reset_stats(&self) {
            self.counters.reset();
        }

        fn link_up(&self) -> bool {
            let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
            for (dst, src) in ifr.ifr_name.iter_mut().zip(self.name.as_bytes()) {
                *dst = *src as libc::c_char;
            }
            let fd = self.tx_socks[0].as_raw_fd();
            let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFFLAGS, &mut ifr) };
            if ret != 0 {
                return false;
            }
            let flags = unsafe { ifr.ifr_ifru.ifru_flags };
            flags as libc::c_int & libc::IFF_RUNNING != 0
        }
    }

    fn open_packet_socket(ifindex: libc::c_uint, protocol_be: u16) -> Result<Socket> {
        let protocol = if protocol_be == 0 { None } else { Some(Protocol::from(protocol_be as i32)) };
        let socket = Socket::new(Domain::PACKET, Type::RAW, protocol)
            .context("AF_PACKET socket (CAP_NET_RAW required)")?;

        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let sll = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_ll;
        unsafe {
            (*sll).sll_family = libc::AF_PACKET as libc::sa_family_t;
            (*sll).sll_protocol = protocol_be;
            (*sll).sll_ifindex = ifindex as i32;
        }
        let addr = unsafe {
            SockAddr::new(storage, size_of::<libc::sockaddr_ll>() as libc::socklen_t)
        };
        socket.bind(&addr).context("bind to interface")?;
        Ok(socket)
    }
}

// ---------------------------------------------------------------------------
// Loopback double
// ---------------------------------------------------------------------------

/// Counting port that echoes every transmitted frame into its own receive
/// counters, as a zero-loss DUT would. Stands in for hardware in unit tests
/// and on platforms without AF_PACKET.
pub struct LoopbackPort {
    name: String,
    counters: Counters,
}

impl LoopbackPort {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), counters: Counters::default() })
    }
}

impl NicPort for LoopbackPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn tx_burst(&self, _queue_id: u16, frames: &[&[u8]]) -> usize {
        let n = frames.len().min(BURST_SIZE);
        let bytes: u64 = frames[..n].iter().map(|f| f.len() as u64).sum();
        self.counters.tx_pkts.fetch_add(n as u64, Relaxed);
        self.counters.tx_bytes.fetch_add(bytes, Relaxed);
        self.counters.rx_pkts.fetch_add(n as u64, Relaxed);
        self.counters.rx_bytes.fetch_add(bytes, Relaxed);
        n
    }

    fn stats(&self) -> PortStats {
        self.counters.snapshot()
    }

    fn reset_stats(&self) {
        self.counters.reset();
    }

    fn link_up(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_counts_and_echoes() {
        let port = LoopbackPort::new("loop0");
        let frame = [0u8; 60];
        let burst: Vec<&[u8]> = (0..4).map(|_| &frame[..]).collect();

        assert_eq!(port.tx_burst(0, &burst), 4);
        let stats = port.stats();
        assert_eq!(stats.tx_pkts, 4);
        assert_eq!(stats.tx_bytes, 240);
        assert_eq!(stats.rx_pkts, 4);

        port.reset_stats();
        assert_eq!(port.stats(), PortStats::default());
    }

    #[test]
    fn test_loopback_caps_at_burst_size() {
        let port = LoopbackPort::new("loop0");
        let frame = [0u8; 60];
        let oversized: Vec<&[u8]> = (0..BURST_SIZE + 8).map(|_| &frame[..]).collect();
        assert_eq!(port.tx_burst(0, &oversized), BURST_SIZE);
    }

    #[test]
    fn test_available_devices_excludes_loopback() {
        let devices = available_devices();
        assert!(devices.iter().all(|d| d != "lo"));
    }
}
