//! TX/RX counter aggregation.

use crate::nic::NicPort;

/// Per-port packet and byte counters as exposed by the NIC abstraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub rx_pkts: u64,
    pub rx_bytes: u64,
    pub tx_pkts: u64,
    pub tx_bytes: u64,
}

/// Transmit counters from the TX port combined with receive counters from
/// the RX port, the view the loss computation wants.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub rx_pkts: u64,
    pub rx_bytes: u64,
    pub tx_pkts: u64,
    pub tx_bytes: u64,
}

impl Stats {
    pub fn collect(tx_port: &dyn NicPort, rx_port: &dyn NicPort) -> Self {
        let tx = tx_port.stats();
        let rx = rx_port.stats();
        Self {
            rx_pkts: rx.rx_pkts,
            rx_bytes: rx.rx_bytes,
            tx_pkts: tx.tx_pkts,
            tx_bytes: tx.tx_bytes,
        }
    }

    /// Fraction of transmitted packets that never came back, in percent.
    pub fn loss_pct(&self) -> f64 {
        if self.tx_pkts == 0 {
            return 0.0;
        }
        self.tx_pkts.saturating_sub(self.rx_pkts) as f64 / self.tx_pkts as f64 * 100.0
    }

    /// Transmit rate in million packets per second over `duration_s`.
    pub fn mpps(&self, duration_s: u64) -> f64 {
        if duration_s == 0 {
            return 0.0;
        }
        self.tx_pkts as f64 / (duration_s as f64 * 1e6)
    }

    /// Transmit rate in Gbps over `duration_s`, accounting the preamble and
    /// inter-packet gap the frames occupied on the wire.
    pub fn gbps(&self, duration_s: u64, pkt_size: u64) -> f64 {
        if duration_s == 0 {
            return 0.0;
        }
        let tx_bits = (pkt_size + 20) * 8 * self.tx_pkts;
        tx_bits as f64 / (duration_s as f64 * 1e9)
    }

    /// Counter delta since `earlier`, for windowed measurements.
    pub fn since(&self, earlier: &Stats) -> Stats {
        Stats {
            rx_pkts: self.rx_pkts.saturating_sub(earlier.rx_pkts),
            rx_bytes: self.rx_bytes.saturating_sub(earlier.rx_bytes),
            tx_pkts: self.tx_pkts.saturating_sub(earlier.tx_pkts),
            tx_bytes: self.tx_bytes.saturating_sub(earlier.tx_bytes),
        }
    }
}
