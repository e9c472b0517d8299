//! Per-device byte/packet counters, read and reset from outside the
//! reactor task without synchronizing with it.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    rx_bytes: AtomicU64,
    rx_pkts: AtomicU64,
    tx_bytes: AtomicU64,
    tx_pkts: AtomicU64,
}

/// Snapshot returned by [`Stats::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub rx_bytes: u64,
    pub rx_pkts: u64,
    pub tx_bytes: u64,
    pub tx_pkts: u64,
}

impl Stats {
    pub fn record_rx(&self, bytes: usize) {
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.rx_pkts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx(&self, bytes: usize) {
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.tx_pkts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_pkts: self.rx_pkts.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_pkts: self.tx_pkts.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.rx_bytes.store(0, Ordering::Relaxed);
        self.rx_pkts.store(0, Ordering::Relaxed);
        self.tx_bytes.store(0, Ordering::Relaxed);
        self.tx_pkts.store(0, Ordering::Relaxed);
    }
}
