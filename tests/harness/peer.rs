//! Simulated back-end: the other side of the ring, driven explicitly by
//! tests instead of running as its own task, so each scenario controls
//! exactly when the peer observes and acknowledges traffic.

use std::sync::Arc;

use netfront::config_store::{ConfigStore, MemoryConfigStore};
use netfront::evtchn::{EventChannel, EventFdChannel, EvtchnPort};
use netfront::grant::{GrantRef, SimGrantTable};
use netfront::wire::{RX_SLOT_SIZE, TX_SLOT_SIZE};

use super::memory::PeerRing;

/// A TX request as observed by the peer, with its payload already resolved
/// through the grant table.
pub struct TxSeen {
    slot: u32,
    pub id: u16,
    pub gref: u32,
    pub flags: u16,
    pub size: u16,
    pub frame: Vec<u8>,
}

/// An RX request (an empty buffer posted for the peer to fill).
pub struct RxSeen {
    slot: u32,
    pub id: u16,
    pub gref: u32,
}

pub struct Peer {
    grants: Arc<SimGrantTable>,
    evtchn: Arc<EventFdChannel>,
    tx: PeerRing,
    rx: PeerRing,
}

impl Peer {
    /// Attach to a device that has already completed its plug handshake:
    /// reads the ring refs it published and resolves them to the backing
    /// pages through the (shared) grant table.
    pub async fn attach(
        id: u32,
        store: &Arc<MemoryConfigStore>,
        grants: &Arc<SimGrantTable>,
        evtchn: &Arc<EventFdChannel>,
    ) -> Self {
        let base = format!("device/vif/{id}");
        let tx_gref: u32 = store
            .read(&format!("{base}/tx-ring-ref"))
            .await
            .expect("tx-ring-ref published")
            .parse()
            .unwrap();
        let rx_gref: u32 = store
            .read(&format!("{base}/rx-ring-ref"))
            .await
            .expect("rx-ring-ref published")
            .parse()
            .unwrap();

        Self {
            grants: grants.clone(),
            evtchn: evtchn.clone(),
            tx: PeerRing::new(grants.resolve(GrantRef(tx_gref)), TX_SLOT_SIZE),
            rx: PeerRing::new(grants.resolve(GrantRef(rx_gref)), RX_SLOT_SIZE),
        }
    }

    pub fn pending_tx(&self) -> u32 {
        self.tx.pending_requests()
    }

    pub fn pending_rx(&self) -> u32 {
        self.rx.pending_requests()
    }

    /// Consume the next posted TX request and resolve its payload.
    pub fn take_tx(&mut self) -> Option<TxSeen> {
        let (slot, bytes) = self.tx.take_request()?;
        let gref = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let offset = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        let flags = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
        let id = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
        let size = u16::from_le_bytes(bytes[10..12].try_into().unwrap());

        let ptr = self.grants.resolve(GrantRef(gref));
        let frame =
            unsafe { std::slice::from_raw_parts(ptr.add(offset as usize), size as usize) }
                .to_vec();

        Some(TxSeen {
            slot,
            id,
            gref,
            flags,
            size,
            frame,
        })
    }

    /// Acknowledge a TX request with the given status and notify the front.
    pub fn ack_tx(&mut self, seen: &TxSeen, status: i16) {
        let mut resp = [0u8; 4];
        resp[0..2].copy_from_slice(&seen.id.to_le_bytes());
        resp[2..4].copy_from_slice(&status.to_le_bytes());
        self.tx.respond(seen.slot, &resp);
        self.evtchn.notify(EvtchnPort(0));
    }

    /// Consume the next posted RX request (an empty buffer awaiting a frame).
    pub fn take_rx(&mut self) -> Option<RxSeen> {
        let (slot, bytes) = self.rx.take_request()?;
        let id = u16::from_le_bytes(bytes[0..2].try_into().unwrap());
        let gref = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        Some(RxSeen { slot, id, gref })
    }

    /// Fill a previously taken RX buffer with `data` and deliver it.
    pub fn fill_rx(&mut self, seen: &RxSeen, data: &[u8]) {
        let ptr = self.grants.resolve(GrantRef(seen.gref));
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };

        let mut resp = [0u8; 8];
        resp[0..2].copy_from_slice(&seen.id.to_le_bytes());
        resp[2..4].copy_from_slice(&0u16.to_le_bytes());
        resp[4..6].copy_from_slice(&0u16.to_le_bytes());
        resp[6..8].copy_from_slice(&(data.len() as i16).to_le_bytes());
        self.rx.respond(seen.slot, &resp);
        self.evtchn.notify(EvtchnPort(0));
    }
}
