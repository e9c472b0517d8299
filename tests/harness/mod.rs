//! Test harness: a simulated back-end peer driving the ring protocol from
//! the other side, in-process.

#![allow(dead_code)]

pub mod memory;
pub mod peer;

pub use peer::Peer;

use std::sync::Arc;

use netfront::config_store::MemoryConfigStore;
use netfront::evtchn::EventFdChannel;
use netfront::grant::SimGrantTable;
use netfront::page::MmapPageAllocator;
use netfront::Collaborators;

/// A fully wired set of front-side collaborators plus the handles a test
/// needs to attach a `Peer` to the same device afterwards.
pub struct Setup {
    pub store: Arc<MemoryConfigStore>,
    pub grants: Arc<SimGrantTable>,
    pub evtchn: Arc<EventFdChannel>,
}

impl Setup {
    /// Seed a vif entry and build the collaborators `connect` needs.
    pub fn new(id: u32, mac: &str) -> Self {
        let store = Arc::new(MemoryConfigStore::new());
        let base = format!("device/vif/{id}");
        store.seed(&format!("{base}/backend-id"), "0");
        store.seed(&format!("{base}/backend"), &format!("backend/vif/{id}"));
        store.seed(&format!("{base}/mac"), mac);

        Self {
            store,
            grants: Arc::new(SimGrantTable::new()),
            evtchn: Arc::new(EventFdChannel::new().unwrap()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            grants: self.grants.clone(),
            pages: Arc::new(MmapPageAllocator),
            evtchn: self.evtchn.clone(),
            store: self.store.clone(),
        }
    }

    pub async fn attach_peer(&self, id: u32) -> Peer {
        Peer::attach(id, &self.store, &self.grants, &self.evtchn).await
    }
}
