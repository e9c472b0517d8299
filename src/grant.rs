//! Grant table: the external collaborator (§6) that authorizes a peer
//! domain to read or write a specific page.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// An opaque capability naming a page the peer domain may access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GrantRef(pub u32);

impl GrantRef {
    /// The ring-slot id this ref maps to: `gref mod 2^16`.
    pub fn as_id(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

/// External collaborator (§6): `get`/`get_n`/`grant_access`/`end_access`/`put`.
pub trait GrantTable: Send + Sync {
    fn get(&self) -> GrantRef;

    fn get_n(&self, n: usize) -> Vec<GrantRef> {
        (0..n).map(|_| self.get()).collect()
    }

    /// Grant `domid` read (or read-write, if `writable`) access to `page`.
    fn grant_access(&self, gref: GrantRef, domid: u16, writable: bool, page: *mut u8);

    /// End the peer's access to `gref`. Must be called before `put`.
    fn end_access(&self, gref: GrantRef);

    fn put(&self, gref: GrantRef);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrantState {
    Acquired,
    Granted,
    AccessEnded,
}

/// Test double tracking the acquired/granted/access-ended/released lifecycle
/// so grant-balance properties (§8.2) have something to assert against.
/// Panics on a lifecycle misuse — that is a programmer bug in the driver,
/// not a runtime condition a real grant table would tolerate either.
pub struct SimGrantTable {
    next: AtomicU32,
    state: Mutex<HashMap<GrantRef, (GrantState, usize)>>,
}

impl SimGrantTable {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Number of refs currently acquired or granted but not yet released —
    /// used by tests to assert the net grant balance is zero at quiescence.
    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    /// Resolve a granted ref back to the page it names. A real grant table
    /// would map the peer domain's page in; in-process, the two sides
    /// already share the address space, so this is just a lookup.
    pub fn resolve(&self, gref: GrantRef) -> *mut u8 {
        match self.state.lock().unwrap().get(&gref) {
            Some((_, ptr)) => *ptr as *mut u8,
            None => panic!("resolve on unknown {gref:?}"),
        }
    }
}

impl Default for SimGrantTable {
    fn default() -> Self {
        Self::new()
    }
}

impl GrantTable for SimGrantTable {
    fn get(&self) -> GrantRef {
        let gref = GrantRef(self.next.fetch_add(1, Ordering::Relaxed));
        self.state
            .lock()
            .unwrap()
            .insert(gref, (GrantState::Acquired, 0));
        gref
    }

    fn grant_access(&self, gref: GrantRef, _domid: u16, _writable: bool, page: *mut u8) {
        let mut state = self.state.lock().unwrap();
        match state.get(&gref) {
            Some((GrantState::Acquired, _)) => {
                state.insert(gref, (GrantState::Granted, page as usize));
            }
            other => panic!("grant_access on {gref:?} in state {other:?}"),
        }
    }

    fn end_access(&self, gref: GrantRef) {
        let mut state = self.state.lock().unwrap();
        match state.get(&gref) {
            Some((GrantState::Granted, ptr)) => {
                let ptr = *ptr;
                state.insert(gref, (GrantState::AccessEnded, ptr));
            }
            other => panic!("end_access on {gref:?} in state {other:?}"),
        }
    }

    fn put(&self, gref: GrantRef) {
        let mut state = self.state.lock().unwrap();
        match state.remove(&gref) {
            Some((GrantState::AccessEnded, _)) => {}
            other => panic!("put on {gref:?} in state {other:?}, expected AccessEnded"),
        }
    }
}
