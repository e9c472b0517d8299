//! Shared ring abstraction, front side: producer/consumer index discipline
//! over a shared page, following the standard split-index scheme used by
//! this workspace's virtio split queues (`enable_notification`/
//! `needs_notification` in `dataplane/vhost.rs`), adapted to this
//! protocol's flat request/response slot array instead of descriptor
//! chains.

use crate::page::{Page, PAGE_SIZE};
use std::sync::atomic::Ordering;

/// One ring direction (RX or TX) over one shared page.
///
/// Layout of the shared page: `[req_prod: u32][req_event: u32]
/// [rsp_prod: u32][rsp_event: u32][slot 0][slot 1]...`. The four index
/// fields occupy the first 16 bytes; the remaining `PAGE_SIZE - 16` bytes
/// hold `slot_count` fixed-size slots.
pub struct Ring {
    page: Page,
    slot_size: usize,
    slot_count: u32,
    /// Local producer cursor (`req_prod_pvt`), not yet published.
    req_prod_pvt: u32,
    /// Local consumer cursor (`rsp_cons`).
    rsp_cons: u32,
}

const INDEX_HEADER_SIZE: usize = 16;

impl Ring {
    /// Build a ring over a freshly allocated page, zeroing the index header.
    pub fn new(mut page: Page, slot_size: usize) -> Self {
        page.full_mut()[0..INDEX_HEADER_SIZE].fill(0);
        let slot_count = ((PAGE_SIZE - INDEX_HEADER_SIZE) / slot_size) as u32;
        Self {
            page,
            slot_size,
            slot_count,
            req_prod_pvt: 0,
            rsp_cons: 0,
        }
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    fn index(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.page.full()[offset..offset + 4].try_into().unwrap())
    }

    fn set_index(&mut self, offset: usize, value: u32) {
        self.page.full_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn req_prod(&self) -> u32 {
        self.index(0)
    }
    fn set_req_prod(&mut self, v: u32) {
        self.set_index(0, v)
    }
    fn req_event(&self) -> u32 {
        self.index(4)
    }
    fn rsp_prod(&self) -> u32 {
        self.index(8)
    }
    fn set_rsp_event(&mut self, v: u32) {
        self.set_index(12, v)
    }

    fn slot_offset(&self, idx: u32) -> usize {
        INDEX_HEADER_SIZE + (idx % self.slot_count) as usize * self.slot_size
    }

    /// Producer headroom: slots the local side may still fill before
    /// catching up to the consumer side's last acknowledged response.
    pub fn free_requests(&self) -> u32 {
        self.slot_count - self.req_prod_pvt.wrapping_sub(self.rsp_cons)
    }

    /// Advance the local producer cursor, returning the previous value —
    /// the id/index to use for the next request.
    pub fn next_req_id(&mut self) -> u16 {
        let id = (self.req_prod_pvt % self.slot_count) as u16;
        self.req_prod_pvt = self.req_prod_pvt.wrapping_add(1);
        id
    }

    /// Byte view into the shared page for slot `id`.
    pub fn slot_mut(&mut self, id: u16) -> &mut [u8] {
        let offset = self.slot_offset(id as u32);
        &mut self.page.full_mut()[offset..offset + self.slot_size]
    }

    pub fn slot(&self, id: u16) -> &[u8] {
        let offset = self.slot_offset(id as u32);
        &self.page.full()[offset..offset + self.slot_size]
    }

    /// Publish the producer cursor and report whether the peer's event
    /// threshold requires a notification: true iff `req_prod` crossed
    /// `req_event` (signed wrap arithmetic over the full producer range).
    pub fn push_and_check_notify(&mut self) -> bool {
        let old_prod = self.req_prod();
        self.set_req_prod(self.req_prod_pvt);
        std::sync::atomic::fence(Ordering::Release);

        let req_event = self.req_event();
        let new_prod = self.req_prod_pvt;
        crossed(old_prod, new_prod, req_event)
    }

    /// For each unread response since `rsp_cons`, invoke `f(slot)`; advance
    /// `rsp_cons` to the current `rsp_prod`.
    pub fn ack_responses(&mut self, mut f: impl FnMut(&[u8])) {
        std::sync::atomic::fence(Ordering::Acquire);
        let rsp_prod = self.rsp_prod();
        while self.rsp_cons != rsp_prod {
            let offset = self.slot_offset(self.rsp_cons);
            let slot = &self.page.full()[offset..offset + self.slot_size];
            f(slot);
            self.rsp_cons = self.rsp_cons.wrapping_add(1);
        }
        self.set_rsp_event(self.rsp_cons.wrapping_add(1));
    }

    /// Number of unread responses available right now, without consuming
    /// them — used by the reactor to decide whether a drain pass is worth
    /// running.
    pub fn pending_responses(&self) -> u32 {
        self.rsp_prod().wrapping_sub(self.rsp_cons)
    }

    /// Test-only: set `rsp_prod` directly, standing in for a peer writing a
    /// response and publishing it, without a full simulated-peer harness.
    #[cfg(test)]
    pub(crate) fn test_set_rsp_prod(&mut self, v: u32) {
        self.set_index(8, v);
    }
}

/// Unsigned forward distance from `from` to `to` over a wrapping `u32`
/// range, used by the notification-threshold check below.
pub fn wrapping_distance(from: u32, to: u32) -> u32 {
    to.wrapping_sub(from)
}

/// True iff advancing a producer/consumer counter from `old` to `new`
/// crosses the `event` threshold, using the signed-wrap comparison the
/// reference ring protocol specifies: `(new - event) as i32 >= (new - old)
/// as i32` restated as an unsigned distance comparison, which is the same
/// rule this workspace's `needs_notification` check encodes for virtio's
/// `used_event`.
fn crossed(old: u32, new: u32, event: u32) -> bool {
    wrapping_distance(old, new) >= 1 && wrapping_distance(event.wrapping_add(1), new) <= wrapping_distance(old, new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MmapPageAllocator;
    use crate::page::PageAllocator;

    fn ring(slot_size: usize) -> Ring {
        let page = MmapPageAllocator.get().unwrap();
        Ring::new(page, slot_size)
    }

    #[test]
    fn free_requests_starts_at_full_capacity() {
        let r = ring(8);
        assert_eq!(r.free_requests(), r.slot_count());
    }

    #[test]
    fn next_req_id_advances_and_consumes_headroom() {
        let mut r = ring(8);
        let cap = r.free_requests();
        let id0 = r.next_req_id();
        let id1 = r.next_req_id();
        assert_eq!((id0, id1), (0, 1));
        assert_eq!(r.free_requests(), cap - 2);
    }

    #[test]
    fn push_and_check_notify_true_when_event_crossed() {
        let mut r = ring(8);
        // req_event defaults to 0, so producing past it should notify.
        r.next_req_id();
        assert!(r.push_and_check_notify());
    }

    #[test]
    fn push_and_check_notify_false_on_empty_push() {
        let mut r = ring(8);
        // No new requests queued: producer cursor doesn't move.
        assert!(!r.push_and_check_notify());
    }

    #[test]
    fn ack_responses_advances_cons_and_calls_f_in_order() {
        let mut r = ring(8);
        // Simulate the peer writing two responses and bumping rsp_prod.
        r.set_index(8, 2);
        let mut seen = Vec::new();
        r.ack_responses(|slot| seen.push(slot.to_vec()));
        assert_eq!(seen.len(), 2);
        assert_eq!(r.pending_responses(), 0);
    }
}
