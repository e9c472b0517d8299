//! Receive path: pre-post buffers, drain completions, upcall frames (§4.5).

use crate::device::Device;
use crate::grant::GrantRef;
use crate::wire::{decode_rx_resp, encode_rx_req};
use std::sync::Arc;

/// Callback invoked with each delivered frame. Dispatched via `tokio::spawn`
/// so a slow or panicking callback cannot stall the reactor.
pub type RxCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Post writable buffers for every free RX request slot.
pub async fn refill(device: &Device) -> crate::error::Result<()> {
    let transport = device.transport();
    let n = transport.rx_ring().lock().await.free_requests() as usize;
    if n == 0 {
        return Ok(());
    }

    let grefs = transport.rx_gnt().get_n(n);
    let pages = transport
        .pages()
        .pages(n)
        .map_err(|e| crate::error::NetfrontError::Unknown(e.to_string()))?;

    let mut rx_map = transport.rx_map().lock().await;
    let mut ring = transport.rx_ring().lock().await;

    for (gref, page) in grefs.into_iter().zip(pages.into_iter()) {
        transport
            .rx_gnt()
            .grant_access(gref, transport.backend_domid(), true, page.as_ptr());
        let id = gref.as_id();
        if rx_map.contains_key(&id) {
            return Err(crate::error::NetfrontError::Unknown(
                "rx id collision".to_string(),
            ));
        }
        rx_map.insert(id, (gref, page));

        let slot_id = ring.next_req_id();
        encode_rx_req(id, gref.0, ring.slot_mut(slot_id));
    }

    let notify = ring.push_and_check_notify();
    drop(ring);
    drop(rx_map);
    if notify {
        transport.notify_peer();
    }

    Ok(())
}

/// Decode every unread RX response, retire its grant, and dispatch
/// delivered frames through `callback` without blocking this call.
pub async fn rx_drain(device: &Device, callback: &RxCallback) {
    let transport = device.transport();
    let mut decoded: Vec<(u16, u16, u16, i16)> = Vec::new();
    {
        let mut ring = transport.rx_ring().lock().await;
        ring.ack_responses(|slot| decoded.push(decode_rx_resp(slot)));
    }

    for (id, _offset, _flags, status) in decoded {
        let entry: Option<(GrantRef, crate::page::Page)> =
            transport.rx_map().lock().await.remove(&id);
        let Some((gref, mut page)) = entry else {
            tracing::warn!(id, "rx response for unknown request id");
            continue;
        };
        transport.rx_gnt().end_access(gref);
        transport.rx_gnt().put(gref);

        if status > 0 {
            let len = status as usize;
            page.set_view(0, len);
            let frame = page.as_bytes().to_vec();
            transport.stats().record_rx(len);

            let callback = callback.clone();
            tokio::spawn(async move {
                callback(frame);
            });
        } else {
            tracing::debug!(id, status, "rx response with non-positive status");
        }
    }
}
