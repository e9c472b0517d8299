//! Event-channel-driven reactor fusing refill, RX drain, and TX reaping
//! (§4.6). There is exactly one of these running per connected device.

use crate::device::Device;
use crate::rx::{rx_drain, refill, RxCallback};
use crate::wire::decode_tx_resp;
use std::sync::Arc;

/// Run the reactor loop for `device` until it is disconnected.
///
/// Never returns while the device remains connected: each iteration
/// refills RX buffers, drains completed RX and TX responses, then
/// suspends until the peer signals the event channel.
pub async fn listen(device: Arc<Device>, callback: RxCallback) {
    while !device.is_disconnected() {
        let transport = device.transport();

        if let Err(err) = refill(&device).await {
            tracing::warn!(%err, "rx refill failed, retrying next event");
        }

        rx_drain(&device, &callback).await;
        reap_tx(&device).await;

        let epoch = transport.evtchn().epoch();
        transport.evtchn().after(epoch).await;
    }
}

/// Drain the TX response ring and resolve each request's completion
/// awaitable in the order the back-end wrote its responses.
async fn reap_tx(device: &Device) {
    let transport = device.transport();
    let mut decoded = Vec::new();
    {
        let mut ring = transport.tx_ring().lock().await;
        ring.ack_responses(|slot| decoded.push(decode_tx_resp(slot)));
    }
    for (id, status) in decoded {
        transport.resolve_tx(id, status).await;
    }
}
