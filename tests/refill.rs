//! End-to-end scenario 3 (§8): the reactor's startup refill posts RX
//! buffers up to ring capacity, and a second immediate refill is a no-op.

mod harness;

use std::time::Duration;

use harness::Setup;
use tokio::time::sleep;

async fn wait_until(mut cond: impl FnMut() -> bool, attempts: u32) {
    for _ in 0..attempts {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(2)).await;
    }
    assert!(cond(), "condition never became true");
}

#[tokio::test]
async fn refill_saturates_and_then_idles() {
    let setup = Setup::new(3, "52:54:00:00:00:03");
    let device = netfront::connect("3", setup.collaborators()).await.unwrap();
    let mut peer = setup.attach_peer(3).await;

    let capacity = (netfront::page::PAGE_SIZE - 16) / netfront::wire::RX_SLOT_SIZE;

    let callback: netfront::RxCallback = std::sync::Arc::new(|_frame| {});
    tokio::spawn(netfront::listen(device.clone(), callback));

    wait_until(|| peer.pending_rx() as usize >= capacity, 200).await;
    assert_eq!(peer.pending_rx() as usize, capacity);

    // Consume every posted buffer without acknowledging it, so the ring
    // reports no headroom; a further reactor iteration should not post
    // anything new.
    let mut seen = Vec::new();
    while let Some(rx_seen) = peer.take_rx() {
        seen.push(rx_seen);
    }
    assert_eq!(seen.len(), capacity);

    // Nudge the reactor a few times and confirm it stays idle: nothing new
    // shows up for the peer to take.
    for _ in 0..5 {
        sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(peer.pending_rx(), 0);
}
