//! End-to-end scenario 6 (§8): a `write` in flight when its ring is torn
//! down by a resume observes one shutdown signal internally, re-drives
//! against the new ring, and completes successfully — transparently to the
//! caller.

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
async fn write_retries_transparently_across_a_resume() {
    let setup = Setup::new(6, "52:54:00:00:00:06");
    let device = netfront::connect("6", setup.collaborators()).await.unwrap();

    let callback: netfront::RxCallback = std::sync::Arc::new(|_frame| {});
    tokio::spawn(netfront::listen(device.clone(), callback));

    let mut old_peer = setup.attach_peer(6).await;
    wait_until(|| old_peer.pending_rx() > 0, 200).await;

    let frame = vec![0x77u8; 40];
    let write_device = device.clone();
    let write_frame = frame.clone();
    let write_task = tokio::spawn(async move { netfront::write(&write_device, &write_frame).await });

    // Let the request land on the pre-resume ring before tearing it down.
    wait_until(|| old_peer.pending_tx() > 0, 200).await;
    let stranded = old_peer.take_tx().unwrap();
    assert_eq!(stranded.frame, frame);

    // Resume swaps in a fresh transport and shuts the old one down,
    // resolving the in-flight request with a shutdown signal the public
    // `write` retries on its own.
    netfront::resume(&device).await.unwrap();

    let mut new_peer = setup.attach_peer(6).await;
    wait_until(|| new_peer.pending_tx() > 0, 200).await;
    let retried = new_peer.take_tx().unwrap();
    assert_eq!(retried.frame, frame);
    new_peer.ack_tx(&retried, frame.len() as i16);

    write_task
        .await
        .unwrap()
        .expect("write should succeed once retried against the new ring");
}
