//! Transmit path: single and fragmented sends (§4.4).

use crate::device::{Device, TxOutcome};
use crate::error::{NetfrontError, Result};
use crate::wire::tx_flag;

/// Send one frame, retrying once on a shutdown signal against the device's
/// new transport (§4.4 retry semantics, §7).
pub async fn write(device: &Device, frame: &[u8]) -> Result<()> {
    let outcome = match write_once(device, frame).await? {
        TxOutcome::Status(status) => status,
        TxOutcome::Shutdown => match write_once(device, frame).await? {
            TxOutcome::Status(status) => status,
            TxOutcome::Shutdown => {
                return Err(NetfrontError::Unknown(
                    "tx shut down twice in a row".to_string(),
                ))
            }
        },
    };
    if outcome >= 0 {
        Ok(())
    } else {
        Err(NetfrontError::Unknown(format!("tx response status {outcome}")))
    }
}

async fn write_once(device: &Device, frame: &[u8]) -> Result<TxOutcome> {
    let transport = device.transport();
    let _guard = transport.tx_mutex().lock().await;

    let rx = transport.submit_tx(frame, None, 0).await?;

    let notify = transport.tx_ring().lock().await.push_and_check_notify();
    if notify {
        transport.notify_peer();
    }

    rx.await
        .map_err(|_| NetfrontError::Unknown("tx completion sender dropped".to_string()))
}

/// Send a sequence of frame fragments as one logical datagram (§4.4).
pub async fn write_vectored(device: &Device, frames: &[&[u8]]) -> Result<()> {
    if frames.is_empty() {
        return Ok(());
    }
    if frames.len() == 1 {
        return write(device, frames[0]).await;
    }

    let total: usize = frames.iter().map(|f| f.len()).sum();
    let transport = device.transport();
    let _guard = transport.tx_mutex().lock().await;

    loop {
        if transport.is_shutdown() {
            return Err(NetfrontError::Unknown(
                "ring shut down while waiting for tx headroom".to_string(),
            ));
        }
        let free = transport.tx_ring().lock().await.free_requests() as usize;
        if free >= frames.len() {
            break;
        }
        let epoch = transport.evtchn().epoch();
        transport.evtchn().after(epoch).await;
    }

    let mut receivers = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        let flags = if i == frames.len() - 1 {
            0
        } else {
            tx_flag::MORE_DATA
        };
        let size_override = if i == 0 { Some(total as u16) } else { None };
        receivers.push(transport.submit_tx(frame, size_override, flags).await?);
    }

    let notify = transport.tx_ring().lock().await.push_and_check_notify();
    if notify {
        transport.notify_peer();
    }

    // Design decision D1 (DESIGN.md): await every fragment's completion
    // inside this critical section before releasing the caller, trading
    // throughput for stricter backpressure.
    for rx in receivers {
        match rx.await {
            Ok(TxOutcome::Status(status)) if status < 0 => {
                return Err(NetfrontError::Unknown(format!(
                    "tx response status {status}"
                )));
            }
            Ok(TxOutcome::Status(_)) => {}
            Ok(TxOutcome::Shutdown) => {
                return Err(NetfrontError::Unknown(
                    "ring shut down during vectored send".to_string(),
                ));
            }
            Err(_) => {
                return Err(NetfrontError::Unknown(
                    "tx completion sender dropped".to_string(),
                ));
            }
        }
    }

    Ok(())
}
