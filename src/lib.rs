//! Paravirtualized network front-end driver.
//!
//! Exchanges Ethernet frames with a hypervisor-hosted back-end over
//! shared-memory ring buffers, coordinated by grant-table capabilities and
//! event-channel signaling. The data-plane and ring-management subsystem is
//! the core; the grant allocator, event-channel service, configuration
//! store, and page allocator are external collaborators a host integration
//! supplies (see [`grant`], [`evtchn`], [`config_store`], [`page`]).

pub mod config_store;
pub mod device;
pub mod error;
pub mod evtchn;
pub mod grant;
pub mod page;
pub mod reactor;
pub mod ring;
pub mod rx;
pub mod stats;
pub mod tx;
pub mod wire;

use std::sync::Arc;

pub use device::{Collaborators, Device, Features, ResumeHook};
pub use error::{NetfrontError, Result};
pub use rx::RxCallback;
pub use stats::StatsSnapshot;

/// Connect to a virtual interface, plugging it if this is the first
/// connection in this process (§4.7).
pub async fn connect(id_or_name: &str, collab: Collaborators) -> Result<Arc<Device>> {
    device::connect(id_or_name, collab).await
}

/// Remove a device from the process-wide registry.
pub fn disconnect(device: &Arc<Device>) {
    device::disconnect(device)
}

/// Run the reactor loop for `device` until it is disconnected. Intended to
/// be spawned as its own task: exactly one reactor runs per device.
pub async fn listen(device: Arc<Device>, callback: RxCallback) {
    reactor::listen(device, callback).await
}

/// Send one frame.
pub async fn write(device: &Device, frame: &[u8]) -> Result<()> {
    tx::write(device, frame).await
}

/// Send a sequence of frame fragments as one logical datagram.
pub async fn write_vectored(device: &Device, frames: &[&[u8]]) -> Result<()> {
    tx::write_vectored(device, frames).await
}

/// Rebuild a device's transport (ring, grants, event channel) and swap it
/// in, shutting down the old ring's pending operations (§4.7).
pub async fn resume(device: &Arc<Device>) -> Result<()> {
    device::resume(device).await
}

/// Resume every registered device concurrently. Intended to be wired up as
/// the host scheduler's suspend/resume hook (§4.7, §9).
pub async fn resume_all() {
    device::resume_all().await
}
