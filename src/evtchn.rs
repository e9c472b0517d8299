//! Event channel: the external collaborator (§6) providing lightweight,
//! edge-triggered inter-domain signaling.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use vmm_sys_util::eventfd::EventFd;

/// An event-channel port number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvtchnPort(pub u32);

/// External collaborator (§6): bind, notify, unmask, and an async `after`
/// wait that resolves on the next signal strictly after `epoch`.
///
/// The real hypervisor ioctl path (`/dev/xen/evtchn`) is out of scope per
/// §1; this trait is the seam a production embedder swaps in for it.
#[async_trait]
pub trait EventChannel: Send + Sync {
    fn bind_unbound_port(&self, domid: u16) -> std::io::Result<EvtchnPort>;

    /// Signal the peer domain on `port`.
    fn notify(&self, port: EvtchnPort);

    /// Enable delivery on `port` (edge-triggered signals are masked until
    /// explicitly unmasked).
    fn unmask(&self, port: EvtchnPort);

    /// Current epoch: bumped once per received signal.
    fn epoch(&self) -> u64;

    /// Resolves once `epoch()` has advanced strictly past `since`.
    async fn after(&self, since: u64) -> u64;
}

/// `eventfd`-backed channel. Stands in for a real Xen event channel the way
/// this workspace's own `exit_event` plumbing (`EventFd` + consumer/notifier
/// pair in `dataplane/vhost.rs`) stands in for an out-of-band wakeup signal.
pub struct EventFdChannel {
    fd: EventFd,
    epoch: AtomicU64,
    notify: Arc<Notify>,
}

impl EventFdChannel {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            fd: EventFd::new(0)?,
            epoch: AtomicU64::new(0),
            notify: Arc::new(Notify::new()),
        })
    }

    /// Deliver a signal from the peer side (simulated peers call this
    /// directly; a real binding would instead read the eventfd in a poll
    /// loop and call this on wakeup).
    pub fn signal(&self) {
        let _ = self.fd.write(1);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl EventChannel for EventFdChannel {
    fn bind_unbound_port(&self, _domid: u16) -> std::io::Result<EvtchnPort> {
        Ok(EvtchnPort(self.fd.as_raw_fd() as u32))
    }

    fn notify(&self, _port: EvtchnPort) {
        self.signal();
    }

    fn unmask(&self, _port: EvtchnPort) {}

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    async fn after(&self, since: u64) -> u64 {
        loop {
            let current = self.epoch();
            if current != since {
                return current;
            }
            let notified = self.notify.notified();
            // Re-check after registering the waiter to avoid missing a
            // signal delivered between the load above and the await below.
            if self.epoch() != since {
                return self.epoch();
            }
            notified.await;
        }
    }
}

use std::os::fd::AsRawFd;
