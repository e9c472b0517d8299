//! Device record and lifecycle: plug, connect, resume, and the process-wide
//! registry (§4.7).

use crate::config_store::ConfigStore;
use crate::error::{NetfrontError, Result};
use crate::evtchn::{EventChannel, EvtchnPort};
use crate::grant::{GrantRef, GrantTable};
use crate::page::{Page, PageAllocator};
use crate::ring::Ring;
use crate::stats::Stats;
use crate::wire::{encode_tx_req, RX_SLOT_SIZE, TX_SLOT_SIZE};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{oneshot, Mutex};

/// Negotiated feature booleans (§3, §4.7 step 6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    pub sg: bool,
    pub gso_tcpv4: bool,
    pub rx_copy: bool,
    pub rx_flip: bool,
    pub smart_poll: bool,
}

/// Outcome of a single TX request as observed by its completion awaitable.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TxOutcome {
    /// `status` from the TX response record.
    Status(i16),
    /// The ring was torn down (suspend/resume) before a response arrived.
    Shutdown,
}

/// An in-flight TX request's bookkeeping: the grant to retire and the page
/// to release once its response (or a shutdown) arrives.
struct TxPending {
    sender: oneshot::Sender<TxOutcome>,
    gref: GrantRef,
    #[allow(dead_code)]
    page: Page,
}

/// The external collaborators a device needs, bundled so `connect` takes
/// one argument instead of four.
pub struct Collaborators {
    pub grants: Arc<dyn GrantTable>,
    pub pages: Arc<dyn PageAllocator>,
    pub evtchn: Arc<dyn EventChannel>,
    pub store: Arc<dyn ConfigStore>,
}

/// Everything that gets rebuilt on `resume`: rings, grants, event channel
/// binding, negotiated state. The tx mutex lives here because it guards
/// this transport's ring specifically — a resumed device gets a fresh one.
pub struct Transport {
    id: u32,
    backend_domid: u16,
    backend_path: String,
    mac: [u8; 6],
    features: Features,
    stats: Stats,

    /// Held for the full duration of `write`/`write_vectored` so a
    /// fragment group is never interleaved with other device traffic
    /// (§4.4, §9 fragment-interleave prevention). Distinct from the
    /// ring's own internal lock below, which only needs to be held for
    /// the brief critical sections that touch the shared page.
    tx_mutex: Mutex<()>,
    tx_ring: Mutex<Ring>,
    rx_ring: Mutex<Ring>,
    rx_map: Mutex<HashMap<u16, (GrantRef, Page)>>,
    tx_pending: Mutex<HashMap<u16, TxPending>>,

    tx_gnt: Arc<dyn GrantTable>,
    rx_gnt: Arc<dyn GrantTable>,
    pages: Arc<dyn PageAllocator>,
    evtchn: Arc<dyn EventChannel>,
    evtchn_port: EvtchnPort,

    shutdown: AtomicBool,
}

impl Transport {
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn backend_domid(&self) -> u16 {
        self.backend_domid
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn features(&self) -> Features {
        self.features
    }

    pub(crate) fn stats(&self) -> &Stats {
        &self.stats
    }

    pub(crate) fn evtchn(&self) -> &Arc<dyn EventChannel> {
        &self.evtchn
    }

    pub(crate) fn tx_ring(&self) -> &Mutex<Ring> {
        &self.tx_ring
    }

    pub(crate) fn rx_ring(&self) -> &Mutex<Ring> {
        &self.rx_ring
    }

    pub(crate) fn rx_map(&self) -> &Mutex<HashMap<u16, (GrantRef, Page)>> {
        &self.rx_map
    }

    pub(crate) fn tx_gnt(&self) -> &Arc<dyn GrantTable> {
        &self.tx_gnt
    }

    pub(crate) fn rx_gnt(&self) -> &Arc<dyn GrantTable> {
        &self.rx_gnt
    }

    pub(crate) fn pages(&self) -> &Arc<dyn PageAllocator> {
        &self.pages
    }

    /// Whether this transport has been superseded by a resume. Pending
    /// awaitables consult this instead of racing the registry.
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn notify_peer(&self) {
        self.evtchn.notify(self.evtchn_port);
    }

    pub(crate) fn tx_mutex(&self) -> &Mutex<()> {
        &self.tx_mutex
    }

    /// Grant one frame read-only to the peer, place a TX request for it,
    /// and register the completion awaitable (§4.4 `write_request`).
    pub(crate) async fn submit_tx(
        &self,
        frame: &[u8],
        size_override: Option<u16>,
        flags: u16,
    ) -> Result<oneshot::Receiver<TxOutcome>> {
        let mut page = self
            .pages
            .get()
            .map_err(|e| NetfrontError::Unknown(e.to_string()))?;
        page.full_mut()[..frame.len()].copy_from_slice(frame);

        let gref = self.tx_gnt.get();
        self.tx_gnt
            .grant_access(gref, self.backend_domid, false, page.as_ptr());
        let id = gref.as_id();
        let size = size_override.unwrap_or(frame.len() as u16);

        {
            let mut ring = self.tx_ring.lock().await;
            let slot_id = ring.next_req_id();
            encode_tx_req(gref.0, 0, flags, id, size, ring.slot_mut(slot_id));
        }

        let (sender, receiver) = oneshot::channel();
        self.tx_pending
            .lock()
            .await
            .insert(id, TxPending { sender, gref, page });

        self.stats.record_tx(frame.len());
        Ok(receiver)
    }

    /// Resolve a TX request's completion once its response slot is decoded
    /// (reactor-side). Ends access and releases the grant either way.
    pub(crate) async fn resolve_tx(&self, id: u16, status: i16) {
        let entry = self.tx_pending.lock().await.remove(&id);
        let Some(entry) = entry else {
            tracing::warn!(id, "tx response for unknown request id");
            return;
        };
        self.tx_gnt.end_access(entry.gref);
        self.tx_gnt.put(entry.gref);
        let _ = entry.sender.send(TxOutcome::Status(status));
    }

    /// Mark this transport shut down and resolve every outstanding TX
    /// completion with a shutdown outcome (§4.7 resume, §5 cancellation).
    /// The peer can no longer act on a dead ring, so grants are retired
    /// without waiting on an access-ended reply. Also kicks the event
    /// channel so a reactor iteration currently blocked in `after` on this
    /// transport's epoch wakes up and re-fetches the device's (by then
    /// already-swapped) current transport.
    pub(crate) async fn shut_down(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut pending = self.tx_pending.lock().await;
        for (_, entry) in pending.drain() {
            self.tx_gnt.end_access(entry.gref);
            self.tx_gnt.put(entry.gref);
            let _ = entry.sender.send(TxOutcome::Shutdown);
        }
        drop(pending);
        self.evtchn.notify(self.evtchn_port);
    }
}

fn config_path(id: u32) -> String {
    format!("device/vif/{id}")
}

/// Build a fresh Transport by running the plug handshake (§4.7).
async fn plug_inner(id: u32, collab: &Collaborators) -> Result<Transport> {
    let base = config_path(id);

    let backend_domid: u16 = collab
        .store
        .read(&format!("{base}/backend-id"))
        .await
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| NetfrontError::Unknown(format!("{base}/backend-id unreadable")))?;

    let rx_page = collab
        .pages
        .get()
        .map_err(|e| NetfrontError::Unknown(e.to_string()))?;
    let tx_page = collab
        .pages
        .get()
        .map_err(|e| NetfrontError::Unknown(e.to_string()))?;

    let rx_gnt = collab.grants.clone();
    let tx_gnt = collab.grants.clone();

    let rx_gref = rx_gnt.get();
    rx_gnt.grant_access(rx_gref, backend_domid, true, rx_page.as_ptr());
    let tx_gref = tx_gnt.get();
    tx_gnt.grant_access(tx_gref, backend_domid, true, tx_page.as_ptr());

    let rx_ring = Ring::new(rx_page, RX_SLOT_SIZE);
    let tx_ring = Ring::new(tx_page, TX_SLOT_SIZE);

    let evtchn_port = collab
        .evtchn
        .bind_unbound_port(backend_domid)
        .map_err(|e| NetfrontError::Unknown(e.to_string()))?;

    let backend_path = collab
        .store
        .read(&format!("{base}/backend"))
        .await
        .ok_or_else(|| NetfrontError::Unknown(format!("{base}/backend unreadable")))?;

    let mac_str = collab
        .store
        .read(&format!("{base}/mac"))
        .await
        .ok_or_else(|| NetfrontError::Unknown("invalid mac".to_string()))?;
    let mac = parse_mac(&mac_str).ok_or_else(|| NetfrontError::Unknown("invalid mac".to_string()))?;

    let tx_ring_ref_key = format!("{base}/tx-ring-ref");
    let tx_ring_ref_val = tx_gref.0.to_string();
    let rx_ring_ref_key = format!("{base}/rx-ring-ref");
    let rx_ring_ref_val = rx_gref.0.to_string();
    let evtchn_key = format!("{base}/event-channel");
    let evtchn_val = evtchn_port.0.to_string();
    let rx_copy_key = format!("{base}/request-rx-copy");
    let feature_notify_key = format!("{base}/feature-rx-notify");
    let feature_sg_key = format!("{base}/feature-sg");
    let state_key = format!("{base}/state");

    collab
        .store
        .transaction(&[
            (tx_ring_ref_key.as_str(), tx_ring_ref_val.as_str()),
            (rx_ring_ref_key.as_str(), rx_ring_ref_val.as_str()),
            (evtchn_key.as_str(), evtchn_val.as_str()),
            (rx_copy_key.as_str(), "1"),
            (feature_notify_key.as_str(), "1"),
            (feature_sg_key.as_str(), "1"),
            (state_key.as_str(), "Connected"),
        ])
        .await;

    let features = Features {
        sg: collab
            .store
            .read_bool(&format!("{backend_path}/feature-sg"))
            .await,
        gso_tcpv4: collab
            .store
            .read_bool(&format!("{backend_path}/feature-gso-tcpv4"))
            .await,
        rx_copy: collab
            .store
            .read_bool(&format!("{backend_path}/feature-rx-copy"))
            .await,
        rx_flip: collab
            .store
            .read_bool(&format!("{backend_path}/feature-rx-flip"))
            .await,
        smart_poll: collab
            .store
            .read_bool(&format!("{backend_path}/feature-smart-poll"))
            .await,
    };

    collab.evtchn.unmask(evtchn_port);

    tracing::debug!(id, backend_domid, %backend_path, "vif plugged");

    Ok(Transport {
        id,
        backend_domid,
        backend_path,
        mac,
        features,
        stats: Stats::default(),
        tx_mutex: Mutex::new(()),
        tx_ring: Mutex::new(tx_ring),
        rx_ring: Mutex::new(rx_ring),
        rx_map: Mutex::new(HashMap::new()),
        tx_pending: Mutex::new(HashMap::new()),
        tx_gnt,
        rx_gnt,
        pages: collab.pages.clone(),
        evtchn: collab.evtchn.clone(),
        evtchn_port,
        shutdown: AtomicBool::new(false),
    })
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for slot in out.iter_mut() {
        *slot = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// A resume hook: invoked with a back-reference to the owning Device after
/// a fresh Transport has been swapped in.
pub type ResumeHook = Box<dyn Fn(Arc<Device>) + Send + Sync>;

/// Stable wrapper around a swappable Transport (§3). Identity (`id`) never
/// changes across resume; the Transport underneath does.
pub struct Device {
    transport: ArcSwap<Transport>,
    collab: Collaborators,
    /// Guards plug/resume sequencing; also the condition `wait_for_plug`
    /// blocks on — held for the duration of a resume, so acquiring and
    /// releasing it is exactly "wait until any in-flight (re)plug settles".
    lifecycle: Mutex<()>,
    resume_hooks: Mutex<Vec<ResumeHook>>,
    disconnected: AtomicBool,
}

impl Device {
    pub fn id(&self) -> u32 {
        self.transport.load().id()
    }

    pub fn backend_id(&self) -> u16 {
        self.transport.load().backend_domid()
    }

    pub fn mac(&self) -> [u8; 6] {
        self.transport.load().mac()
    }

    pub fn features(&self) -> Features {
        self.transport.load().features()
    }

    pub fn get_stats(&self) -> crate::stats::StatsSnapshot {
        self.transport.load().stats().get()
    }

    pub fn reset_stats(&self) {
        self.transport.load().stats().reset()
    }

    pub(crate) fn transport(&self) -> Arc<Transport> {
        self.transport.load_full()
    }

    /// Whether `disconnect` has been called on this device — the signal
    /// `listen`'s reactor loop uses to stop.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Register a callback to run (in order) after each future resume.
    pub async fn add_resume_hook(&self, hook: ResumeHook) {
        self.resume_hooks.lock().await.push(hook);
    }

    /// Wait until the current transport has completed at least one plug.
    /// Since `connect` only ever returns an already-plugged Device, this
    /// resolves immediately unless a resume is concurrently in flight.
    pub async fn wait_for_plug(&self) {
        let _guard = self.lifecycle.lock().await;
    }
}

/// Process-wide `id -> Device` registry (§4.7, §9).
static REGISTRY: OnceLock<ArcSwap<HashMap<u32, Arc<Device>>>> = OnceLock::new();

fn registry() -> &'static ArcSwap<HashMap<u32, Arc<Device>>> {
    REGISTRY.get_or_init(|| ArcSwap::from_pointee(HashMap::new()))
}

/// Resolve the vif argument: a literal id, or (if not numeric) the first
/// entry enumerated under `device/vif`.
async fn resolve_id(id_or_name: &str, store: &Arc<dyn ConfigStore>) -> Result<u32> {
    if let Ok(n) = id_or_name.parse::<u32>() {
        return Ok(n);
    }
    store
        .list("device/vif")
        .await
        .first()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| NetfrontError::Unknown("no vif devices enumerated".to_string()))
}

/// Connect to a vif, plugging it if this is the first connection (§4.7).
pub async fn connect(id_or_name: &str, collab: Collaborators) -> Result<Arc<Device>> {
    let id = resolve_id(id_or_name, &collab.store).await?;

    if let Some(existing) = registry().load().get(&id) {
        return Ok(existing.clone());
    }

    let transport = plug_inner(id, &collab).await?;

    let device = Arc::new(Device {
        transport: ArcSwap::from_pointee(transport),
        collab,
        lifecycle: Mutex::new(()),
        resume_hooks: Mutex::new(Vec::new()),
        disconnected: AtomicBool::new(false),
    });

    registry().rcu(|map| {
        let mut map: HashMap<u32, Arc<Device>> = (**map).clone();
        map.insert(id, device.clone());
        map
    });

    Ok(device)
}

/// Remove a device from the registry. In-flight operations against its
/// current transport are left to finish against a transport nothing new
/// will target (§5).
pub fn disconnect(device: &Arc<Device>) {
    let id = device.id();
    registry().rcu(|map| {
        let mut map: HashMap<u32, Arc<Device>> = (**map).clone();
        map.remove(&id);
        map
    });
    device.disconnected.store(true, Ordering::Release);
}

/// Rebuild the Transport for `device` and swap it in (§4.7).
pub async fn resume(device: &Arc<Device>) -> Result<()> {
    let _guard = device.lifecycle.lock().await;

    let old = device.transport();
    let fresh = plug_inner(old.id(), &device.collab).await?;
    device.transport.store(Arc::new(fresh));

    let hooks = device.resume_hooks.lock().await;
    for hook in hooks.iter() {
        hook(device.clone());
    }
    drop(hooks);

    old.shut_down().await;

    Ok(())
}

/// Resume every registered device concurrently (§4.7, §9: snapshot the
/// registry so concurrent connects during the sweep aren't observed
/// half-resumed).
pub async fn resume_all() {
    let snapshot: Vec<Arc<Device>> = registry().load().values().cloned().collect();
    let results = futures::future::join_all(snapshot.iter().map(resume)).await;
    for (device, result) in snapshot.iter().zip(results) {
        if let Err(err) = result {
            tracing::error!(id = device.id(), %err, "resume failed");
        }
    }
}
