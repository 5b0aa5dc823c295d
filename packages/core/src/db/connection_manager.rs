//! Connection Manager - Shared Handles for the Embedded Key-Value Engine
//!
//! RocksDB takes an exclusive lock on its data directory, so a second open of
//! the same directory while the first is still alive fails hard. This module
//! owns every embedded-store handle in the process and hands out reference
//! counted leases, guaranteeing at most one live handle per identifier.
//!
//! # Architecture
//!
//! - One `Slot` per identifier, created on first use. A slot is pruned only
//!   when the map holds its sole reference and it has no handle, lease or
//!   pending open/close. Every acquirer holds its slot, so all callers for an
//!   identifier still meet at the same gate.
//! - The slot map is locked only to look up or insert a slot; no I/O happens
//!   under it, so identifiers never block each other.
//! - Each slot has an async **gate** serializing opens and closes. Pending
//!   open/close tasks are parked inside the gate, so an acquirer that times
//!   out leaves them for the next one instead of abandoning them.
//! - Sharing an already-open handle is a fast path that never touches the gate.
//!
//! # Release Policies
//!
//! - `immediate`: the handle closes as soon as its reference count reaches zero.
//! - `idle`: a background reaper closes handles that stayed unreferenced for
//!   `idle_grace_ms`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dbgate_core::config::EmbeddedKvConfig;
//! use dbgate_core::db::ConnectionManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(EmbeddedKvConfig::default());
//! let lease = manager.acquire("sessions").await?;
//! let value = lease.get("user:42");
//! drop(lease);
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::{EmbeddedKvConfig, ReleasePolicyKind};
use crate::db::kv_store::KvStore;
use crate::db::{GatewayError, GatewayResult};
use crate::models::validate_identifier;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Owner of all embedded key-value handles
///
/// Cheap to clone; clones share the same handles.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: EmbeddedKvConfig,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    reaper: Mutex<Option<Reaper>>,
    shutting_down: AtomicBool,
}

struct Reaper {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

struct Slot {
    identifier: String,
    gate: tokio::sync::Mutex<Pending>,
    state: Mutex<SlotState>,
}

/// Background work that must finish before the next open
#[derive(Default)]
struct Pending {
    opening: Option<JoinHandle<GatewayResult<KvStore>>>,
    closing: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SlotState {
    store: Option<Arc<KvStore>>,
    refs: usize,
    last_release: Option<Instant>,
    /// Close started from a synchronous release, not yet moved into the gate
    closing: Option<JoinHandle<()>>,
}

/// Shared access to one open embedded store
///
/// Dropping the lease releases it.
pub struct KvLease {
    store: Arc<KvStore>,
    // Declared after `store` so the handle reference is gone before release runs
    _release: ReleaseGuard,
}

struct ReleaseGuard {
    inner: Arc<Inner>,
    slot: Arc<Slot>,
}

impl ConnectionManager {
    pub fn new(config: EmbeddedKvConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                slots: Mutex::new(HashMap::new()),
                reaper: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &EmbeddedKvConfig {
        &self.inner.config
    }

    /// Lease the handle for `identifier`, opening it if necessary
    ///
    /// Concurrent acquisitions of one identifier share a single handle.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for an invalid identifier
    /// - `EngineUnavailable` if the open fails, the acquire deadline passes or
    ///   the manager is shutting down
    pub async fn acquire(&self, identifier: &str) -> GatewayResult<KvLease> {
        validate_identifier(identifier)?;
        if self.inner.is_shutting_down() {
            return Err(GatewayError::engine_unavailable(
                "embedded store manager is shutting down",
            ));
        }

        self.inner.ensure_reaper();
        let slot = self.inner.slot(identifier);

        if let Some(lease) = slot.share(&self.inner) {
            return Ok(lease);
        }

        let deadline = self.inner.config.acquire_timeout();
        match tokio::time::timeout(deadline, self.inner.open(&slot)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::engine_unavailable(format!(
                "timed out acquiring embedded store '{}' after {} ms",
                identifier,
                deadline.as_millis()
            ))),
        }
    }

    /// Give a lease back; equivalent to dropping it
    pub fn release(&self, lease: KvLease) {
        drop(lease);
    }

    /// Number of identifiers with an open handle
    pub fn open_count(&self) -> usize {
        self.inner
            .snapshot_slots()
            .iter()
            .filter(|slot| slot.state().store.is_some())
            .count()
    }

    /// Stop the reaper and close every unreferenced handle
    ///
    /// Handles still leased close when their last lease is released.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let reaper = lock(&self.inner.reaper).take();
        if let Some(reaper) = reaper {
            let _ = reaper.shutdown_tx.send(()).await;
            if let Err(e) = reaper.handle.await {
                warn!("⚠️ Idle reaper ended abnormally: {}", e);
            }
        }

        for slot in self.inner.snapshot_slots() {
            let mut pending = slot.gate.lock().await;
            pending.adopt(&slot);
            pending.settle_close(&slot.identifier).await;

            // An acquirer that timed out may have left a finished open behind
            if let Some(opening) = pending.opening.take() {
                if let Ok(Ok(store)) = opening.await {
                    pending.close(Arc::new(store));
                    pending.settle_close(&slot.identifier).await;
                }
            }

            let store = {
                let mut state = slot.state();
                if state.refs == 0 {
                    state.store.take()
                } else {
                    warn!(
                        "⚠️ Embedded store '{}' still has {} lease(s) at shutdown",
                        slot.identifier, state.refs
                    );
                    None
                }
            };
            if let Some(store) = store {
                pending.close(store);
                pending.settle_close(&slot.identifier).await;
            }
        }

        info!("🛑 Embedded store manager shut down");
    }
}

impl Inner {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn slot(&self, identifier: &str) -> Arc<Slot> {
        let mut slots = lock(&self.slots);
        prune(&mut slots);
        slots
            .entry(identifier.to_string())
            .or_insert_with(|| {
                Arc::new(Slot {
                    identifier: identifier.to_string(),
                    gate: tokio::sync::Mutex::new(Pending::default()),
                    state: Mutex::new(SlotState::default()),
                })
            })
            .clone()
    }

    fn snapshot_slots(&self) -> Vec<Arc<Slot>> {
        lock(&self.slots).values().cloned().collect()
    }

    /// Slow path: open the handle under the slot's gate
    async fn open(self: &Arc<Self>, slot: &Arc<Slot>) -> GatewayResult<KvLease> {
        let mut pending = slot.gate.lock().await;

        // Someone else opened it while we waited for the gate
        if let Some(lease) = slot.share(self) {
            return Ok(lease);
        }
        if self.is_shutting_down() {
            return Err(GatewayError::engine_unavailable(
                "embedded store manager is shutting down",
            ));
        }

        pending.adopt(slot);
        pending.settle_close(&slot.identifier).await;

        let identifier = slot.identifier.clone();
        let path = self.config.root.join(&slot.identifier);
        let sync_writes = self.config.sync_writes;
        let opening = pending.opening.get_or_insert_with(|| {
            tokio::task::spawn_blocking(move || KvStore::open(&identifier, &path, sync_writes))
        });
        let opened = opening.await;
        pending.opening = None;
        let store = Arc::new(opened??);

        info!("🔓 Embedded store '{}' opened", slot.identifier);

        let mut state = slot.state();
        state.store = Some(store.clone());
        state.refs += 1;
        Ok(KvLease {
            store,
            _release: ReleaseGuard {
                inner: self.clone(),
                slot: slot.clone(),
            },
        })
    }

    fn release(&self, slot: &Slot) {
        let mut state = slot.state();
        state.refs = state.refs.saturating_sub(1);
        if state.refs > 0 {
            return;
        }
        state.last_release = Some(Instant::now());

        let close_now = self.config.release_policy == ReleasePolicyKind::Immediate
            || self.is_shutting_down();
        if close_now {
            if let Some(store) = state.store.take() {
                debug!("Releasing embedded store '{}'", slot.identifier);
                state.closing = close_in_background(store);
            }
        }
    }

    fn ensure_reaper(self: &Arc<Self>) {
        if self.config.release_policy != ReleasePolicyKind::Idle {
            return;
        }
        let mut reaper = lock(&self.reaper);
        if reaper.is_some() || self.is_shutting_down() {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let weak: Weak<Inner> = Arc::downgrade(self);
        let period = (self.config.idle_grace() / 4).max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.close_idle().await;
                    }
                }
            }
            debug!("Idle reaper stopped");
        });

        *reaper = Some(Reaper {
            shutdown_tx,
            handle,
        });
    }

    async fn close_idle(&self) {
        let grace = self.config.idle_grace();
        for slot in self.snapshot_slots() {
            if !slot.state().idle_for(grace) {
                continue;
            }

            let mut pending = slot.gate.lock().await;
            // Recheck: a lease may have been taken while we waited for the gate
            let store = {
                let mut state = slot.state();
                if state.idle_for(grace) {
                    state.store.take()
                } else {
                    None
                }
            };
            if let Some(store) = store {
                pending.close(store);
                pending.settle_close(&slot.identifier).await;
                info!("🔒 Closed idle embedded store '{}'", slot.identifier);
            }
        }
        prune(&mut lock(&self.slots));
    }
}

impl Slot {
    fn state(&self) -> MutexGuard<'_, SlotState> {
        lock(&self.state)
    }

    /// Fast path: join an already-open handle
    fn share(self: &Arc<Self>, inner: &Arc<Inner>) -> Option<KvLease> {
        let mut state = self.state();
        let store = state.store.clone()?;
        state.refs += 1;
        Some(KvLease {
            store,
            _release: ReleaseGuard {
                inner: inner.clone(),
                slot: self.clone(),
            },
        })
    }
}

impl Slot {
    /// No handle, lease or background work is left behind
    fn is_vacant(&self) -> bool {
        let Ok(pending) = self.gate.try_lock() else {
            return false;
        };
        let state = self.state();
        state.refs == 0
            && state.store.is_none()
            && state.closing.as_ref().map_or(true, JoinHandle::is_finished)
            && pending.opening.is_none()
            && pending.closing.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

/// Drop slots nobody can reach any more
///
/// Callers only obtain a slot through the locked map, so a slot whose sole
/// reference is the map has nobody waiting at its gate.
fn prune(slots: &mut HashMap<String, Arc<Slot>>) {
    slots.retain(|_, slot| Arc::strong_count(slot) > 1 || !slot.is_vacant());
}

impl SlotState {
    fn idle_for(&self, grace: Duration) -> bool {
        self.refs == 0
            && self.store.is_some()
            && self
                .last_release
                .map_or(true, |released| released.elapsed() >= grace)
    }
}

impl Pending {
    /// Take over a close that was started outside the gate
    fn adopt(&mut self, slot: &Slot) {
        let closing = slot.state().closing.take();
        if closing.is_some() {
            self.closing = closing;
        }
    }

    fn close(&mut self, store: Arc<KvStore>) {
        self.closing = close_in_background(store);
    }

    /// Wait for an in-flight close; the directory lock is free afterwards
    async fn settle_close(&mut self, identifier: &str) {
        if let Some(closing) = self.closing.as_mut() {
            if let Err(e) = closing.await {
                warn!("⚠️ Closing embedded store '{}' failed: {}", identifier, e);
            }
            self.closing = None;
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.inner.release(&self.slot);
    }
}

impl KvLease {
    pub fn identifier(&self) -> &str {
        self.store.identifier()
    }

    /// Whether two leases share one underlying handle
    pub fn same_handle(&self, other: &KvLease) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}

impl Deref for KvLease {
    type Target = KvStore;

    fn deref(&self) -> &KvStore {
        &self.store
    }
}

impl std::fmt::Debug for KvLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvLease")
            .field("identifier", &self.store.identifier())
            .finish()
    }
}

/// Drop the last reference to a store on a blocking thread
///
/// Without a runtime the store is closed inline.
fn close_in_background(store: Arc<KvStore>) -> Option<JoinHandle<()>> {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => Some(runtime.spawn_blocking(move || drop(store))),
        Err(_) => {
            drop(store);
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
