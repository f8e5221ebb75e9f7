//! Glove registry for discovering and managing gloves.
//!
//! The registry owns every glove seen on this host, assigns each a stable
//! ordinal index in discovery order, routes transport events to the right
//! glove and fans decoded updates out to listeners.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::ble::connection::ConnectionState;
use crate::ble::transport::{DeviceAddress, GattTransport, TransportEvent};
use crate::ble::uuids::UuidCatalog;
use crate::config::RegistryConfig;
use crate::data::glove_state::{GloveState, Handedness};
use crate::error::{Error, Result};
use crate::fusion::FusionBridge;
use crate::glove::{Glove, GloveOutcome};

/// Receives glove updates.
///
/// The registry holds listeners weakly: dropping the last `Arc` to a
/// listener unregisters it.
pub trait GloveListener: Send + Sync {
    /// Called with the glove's index and its new snapshot.
    fn on_glove_changed(&self, index: usize, state: &GloveState);
}

impl<F> GloveListener for F
where
    F: Fn(usize, &GloveState) + Send + Sync,
{
    fn on_glove_changed(&self, index: usize, state: &GloveState) {
        self(index, state)
    }
}

/// Update delivered through [`GloveRegistry::subscribe`].
#[derive(Debug, Clone)]
pub struct GloveUpdate {
    /// Index of the glove.
    pub index: usize,
    /// The new snapshot.
    pub state: Arc<GloveState>,
}

/// What [`GloveRegistry::handle_event`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Unknown device, stale link or dropped payload.
    Ignored,
    /// A glove changed connection state.
    StateChanged {
        /// Index of the glove.
        index: usize,
        /// Its new connection state.
        state: ConnectionState,
    },
    /// A glove published a new snapshot and listeners were notified.
    Updated {
        /// Index of the glove.
        index: usize,
    },
    /// A device turned out not to be a glove and was excluded.
    NotAGlove {
        /// Index the device was given.
        index: usize,
        /// Its address.
        address: DeviceAddress,
    },
}

#[derive(Default)]
struct Entries {
    by_address: HashMap<DeviceAddress, usize>,
    gloves: Vec<Arc<Glove>>,
}

/// Central registry of gloves.
pub struct GloveRegistry {
    /// Transport shared by all gloves.
    transport: Arc<dyn GattTransport>,
    /// Identifier catalog.
    catalog: UuidCatalog,
    /// Fusion engine shared by all gloves.
    fusion: Arc<RwLock<FusionBridge>>,
    /// Configuration.
    config: RegistryConfig,
    /// Gloves in discovery order.
    entries: Mutex<Entries>,
    /// Registered change listeners.
    listeners: RwLock<Vec<Weak<dyn GloveListener>>>,
    /// Update channel.
    update_tx: broadcast::Sender<GloveUpdate>,
    /// Background task handle.
    background_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
    /// Running flag.
    is_running: Arc<AtomicBool>,
    /// Set while a background discovery pass is in flight.
    is_discovering: Arc<AtomicBool>,
}

impl GloveRegistry {
    /// Create an empty registry.
    pub fn new(
        transport: Arc<dyn GattTransport>,
        catalog: UuidCatalog,
        fusion: FusionBridge,
        config: RegistryConfig,
    ) -> Self {
        let (update_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));

        Self {
            transport,
            catalog,
            fusion: Arc::new(RwLock::new(fusion)),
            config,
            entries: Mutex::new(Entries::default()),
            listeners: RwLock::new(Vec::new()),
            update_tx,
            background_handle: RwLock::new(None),
            is_running: Arc::new(AtomicBool::new(false)),
            is_discovering: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // === Discovery ===

    /// Enumerate bonded devices advertising the glove service.
    ///
    /// New devices get the next index and a connection attempt; known ones
    /// are asked to reconnect, which does nothing while they are connected.
    /// Returns the indices assigned by this pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot list bonded devices.
    pub async fn discover(&self) -> Result<Vec<usize>> {
        let devices = self
            .transport
            .list_bonded_devices_advertising(self.catalog.service_id())
            .await?;

        trace!("Discovery found {} bonded devices", devices.len());

        let mut added = Vec::new();
        for device in devices {
            let (index, is_new) = self.connect_address(device.address);
            if is_new {
                added.push(index);
            }
        }

        Ok(added)
    }

    /// Handle a bond event for a single device. Returns its index.
    pub fn handle_bonded(&self, address: DeviceAddress) -> usize {
        self.connect_address(address).0
    }

    /// Find or create the glove for `address`, then request a connection.
    fn connect_address(&self, address: DeviceAddress) -> (usize, bool) {
        let (index, glove, is_new) = {
            let mut entries = self.entries.lock();

            match entries.by_address.get(&address) {
                Some(&index) => (index, entries.gloves[index].clone(), false),
                None => {
                    let index = entries.gloves.len();
                    let glove = Arc::new(Glove::new(
                        address.clone(),
                        self.catalog,
                        self.transport.clone(),
                        self.fusion.clone(),
                    ));
                    entries.gloves.push(glove.clone());
                    entries.by_address.insert(address, index);
                    (index, glove, true)
                }
            }
        };

        if is_new {
            info!("Discovered new glove {} at index {}", glove.address(), index);
        }

        glove.connect();
        (index, is_new)
    }

    // === Events ===

    /// Route a transport event to its glove.
    ///
    /// Updates are delivered to listeners and subscribers before this returns.
    pub fn handle_event(&self, event: TransportEvent) -> EventOutcome {
        let found = {
            let entries = self.entries.lock();
            entries
                .by_address
                .get(&event.link().address)
                .map(|&index| (index, entries.gloves[index].clone()))
        };

        let Some((index, glove)) = found else {
            trace!("Dropping {} for unknown device {}", event.kind(), event.link());
            return EventOutcome::Ignored;
        };

        match glove.handle_event(&event) {
            GloveOutcome::Ignored => EventOutcome::Ignored,
            GloveOutcome::StateChanged(state) => EventOutcome::StateChanged { index, state },
            GloveOutcome::Updated(state) => {
                self.notify(index, state);
                EventOutcome::Updated { index }
            }
            GloveOutcome::NotAGlove => EventOutcome::NotAGlove {
                index,
                address: glove.address().clone(),
            },
        }
    }

    fn notify(&self, index: usize, state: Arc<GloveState>) {
        let listeners: Vec<Arc<dyn GloveListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in listeners {
            listener.on_glove_changed(index, &state);
        }

        // No subscribers is fine
        let _ = self.update_tx.send(GloveUpdate { index, state });
    }

    // === Listeners ===

    /// Register a change listener.
    ///
    /// Only a weak reference is kept. Returns `false` if the listener was
    /// already registered.
    pub fn add_change_listener(&self, listener: &Arc<dyn GloveListener>) -> bool {
        let weak = Arc::downgrade(listener);
        let mut listeners = self.listeners.write();
        listeners.retain(|l| l.strong_count() > 0);

        if listeners.iter().any(|l| l.ptr_eq(&weak)) {
            return false;
        }

        listeners.push(weak);
        true
    }

    /// Unregister a change listener. Returns `false` if it was not registered.
    pub fn remove_change_listener(&self, listener: &Arc<dyn GloveListener>) -> bool {
        let weak = Arc::downgrade(listener);
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.strong_count() > 0 && !l.ptr_eq(&weak));
        listeners.len() != before
    }

    /// Subscribe to glove updates.
    pub fn subscribe(&self) -> broadcast::Receiver<GloveUpdate> {
        self.update_tx.subscribe()
    }

    /// Wait for the next snapshot published by the glove at `index`.
    ///
    /// Only updates published after the call are considered. Someone else
    /// must be driving events, usually the loop from [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`Error::GloveNotFound`] if no glove has that index, and
    /// [`Error::Timeout`] if nothing arrives within `timeout`.
    pub async fn wait_for_update(&self, index: usize, timeout: Duration) -> Result<Arc<GloveState>> {
        if index >= self.count() {
            return Err(Error::GloveNotFound { index });
        }

        let mut updates = self.subscribe();
        let next = async {
            loop {
                match updates.recv().await {
                    Ok(update) if update.index == index => return Ok(update.state),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Update waiter for glove {} skipped {} updates", index, skipped);
                    }
                    Err(RecvError::Closed) => {
                        return Err(Error::Internal("update channel closed".to_string()));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, next)
            .await
            .map_err(|_| Error::Timeout { index })?
    }

    // === Queries ===

    /// Number of gloves seen so far.
    ///
    /// Devices excluded as not being gloves keep their index and are
    /// counted; their snapshots have [`GloveState::excluded`] set.
    pub fn count(&self) -> usize {
        self.entries.lock().gloves.len()
    }

    /// Latest snapshot of the glove at `index`.
    ///
    /// Excluded devices are returned too; check [`GloveState::excluded`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::GloveNotFound`] if no glove has that index.
    pub fn get(&self, index: usize) -> Result<GloveState> {
        self.entries
            .lock()
            .gloves
            .get(index)
            .map(|g| (*g.state()).clone())
            .ok_or(Error::GloveNotFound { index })
    }

    /// Index of the glove with `address`.
    pub fn index_of(&self, address: &DeviceAddress) -> Option<usize> {
        self.entries.lock().by_address.get(address).copied()
    }

    /// First ready glove for `hand`, with its index.
    pub fn get_by_hand(&self, hand: Handedness) -> Option<(usize, GloveState)> {
        self.entries
            .lock()
            .gloves
            .iter()
            .enumerate()
            .map(|(index, glove)| (index, glove.state()))
            .find(|(_, state)| state.is_ready() && state.handedness() == Some(hand))
            .map(|(index, state)| (index, (*state).clone()))
    }

    // === Lifecycle ===

    /// Start the background loop.
    ///
    /// The loop feeds `events` into [`handle_event`](Self::handle_event) and
    /// runs [`discover`](Self::discover) every
    /// [`discovery_interval`](RegistryConfig::discovery_interval), starting
    /// immediately. Discovery runs in its own task so events keep flowing
    /// while the adapter is walked; a tick is skipped while a pass is still
    /// in flight. Must be called within a tokio runtime.
    pub fn start(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            debug!("Registry already running");
            return;
        }

        info!("Starting glove registry");

        let registry = Arc::downgrade(self);
        let is_running = self.is_running.clone();
        let is_discovering = self.is_discovering.clone();
        let interval = self.config.discovery_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while is_running.load(Ordering::SeqCst) {
                tokio::select! {
                    event = events.recv() => {
                        let Some(event) = event else {
                            debug!("Transport event channel closed");
                            break;
                        };
                        let Some(registry) = registry.upgrade() else { break };
                        registry.handle_event(event);
                    }
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        if is_discovering.swap(true, Ordering::SeqCst) {
                            trace!("Previous discovery still running");
                            continue;
                        }

                        let is_discovering = is_discovering.clone();
                        tokio::spawn(async move {
                            if let Err(e) = registry.discover().await {
                                warn!("Glove discovery failed: {}", e);
                            }
                            is_discovering.store(false, Ordering::SeqCst);
                        });
                    }
                }
            }

            is_running.store(false, Ordering::SeqCst);
            debug!("Registry background task ended");
        });

        *self.background_handle.write() = Some(handle);
    }

    /// Stop the background loop.
    pub async fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping glove registry");

        let handle = self.background_handle.write().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Check if the background loop is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Stop the loop, disconnect every glove and release the fusion engine.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down glove registry");

        self.stop().await;

        let gloves: Vec<_> = self.entries.lock().gloves.clone();
        for glove in gloves {
            glove.disconnect();
        }

        self.fusion.write().release();

        Ok(())
    }
}

impl Drop for GloveRegistry {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.background_handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for GloveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GloveRegistry")
            .field("count", &self.count())
            .field("config", &self.config)
            .field("is_running", &self.is_running())
            .finish()
    }
}
