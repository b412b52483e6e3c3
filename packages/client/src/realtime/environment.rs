//! Host environment signals: page visibility and network reachability.
//!
//! The watcher folds host notifications into an [`EnvironmentSignal`] value
//! and tells observers when the client goes from inactive to active, which is
//! the moment a stalled connection is worth retrying.

use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicU64, Ordering},
};

use tokio::{sync::mpsc, task::JoinHandle};

use crate::sync::lock;

/// Snapshot of the host environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentSignal {
    pub page_visible: bool,
    pub network_online: bool,
}

impl Default for EnvironmentSignal {
    fn default() -> Self {
        Self {
            page_visible: true,
            network_online: true,
        }
    }
}

impl EnvironmentSignal {
    /// True iff the page is visible and the network is online
    pub fn is_active(&self) -> bool {
        self.page_visible && self.network_online
    }

    /// Recompute the signal after a host notification
    pub fn apply(self, event: HostEvent) -> Self {
        match event {
            HostEvent::VisibilityChanged { visible } => Self {
                page_visible: visible,
                ..self
            },
            HostEvent::NetworkChanged { online } => Self {
                network_online: online,
                ..self
            },
        }
    }
}

/// Notification raised by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    VisibilityChanged { visible: bool },
    NetworkChanged { online: bool },
}

type ActiveCallback = Arc<dyn Fn(EnvironmentSignal) + Send + Sync>;

struct WatcherInner {
    signal: Mutex<EnvironmentSignal>,
    observers: Mutex<Vec<(u64, ActiveCallback)>>,
    next_id: AtomicU64,
}

/// Tracks [`EnvironmentSignal`] and notifies on inactive -> active transitions
#[derive(Clone)]
pub struct EnvironmentWatcher {
    inner: Arc<WatcherInner>,
}

impl Default for EnvironmentWatcher {
    fn default() -> Self {
        Self::new(EnvironmentSignal::default())
    }
}

impl EnvironmentWatcher {
    pub fn new(initial: EnvironmentSignal) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                signal: Mutex::new(initial),
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Current signal
    pub fn signal(&self) -> EnvironmentSignal {
        *lock(&self.inner.signal)
    }

    /// Whether the client should actively try to stay connected
    pub fn is_active(&self) -> bool {
        self.signal().is_active()
    }

    /// Number of registered became-active observers
    pub fn observer_count(&self) -> usize {
        lock(&self.inner.observers).len()
    }

    /// Register a callback fired on every inactive -> active transition.
    ///
    /// The callback stays registered until the returned listener is
    /// unsubscribed or dropped.
    pub fn on_became_active<F>(&self, callback: F) -> ActiveListener
    where
        F: Fn(EnvironmentSignal) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.observers).push((id, Arc::new(callback)));

        ActiveListener {
            watcher: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Apply a host notification and fire observers if the client just became active.
    ///
    /// # Returns
    ///
    /// The recomputed signal
    pub fn handle(&self, event: HostEvent) -> EnvironmentSignal {
        let (previous, current) = {
            let mut signal = lock(&self.inner.signal);
            let previous = *signal;
            *signal = previous.apply(event);
            (previous, *signal)
        };

        match event {
            HostEvent::VisibilityChanged { visible: true } => {
                tracing::debug!("Page visible");
            }
            HostEvent::VisibilityChanged { visible: false } => {
                tracing::debug!("Page hidden - connection errors will not be surfaced");
            }
            HostEvent::NetworkChanged { online: true } => {
                tracing::info!("Network restored");
            }
            HostEvent::NetworkChanged { online: false } => {
                tracing::info!("Network lost - connection paused");
            }
        }

        if !previous.is_active() && current.is_active() {
            // Snapshot so callbacks may register or drop listeners
            let observers: Vec<ActiveCallback> = lock(&self.inner.observers)
                .iter()
                .map(|(_, callback)| callback.clone())
                .collect();
            for callback in observers {
                callback(current);
            }
        }

        current
    }

    /// Start consuming host notifications from a channel.
    ///
    /// Both host notification kinds arrive on the same channel; detaching the
    /// returned handle stops listening to all of them.
    pub fn listen(&self, mut events: mpsc::UnboundedReceiver<HostEvent>) -> HostListeners {
        let watcher = self.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                watcher.handle(event);
            }
            tracing::debug!("Host event source closed");
        });

        HostListeners { task: Some(task) }
    }
}

/// Registration returned by [`EnvironmentWatcher::on_became_active`]
#[must_use = "dropping the listener unregisters the callback"]
pub struct ActiveListener {
    watcher: Weak<WatcherInner>,
    id: u64,
}

impl ActiveListener {
    /// Remove the callback from the watcher
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for ActiveListener {
    fn drop(&mut self) {
        if let Some(inner) = self.watcher.upgrade() {
            lock(&inner.observers).retain(|(id, _)| *id != self.id);
        }
    }
}

/// Host notification listeners attached by [`EnvironmentWatcher::listen`]
#[must_use = "dropping the handle detaches the host listeners"]
pub struct HostListeners {
    task: Option<JoinHandle<()>>,
}

impl HostListeners {
    /// Stop listening to host notifications
    pub fn detach(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HostListeners {
    fn drop(&mut self) {
        self.abort();
    }
}
