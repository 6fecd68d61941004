//! # Network Monitor
//!
//! Debounced connectivity signal.
//!
//! ## Signal Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Network Monitor                                   │
//! │                                                                         │
//! │  platform adapter ──► report(online)      raw watch channel            │
//! │                             │                                           │
//! │                             ▼                                           │
//! │                  ┌─────────────────────┐                               │
//! │                  │   debounce task     │  waits until the raw signal   │
//! │                  │                     │  is quiet for `debounce`      │
//! │                  └──────────┬──────────┘                               │
//! │                             │ only if the settled value differs        │
//! │                             ▼                                           │
//! │          state watch channel ──► is_online() / subscribe()             │
//! │          listeners           ──► on_change(listener)                   │
//! │                                                                         │
//! │  online ─► offline ─► online within the window: no transition at all   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Listeners run on the debounce task, never inside `report()`, so a
//! listener may report or trigger a sync without recursing into itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Listener = Arc<dyn Fn(bool) + Send + Sync>;
type ListenerMap = Mutex<HashMap<u64, Listener>>;

fn lock_listeners(listeners: &ListenerMap) -> MutexGuard<'_, HashMap<u64, Listener>> {
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Network Monitor
// =============================================================================

/// Observes connectivity and exposes a debounced online/offline state.
pub struct NetworkMonitor {
    raw_tx: watch::Sender<bool>,
    state_tx: Arc<watch::Sender<bool>>,
    listeners: Arc<ListenerMap>,
    next_listener_id: AtomicU64,
    task: JoinHandle<()>,
}

impl NetworkMonitor {
    /// Creates a monitor and spawns its debounce task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(initially_online: bool, debounce: Duration) -> Self {
        let (raw_tx, raw_rx) = watch::channel(initially_online);
        let (state_tx, _) = watch::channel(initially_online);
        let state_tx = Arc::new(state_tx);
        let listeners: Arc<ListenerMap> = Arc::new(Mutex::new(HashMap::new()));

        let task = tokio::spawn(Self::debounce_loop(
            raw_rx,
            state_tx.clone(),
            listeners.clone(),
            debounce,
        ));

        NetworkMonitor {
            raw_tx,
            state_tx,
            listeners,
            next_listener_id: AtomicU64::new(0),
            task,
        }
    }

    /// Feeds a raw connectivity reading from the platform.
    pub fn report(&self, online: bool) {
        let changed = self.raw_tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            debug!(online, "Raw connectivity change reported");
        }
    }

    /// Current debounced state.
    pub fn is_online(&self) -> bool {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every debounced transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state_tx.subscribe()
    }

    /// Registers a listener called once per debounced transition.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock_listeners(&self.listeners).insert(id, Arc::new(listener));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        lock_listeners(&self.listeners).len()
    }

    async fn debounce_loop(
        mut raw_rx: watch::Receiver<bool>,
        state_tx: Arc<watch::Sender<bool>>,
        listeners: Arc<ListenerMap>,
        debounce: Duration,
    ) {
        loop {
            if raw_rx.changed().await.is_err() {
                break;
            }

            // Keep extending the window while the signal flaps.
            loop {
                match tokio::time::timeout(debounce, raw_rx.changed()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) => return,
                    Err(_) => break,
                }
            }

            let settled = *raw_rx.borrow_and_update();
            if settled == *state_tx.borrow() {
                debug!(online = settled, "Connectivity flap collapsed, no transition");
                continue;
            }

            state_tx.send_replace(settled);
            info!(online = settled, "Connectivity changed");

            let snapshot: Vec<Listener> = lock_listeners(&listeners).values().cloned().collect();
            for listener in snapshot {
                listener(settled);
            }
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Handle for a listener registered with [`NetworkMonitor::on_change`].
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl Subscription {
    /// Removes the listener now.
    pub fn unsubscribe(self) {}

    /// Keeps the listener registered for the monitor's whole lifetime.
    pub fn detach(mut self) {
        self.listeners = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock_listeners(&listeners).remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const DEBOUNCE: Duration = Duration::from_millis(500);

    async fn settle() {
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_after_quiet_period() {
        let monitor = NetworkMonitor::new(false, DEBOUNCE);

        monitor.report(true);
        assert!(!monitor.is_online());

        settle().await;
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_collapses_to_final_state() {
        let monitor = NetworkMonitor::new(false, DEBOUNCE);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = monitor.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for online in [true, false, true, false, true] {
            monitor.report(online);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        settle().await;

        assert!(monitor.is_online());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_back_to_original_is_not_a_transition() {
        let monitor = NetworkMonitor::new(true, DEBOUNCE);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = monitor.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.report(false);
        monitor.report(true);
        settle().await;

        assert!(monitor.is_online());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_notifications() {
        let monitor = NetworkMonitor::new(false, DEBOUNCE);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = monitor.on_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(monitor.listener_count(), 1);

        monitor.report(true);
        settle().await;
        sub.unsubscribe();
        assert_eq!(monitor.listener_count(), 0);

        monitor.report(false);
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_may_report_without_recursion() {
        let monitor = Arc::new(NetworkMonitor::new(false, DEBOUNCE));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner = Arc::downgrade(&monitor);
        monitor
            .on_change(move |online| {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(m) = inner.upgrade() {
                    m.report(online);
                }
            })
            .detach();

        monitor.report(true);
        settle().await;
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_transition() {
        let monitor = NetworkMonitor::new(false, DEBOUNCE);
        let mut rx = monitor.subscribe();

        monitor.report(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
