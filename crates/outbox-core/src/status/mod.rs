//! Process-wide sync status and the merged, debounced view UIs observe.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::models::{NetworkStatus, SyncStatus};
use crate::network::NetworkMonitor;
use crate::subscription::Subscription;

/// Shared owner of the [`SyncStatus`]; clones publish to the same channel
#[derive(Debug, Clone)]
pub struct StatusHandle {
    sender: Arc<watch::Sender<SyncStatus>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(SyncStatus::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.sender.borrow().clone()
    }

    /// Apply `change` atomically and notify observers
    pub fn update(&self, change: impl FnOnce(&mut SyncStatus)) {
        self.sender.send_modify(change);
    }

    /// Apply `change`; observers are notified only when it returns `true`
    pub fn update_if(&self, change: impl FnOnce(&mut SyncStatus) -> bool) -> bool {
        self.sender.send_if_modified(change)
    }

    pub fn replace(&self, status: SyncStatus) {
        self.sender.send_replace(status);
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.sender.subscribe()
    }
}

/// Everything a UI shows about offline state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxStatus {
    pub network: NetworkStatus,
    pub sync: SyncStatus,
}

/// Merges network and sync status into debounced [`OutboxStatus`] emissions
#[derive(Debug, Clone)]
pub struct StatusAggregator {
    network: NetworkMonitor,
    status: StatusHandle,
    debounce: Duration,
}

impl StatusAggregator {
    pub const fn new(network: NetworkMonitor, status: StatusHandle, debounce: Duration) -> Self {
        Self {
            network,
            status,
            debounce,
        }
    }

    pub fn snapshot(&self) -> OutboxStatus {
        OutboxStatus {
            network: self.network.status(),
            sync: self.status.snapshot(),
        }
    }

    /// Deliver the current snapshot now, then one snapshot per burst of
    /// changes. Changes landing inside the debounce window are folded into
    /// the emission that ends it, so the final state is always delivered.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, callback: impl Fn(&OutboxStatus) + Send + Sync + 'static) -> Subscription {
        let mut network = self.network.watch();
        let mut sync = self.status.subscribe();
        let debounce = self.debounce;

        callback(&OutboxStatus {
            network: network.borrow_and_update().clone(),
            sync: sync.borrow_and_update().clone(),
        });

        let task = tokio::spawn(async move {
            loop {
                let closed = tokio::select! {
                    changed = network.changed() => changed.is_err(),
                    changed = sync.changed() => changed.is_err(),
                };
                if closed {
                    break;
                }
                if !debounce.is_zero() {
                    tokio::time::sleep(debounce).await;
                }

                let snapshot = OutboxStatus {
                    network: network.borrow_and_update().clone(),
                    sync: sync.borrow_and_update().clone(),
                };
                callback(&snapshot);
            }
            tracing::debug!("Status subscription ended: source closed");
        });
        Subscription::from_task(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityThresholds;
    use crate::network::{ConnectivityEvent, StaticProbe};
    use std::sync::Mutex;

    fn aggregator() -> (NetworkMonitor, StatusHandle, StatusAggregator) {
        let network = NetworkMonitor::new(StaticProbe::online(), QualityThresholds::default());
        let status = StatusHandle::new();
        let aggregator =
            StatusAggregator::new(network.clone(), status.clone(), Duration::from_millis(50));
        (network, status, aggregator)
    }

    fn recorder() -> (
        Arc<Mutex<Vec<OutboxStatus>>>,
        impl Fn(&OutboxStatus) + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |status: &OutboxStatus| {
            sink.lock().unwrap().push(status.clone());
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_coalesced_into_one_emission() {
        let (_network, status, aggregator) = aggregator();
        let (seen, callback) = recorder();
        let _subscription = aggregator.subscribe(callback);
        assert_eq!(seen.lock().unwrap().len(), 1);

        for pending in 1..=10 {
            status.update(|sync| sync.pending_changes = pending);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].sync.pending_changes, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_change_is_delivered() {
        let (network, _status, aggregator) = aggregator();
        let (seen, callback) = recorder();
        let _subscription = aggregator.subscribe(callback);

        network.handle_event(ConnectivityEvent::Offline).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].network.is_online);
        assert!(!seen[1].network.is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_subscription_stops_emissions() {
        let (_network, status, aggregator) = aggregator();
        let (seen, callback) = recorder();
        let subscription = aggregator.subscribe(callback);
        subscription.unsubscribe();

        status.update(|sync| sync.pending_changes = 3);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_merges_sources() {
        let (_network, status, aggregator) = aggregator();
        status.update(|sync| sync.retry_count = 2);
        let snapshot = aggregator.snapshot();
        assert!(snapshot.network.is_online);
        assert_eq!(snapshot.sync.retry_count, 2);
    }
}
