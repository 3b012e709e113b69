//! Connectivity monitoring.
//!
//! [`NetworkMonitor`] owns the process-wide [`NetworkStatus`]. It samples a
//! [`ConnectivityProbe`] on start, on explicit refreshes and on platform
//! events, and tells listeners when the online flag or the quality class
//! changes. Metric-only updates are stored without waking anyone.

mod probe;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use probe::{ConnectivityProbe, ConnectivitySample, StaticProbe, TcpProbe};

use crate::config::QualityThresholds;
use crate::models::{NetworkQuality, NetworkStatus};
use crate::subscription::Subscription;
use crate::util::unix_millis_now;

/// Platform notification fed into [`NetworkMonitor::handle_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
    /// Link metrics changed without a connectivity flip
    Quality {
        rtt: Option<Duration>,
        downlink_mbps: Option<f64>,
    },
    /// The app regained focus; resample
    Focus,
}

type Listener = Arc<dyn Fn(&NetworkStatus) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Object-safe view of a probe so the monitor need not be generic
trait ErasedProbe: Send + Sync {
    fn sample_boxed(&self) -> Pin<Box<dyn Future<Output = Option<ConnectivitySample>> + Send + '_>>;
}

impl<P: ConnectivityProbe> ErasedProbe for P {
    fn sample_boxed(&self) -> Pin<Box<dyn Future<Output = Option<ConnectivitySample>> + Send + '_>> {
        Box::pin(self.sample())
    }
}

struct MonitorInner {
    probe: Box<dyn ErasedProbe>,
    thresholds: QualityThresholds,
    state: watch::Sender<NetworkStatus>,
    listeners: Mutex<Listeners>,
    fallback_warned: AtomicBool,
}

/// Shared connectivity monitor; clones observe the same state
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("NetworkMonitor")
            .field("status", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl NetworkMonitor {
    /// Create a monitor that starts out optimistic (online, good quality)
    pub fn new(probe: impl ConnectivityProbe, thresholds: QualityThresholds) -> Self {
        let (state, _) = watch::channel(NetworkStatus::optimistic());
        Self {
            inner: Arc::new(MonitorInner {
                probe: Box::new(probe),
                thresholds,
                state,
                listeners: Mutex::new(Listeners::default()),
                fallback_warned: AtomicBool::new(false),
            }),
        }
    }

    /// Take the first sample
    pub async fn start(&self) -> NetworkStatus {
        self.refresh().await
    }

    /// Resample the probe and publish the result
    pub async fn refresh(&self) -> NetworkStatus {
        let sample = match self.inner.probe.sample_boxed().await {
            Some(sample) => sample,
            None => {
                if !self.inner.fallback_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "No connectivity API available, assuming online with good quality"
                    );
                }
                ConnectivitySample::online()
            }
        };
        self.apply(&sample)
    }

    pub async fn handle_event(&self, event: ConnectivityEvent) -> NetworkStatus {
        let current = self.status();
        let sample = match event {
            ConnectivityEvent::Focus => return self.refresh().await,
            ConnectivityEvent::Online => ConnectivitySample {
                is_online: true,
                rtt: current.rtt_ms.map(Duration::from_millis),
                downlink_mbps: current.downlink_mbps,
            },
            ConnectivityEvent::Offline => ConnectivitySample::offline(),
            ConnectivityEvent::Quality { rtt, downlink_mbps } => ConnectivitySample {
                is_online: current.is_online,
                rtt,
                downlink_mbps,
            },
        };
        self.apply(&sample)
    }

    pub fn status(&self) -> NetworkStatus {
        self.inner.state.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner.state.borrow().is_online
    }

    /// Receiver that wakes on observable changes only
    pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
        self.inner.state.subscribe()
    }

    /// Call `listener` on every observable change until the subscription drops
    pub fn on_change(&self, listener: impl Fn(&NetworkStatus) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut listeners = self.lock_listeners();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::new(listener)));
            id
        };

        let inner: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner.listeners)
                    .entries
                    .retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Resample every `interval` on a background task
    pub fn spawn_polling(&self, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.refresh().await;
            }
        })
    }

    fn apply(&self, sample: &ConnectivitySample) -> NetworkStatus {
        let next = NetworkStatus {
            is_online: sample.is_online,
            quality: classify(sample, &self.inner.thresholds),
            rtt_ms: sample
                .rtt
                .map(|rtt| u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX)),
            downlink_mbps: sample.downlink_mbps,
            checked_at: unix_millis_now(),
        };

        let mut previous = None;
        let changed = self.inner.state.send_if_modified(|current| {
            let changed = next.differs_observably(current);
            previous = Some((current.is_online, current.quality));
            *current = next.clone();
            changed
        });

        if changed {
            if let Some((was_online, was_quality)) = previous {
                if was_online == next.is_online {
                    tracing::debug!(
                        "Network quality changed: {:?} -> {:?}",
                        was_quality,
                        next.quality
                    );
                } else if next.is_online {
                    tracing::info!("Network is back online ({:?})", next.quality);
                } else {
                    tracing::info!("Network went offline");
                }
            }
            self.notify(&next);
        }
        next
    }

    fn notify(&self, status: &NetworkStatus) {
        let listeners: Vec<Listener> = self
            .lock_listeners()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(status);
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Listeners> {
        lock(&self.inner.listeners)
    }
}

fn lock(listeners: &Mutex<Listeners>) -> MutexGuard<'_, Listeners> {
    listeners
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

const fn rank(quality: NetworkQuality) -> u8 {
    match quality {
        NetworkQuality::Excellent => 0,
        NetworkQuality::Good => 1,
        NetworkQuality::Poor => 2,
    }
}

/// Quality class of a sample: the worse of the RTT and downlink classes.
/// Offline is always poor; a sample without metrics is good.
pub fn classify(sample: &ConnectivitySample, thresholds: &QualityThresholds) -> NetworkQuality {
    if !sample.is_online {
        return NetworkQuality::Poor;
    }

    let by_rtt = sample.rtt.map(|rtt| {
        let millis = rtt.as_millis();
        if millis < u128::from(thresholds.excellent_rtt_ms) {
            NetworkQuality::Excellent
        } else if millis < u128::from(thresholds.good_rtt_ms) {
            NetworkQuality::Good
        } else {
            NetworkQuality::Poor
        }
    });
    let by_downlink = sample.downlink_mbps.map(|mbps| {
        if mbps >= thresholds.excellent_downlink_mbps {
            NetworkQuality::Excellent
        } else if mbps >= thresholds.good_downlink_mbps {
            NetworkQuality::Good
        } else {
            NetworkQuality::Poor
        }
    });

    match (by_rtt, by_downlink) {
        (Some(rtt), Some(downlink)) => {
            if rank(rtt) >= rank(downlink) {
                rtt
            } else {
                downlink
            }
        }
        (Some(quality), None) | (None, Some(quality)) => quality,
        (None, None) => NetworkQuality::Good,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedProbe(Mutex<VecDeque<Option<ConnectivitySample>>>);

    impl ScriptedProbe {
        fn new(samples: Vec<Option<ConnectivitySample>>) -> Self {
            Self(Mutex::new(samples.into()))
        }
    }

    impl ConnectivityProbe for ScriptedProbe {
        async fn sample(&self) -> Option<ConnectivitySample> {
            self.0.lock().unwrap().pop_front().flatten()
        }
    }

    fn counting(monitor: &NetworkMonitor) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let subscription = monitor.on_change(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, subscription)
    }

    #[test]
    fn test_classify_takes_worse_dimension() {
        let thresholds = QualityThresholds::default();
        let fast = ConnectivitySample::online().with_rtt(Duration::from_millis(40));
        assert_eq!(classify(&fast, &thresholds), NetworkQuality::Excellent);

        let slow_link = ConnectivitySample {
            downlink_mbps: Some(0.5),
            ..fast.clone()
        };
        assert_eq!(classify(&slow_link, &thresholds), NetworkQuality::Poor);

        let middling = ConnectivitySample::online().with_rtt(Duration::from_millis(250));
        assert_eq!(classify(&middling, &thresholds), NetworkQuality::Good);
        assert_eq!(
            classify(&ConnectivitySample::online(), &thresholds),
            NetworkQuality::Good
        );
        assert_eq!(
            classify(&ConnectivitySample::offline(), &thresholds),
            NetworkQuality::Poor
        );
    }

    #[tokio::test]
    async fn test_unsupported_platform_is_optimistic() {
        let monitor = NetworkMonitor::new(StaticProbe::unsupported(), QualityThresholds::default());
        let status = monitor.start().await;
        assert!(status.is_online);
        assert_eq!(status.quality, NetworkQuality::Good);
    }

    #[tokio::test]
    async fn test_listeners_hear_flips_only() {
        let monitor = NetworkMonitor::new(StaticProbe::online(), QualityThresholds::default());
        let (count, _subscription) = counting(&monitor);

        monitor.handle_event(ConnectivityEvent::Offline).await;
        monitor.handle_event(ConnectivityEvent::Offline).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_online());

        monitor.handle_event(ConnectivityEvent::Online).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_metric_change_within_class_is_silent() {
        let monitor = NetworkMonitor::new(StaticProbe::online(), QualityThresholds::default());
        let (count, _subscription) = counting(&monitor);

        monitor
            .handle_event(ConnectivityEvent::Quality {
                rtt: Some(Duration::from_millis(150)),
                downlink_mbps: None,
            })
            .await;
        monitor
            .handle_event(ConnectivityEvent::Quality {
                rtt: Some(Duration::from_millis(200)),
                downlink_mbps: None,
            })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.status().rtt_ms, Some(200));

        monitor
            .handle_event(ConnectivityEvent::Quality {
                rtt: Some(Duration::from_millis(900)),
                downlink_mbps: None,
            })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.status().quality, NetworkQuality::Poor);
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_delivery() {
        let monitor = NetworkMonitor::new(StaticProbe::online(), QualityThresholds::default());
        let (count, subscription) = counting(&monitor);
        drop(subscription);

        monitor.handle_event(ConnectivityEvent::Offline).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_focus_resamples_probe() {
        let probe = ScriptedProbe::new(vec![
            Some(ConnectivitySample::offline()),
            Some(ConnectivitySample::online()),
        ]);
        let monitor = NetworkMonitor::new(probe, QualityThresholds::default());
        let mut receiver = monitor.watch();

        assert!(!monitor.start().await.is_online);
        assert!(receiver.has_changed().unwrap());
        receiver.borrow_and_update();

        monitor.handle_event(ConnectivityEvent::Focus).await;
        assert!(receiver.has_changed().unwrap());
        assert!(receiver.borrow_and_update().is_online);
    }
}
