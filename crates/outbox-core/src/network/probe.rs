//! Platform connectivity probes

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

/// One reading of the platform's connectivity state
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivitySample {
    pub is_online: bool,
    pub rtt: Option<Duration>,
    pub downlink_mbps: Option<f64>,
}

impl ConnectivitySample {
    pub const fn online() -> Self {
        Self {
            is_online: true,
            rtt: None,
            downlink_mbps: None,
        }
    }

    pub const fn offline() -> Self {
        Self {
            is_online: false,
            rtt: None,
            downlink_mbps: None,
        }
    }

    #[must_use]
    pub const fn with_rtt(mut self, rtt: Duration) -> Self {
        self.rtt = Some(rtt);
        self
    }
}

/// Source of connectivity readings.
///
/// `None` means the platform exposes no connectivity API at all.
pub trait ConnectivityProbe: Send + Sync + 'static {
    fn sample(&self) -> impl Future<Output = Option<ConnectivitySample>> + Send;
}

/// Probe returning a fixed answer
#[derive(Debug, Clone)]
pub struct StaticProbe(Option<ConnectivitySample>);

impl StaticProbe {
    pub const fn new(sample: Option<ConnectivitySample>) -> Self {
        Self(sample)
    }

    /// Platform without a connectivity API
    pub const fn unsupported() -> Self {
        Self(None)
    }

    pub const fn online() -> Self {
        Self(Some(ConnectivitySample::online()))
    }

    pub const fn offline() -> Self {
        Self(Some(ConnectivitySample::offline()))
    }
}

impl ConnectivityProbe for StaticProbe {
    async fn sample(&self) -> Option<ConnectivitySample> {
        self.0.clone()
    }
}

/// Measures reachability and round-trip time with a TCP connect
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    /// `addr` is a `host:port` pair, e.g. the remote API's host on 443
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

impl ConnectivityProbe for TcpProbe {
    async fn sample(&self) -> Option<ConnectivitySample> {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_stream)) => Some(ConnectivitySample::online().with_rtt(started.elapsed())),
            Ok(Err(error)) => {
                tracing::debug!("Connectivity probe to {} failed: {}", self.addr, error);
                Some(ConnectivitySample::offline())
            }
            Err(_) => {
                tracing::debug!("Connectivity probe to {} timed out", self.addr);
                Some(ConnectivitySample::offline())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_probe_reports_online_for_listening_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(2));

        let sample = probe.sample().await.unwrap();
        assert!(sample.is_online);
        assert!(sample.rtt.is_some());
    }

    #[tokio::test]
    async fn test_tcp_probe_reports_offline_for_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(2));

        let sample = probe.sample().await.unwrap();
        assert!(!sample.is_online);
    }
}
