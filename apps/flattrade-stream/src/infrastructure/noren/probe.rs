//! Network Reachability Probe
//!
//! Opens short TCP connections to independent public endpoints. The network
//! counts as up as soon as any one of them accepts.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::select_ok;
use tokio::net::TcpStream;

use crate::application::ports::ReachabilityProbe;

/// Endpoints probed by default.
pub const DEFAULT_PROBE_ENDPOINTS: [&str; 2] = ["8.8.8.8:53", "1.1.1.1:53"];

/// TCP connect probe.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    endpoints: Vec<String>,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe `endpoints`, giving each connect at most `timeout`.
    #[must_use]
    pub const fn new(endpoints: Vec<String>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }

    /// Probe the default public resolvers.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(
            DEFAULT_PROBE_ENDPOINTS
                .iter()
                .map(ToString::to_string)
                .collect(),
            timeout,
        )
    }

    async fn connect(&self, endpoint: &str) -> Result<(), String> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(format!("{endpoint}: {e}")),
            Err(_) => Err(format!("{endpoint}: timed out")),
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        if self.endpoints.is_empty() {
            return true;
        }

        let attempts = self
            .endpoints
            .iter()
            .map(|endpoint| Box::pin(self.connect(endpoint)));

        match select_ok(attempts).await {
            Ok(((), _)) => true,
            Err(last) => {
                tracing::debug!(error = %last, "Reachability probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn reachable_when_any_endpoint_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().to_string();

        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };

        let probe = TcpProbe::new(vec![closed, open], Duration::from_secs(1));
        assert!(probe.is_reachable().await);
    }

    #[tokio::test]
    async fn unreachable_when_all_endpoints_fail() {
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };

        let probe = TcpProbe::new(vec![closed], Duration::from_secs(1));
        assert!(!probe.is_reachable().await);
    }

    #[tokio::test]
    async fn no_endpoints_counts_as_reachable() {
        let probe = TcpProbe::new(Vec::new(), Duration::from_millis(10));
        assert!(probe.is_reachable().await);
    }
}
