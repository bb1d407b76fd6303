//! Periodic backend reachability check for hosts with no native network signal.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest::header::HeaderValue;
use sprout_core::sync::{ConnectivityMonitor, NetworkStatus};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{RemoteApiError, Result};

const PROBE_TIMEOUT_SECS: u64 = 5;

pub struct ReachabilityProbe {
    client: reqwest::Client,
    url: String,
    api_key: HeaderValue,
}

impl ReachabilityProbe {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()?;
        let api_key = HeaderValue::from_str(anon_key)
            .map_err(|_| RemoteApiError::auth("Invalid API key format"))?;

        Ok(Self {
            client,
            url: format!("{}/rest/v1/", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    /// Any HTTP response counts as reachable, whatever its status.
    pub async fn check(&self) -> NetworkStatus {
        match self
            .client
            .head(&self.url)
            .header("apikey", self.api_key.clone())
            .send()
            .await
        {
            Ok(response) => {
                debug!("[Connectivity] Probe answered {}", response.status());
                NetworkStatus::Online
            }
            Err(err) => {
                debug!("[Connectivity] Probe failed: {}", err);
                NetworkStatus::Offline
            }
        }
    }

    /// Probe every `interval` and report the result to `monitor`.
    pub fn spawn(self, monitor: Arc<ConnectivityMonitor>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.set_status(self.check().await);
            }
        })
    }
}
