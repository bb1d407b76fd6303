//! Online/offline tracking and reconnect triggers.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Online,
    Offline,
    Unknown,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        matches!(self, NetworkStatus::Online)
    }
}

impl From<bool> for NetworkStatus {
    fn from(online: bool) -> Self {
        if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        }
    }
}

/// Connectivity monitor.
///
/// The platform layer reports status through [`set_status`](Self::set_status);
/// a single listener task started with [`start`](Self::start) runs the
/// reconnect callback once per offline→online transition.
pub struct ConnectivityMonitor {
    status: watch::Sender<NetworkStatus>,
    listener: Mutex<Option<JoinHandle<()>>>,
    startup_delay: Duration,
}

impl ConnectivityMonitor {
    pub fn new(initial: NetworkStatus, startup_delay: Duration) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            status,
            listener: Mutex::new(None),
            startup_delay,
        }
    }

    pub fn current_status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current_status().is_online()
    }

    /// Report a connectivity change from the platform.
    pub fn set_status(&self, status: NetworkStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            match status {
                NetworkStatus::Online => info!("[Connectivity] Network: online"),
                NetworkStatus::Offline => warn!("[Connectivity] Network: offline"),
                NetworkStatus::Unknown => info!("[Connectivity] Network: unknown"),
            }
        }
    }

    pub fn set_online(&self, online: bool) {
        self.set_status(NetworkStatus::from(online));
    }

    /// Watch status changes directly.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.listener
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Start listening for reconnects. Must be called inside a tokio runtime.
    ///
    /// Returns `false` without registering anything when a listener is
    /// already running. If the device is online at start, `on_online` runs
    /// once after the startup delay so auth state can settle first.
    pub fn start<F, Fut>(&self, on_online: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(mut guard) = self.listener.lock() else {
            return false;
        };
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                warn!("[Connectivity] Listener already running; ignoring duplicate start");
                return false;
            }
            guard.take();
        }

        let mut receiver = self.status.subscribe();
        let startup_delay = self.startup_delay;
        let handle = tokio::spawn(async move {
            let mut was_online = receiver.borrow_and_update().is_online();
            if was_online {
                tokio::time::sleep(startup_delay).await;
                if receiver.borrow().is_online() {
                    on_online().await;
                }
                was_online = receiver.borrow_and_update().is_online();
            }

            while receiver.changed().await.is_ok() {
                let now_online = receiver.borrow_and_update().is_online();
                if now_online && !was_online {
                    info!("[Connectivity] Connection restored, triggering sync");
                    on_online().await;
                }
                was_online = now_online;
            }
        });
        *guard = Some(handle);
        info!("[Connectivity] Listener registered");
        true
    }

    /// Stop listening. Safe to call when never started.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
                info!("[Connectivity] Listener stopped");
            }
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
