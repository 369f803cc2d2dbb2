//! GPS location bridge
//!
//! Keeps the latest fix, provider status and provider availability reported
//! by a [`LocationProvider`] so hosts can poll them.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bridge_shared::{Location, ProviderStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events pushed by a location provider
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    LocationChanged(Location),
    StatusChanged(ProviderStatus),
    ProviderEnabled,
    ProviderDisabled,
}

/// Source of location updates
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Start delivering events, at most one fix per `min_interval`
    async fn request_updates(&self, min_interval: Duration) -> Result<mpsc::Receiver<LocationEvent>>;

    /// Stop delivering events
    async fn remove_updates(&self);
}

/// GPS bridge configuration
#[derive(Debug, Clone)]
pub struct GpsConfig {
    /// Minimum time between location updates
    pub update_interval: Duration,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(1000),
        }
    }
}

/// Latest values reported by the provider
#[derive(Debug, Clone, Default)]
struct GpsState {
    location: Option<Location>,
    status: ProviderStatus,
    provider_enabled: bool,
}

impl GpsState {
    fn apply(&mut self, event: LocationEvent) {
        match event {
            LocationEvent::LocationChanged(location) => self.location = Some(location),
            LocationEvent::StatusChanged(status) => self.status = status,
            LocationEvent::ProviderEnabled => self.provider_enabled = true,
            LocationEvent::ProviderDisabled => self.provider_enabled = false,
        }
    }
}

/// Polling surface over a location provider
pub struct GpsConnection {
    config: GpsConfig,
    provider: RwLock<Option<Arc<dyn LocationProvider>>>,
    state: Arc<RwLock<GpsState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl GpsConnection {
    /// Create an unconfigured GPS bridge
    pub fn new(config: GpsConfig) -> Self {
        Self {
            config,
            provider: RwLock::new(None),
            state: Arc::new(RwLock::new(GpsState::default())),
            task: Mutex::new(None),
        }
    }

    /// Attach the location provider
    pub async fn configure(&self, provider: Arc<dyn LocationProvider>) {
        *self.provider.write().await = Some(provider);
    }

    /// Request location updates and start tracking them
    ///
    /// Starting an already running bridge is a no-op.
    pub async fn start(&self) -> Result<()> {
        let provider = self
            .provider
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("GPS provider not configured"))?;

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("[GPS] Already started");
            return Ok(());
        }

        let mut events = provider
            .request_updates(self.config.update_interval)
            .await
            .map_err(|e| {
                warn!("[GPS] Failed to enable location updates: {}", e);
                e
            })?;

        let state = self.state.clone();
        *task = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!("[GPS] {:?}", event);
                state.write().await.apply(event);
            }
            debug!("[GPS] Provider stopped sending updates");
        }));

        info!("[GPS] Location updates every {:?}", self.config.update_interval);
        Ok(())
    }

    /// Stop tracking and remove updates. No-op when not started.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        task.abort();

        if let Some(provider) = self.provider.read().await.clone() {
            provider.remove_updates().await;
        }
        info!("[GPS] Location updates stopped");
    }

    /// Check if updates are being tracked
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Latest fix, if any has been received
    pub async fn current_location(&self) -> Option<Location> {
        self.state.read().await.location.clone()
    }

    /// Latest provider status
    pub async fn current_status(&self) -> ProviderStatus {
        self.state.read().await.status
    }

    pub async fn provider_enabled(&self) -> bool {
        self.state.read().await.provider_enabled
    }
}

impl Default for GpsConnection {
    fn default() -> Self {
        Self::new(GpsConfig::default())
    }
}
