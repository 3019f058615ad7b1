//! Gateway lifecycle supervisor.
//!
//! Owns every gateway's run task and stop signal. A failure in one
//! gateway's run loop never touches any other gateway; with auto-restart
//! enabled, a failed gateway is restarted after a short delay, capped at
//! `max_restarts`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::messages::GatewayKind;

use super::{GatewayError, GatewayProvider, MessageHandler};

const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle state of a managed gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Registered,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Restarting,
}

/// Supervisor failures.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("gateway '{0}' is already registered")]
    NameTaken(String),

    #[error("gateway '{0}' is not registered")]
    NotFound(String),

    #[error("gateway '{name}' failed to start: {source}")]
    Start {
        name: String,
        #[source]
        source: GatewayError,
    },
}

/// Point-in-time view of one gateway.
#[derive(Debug, Clone)]
pub struct GatewayReport {
    pub status: GatewayStatus,
    pub kind: GatewayKind,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub restart_count: u32,
}

struct GatewayInfo {
    provider: Arc<dyn GatewayProvider>,
    status: GatewayStatus,
    task: Option<JoinHandle<()>>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    error: Option<String>,
    restart_count: u32,
    initialized: bool,
}

/// Registers, starts, stops, and restarts gateways.
pub struct GatewaySupervisor {
    gateways: Mutex<HashMap<String, GatewayInfo>>,
    auto_restart: bool,
    max_restarts: u32,
}

impl GatewaySupervisor {
    pub fn new(auto_restart: bool, max_restarts: u32) -> Arc<Self> {
        Arc::new(Self {
            gateways: Mutex::new(HashMap::new()),
            auto_restart,
            max_restarts,
        })
    }

    /// Register a gateway without starting it. The name must be unique.
    pub async fn register(
        &self,
        name: &str,
        provider: Arc<dyn GatewayProvider>,
    ) -> Result<(), SupervisorError> {
        let mut gateways = self.gateways.lock().await;
        if gateways.contains_key(name) {
            return Err(SupervisorError::NameTaken(name.to_string()));
        }
        info!(gateway = name, kind = ?provider.gateway_kind(), "gateway registered");
        gateways.insert(
            name.to_string(),
            GatewayInfo {
                provider,
                status: GatewayStatus::Registered,
                task: None,
                started_at: None,
                stopped_at: None,
                error: None,
                restart_count: 0,
                initialized: false,
            },
        );
        Ok(())
    }

    /// Remove a gateway entirely.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut gateways = self.gateways.lock().await;
        if let Some(info) = gateways.get(name) {
            if info.status == GatewayStatus::Running {
                warn!(gateway = name, "unregistering a running gateway");
            }
        }
        gateways.remove(name).is_some()
    }

    /// Look up a provider handle by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn GatewayProvider>> {
        self.gateways
            .lock()
            .await
            .get(name)
            .map(|info| Arc::clone(&info.provider))
    }

    /// Install the message handler on every registered gateway.
    pub async fn set_message_handler(&self, handler: MessageHandler) {
        for info in self.gateways.lock().await.values() {
            info.provider.set_message_handler(Arc::clone(&handler));
        }
    }

    /// Start one gateway: initialize if needed, start the provider, and
    /// spawn its run loop as an independent task.
    pub fn start_gateway<'a>(
        self: &'a Arc<Self>,
        name: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), SupervisorError>> + Send + 'a>>
    {
        Box::pin(self.start_gateway_inner(name))
    }

    async fn start_gateway_inner(self: &Arc<Self>, name: &str) -> Result<(), SupervisorError> {
        let (provider, needs_init) = {
            let mut gateways = self.gateways.lock().await;
            let info = gateways
                .get_mut(name)
                .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
            if info.status == GatewayStatus::Running {
                warn!(gateway = name, "gateway already running");
                return Ok(());
            }
            info.status = GatewayStatus::Starting;
            (Arc::clone(&info.provider), !info.initialized)
        };

        if needs_init {
            if let Err(source) = provider.initialize().await {
                self.mark_error(name, &source.to_string()).await;
                return Err(SupervisorError::Start {
                    name: name.to_string(),
                    source,
                });
            }
        }

        if let Err(source) = provider.start().await {
            self.mark_error(name, &source.to_string()).await;
            return Err(SupervisorError::Start {
                name: name.to_string(),
                source,
            });
        }

        let task = tokio::spawn(Arc::clone(self).run_gateway(name.to_string(), Arc::clone(&provider)));

        let mut gateways = self.gateways.lock().await;
        if let Some(info) = gateways.get_mut(name) {
            info.initialized = true;
            info.status = GatewayStatus::Running;
            info.started_at = Some(Utc::now());
            info.error = None;
            info.task = Some(task);
        }

        info!(gateway = name, "gateway started");
        Ok(())
    }

    /// Run-loop wrapper: captures failures, isolates them, and drives
    /// auto-restart.
    async fn run_gateway(self: Arc<Self>, name: String, provider: Arc<dyn GatewayProvider>) {
        match provider.run().await {
            Ok(()) => {
                let mut gateways = self.gateways.lock().await;
                if let Some(info) = gateways.get_mut(&name) {
                    if info.status == GatewayStatus::Running {
                        info.status = GatewayStatus::Stopped;
                        info.stopped_at = Some(Utc::now());
                        info!(gateway = %name, "gateway run loop exited cleanly");
                    }
                }
            }
            Err(run_error) => {
                error!(gateway = %name, error = %run_error, "gateway run loop failed");
                let should_restart = {
                    let mut gateways = self.gateways.lock().await;
                    match gateways.get_mut(&name) {
                        Some(info) => {
                            info.status = GatewayStatus::Error;
                            info.error = Some(run_error.to_string());
                            if self.auto_restart && info.restart_count < self.max_restarts {
                                info.restart_count += 1;
                                true
                            } else {
                                false
                            }
                        }
                        None => false,
                    }
                };

                if should_restart {
                    info!(gateway = %name, "auto-restarting gateway");
                    tokio::time::sleep(RESTART_DELAY).await;
                    if let Err(error) = self.start_gateway(&name).await {
                        error!(gateway = %name, %error, "auto-restart failed");
                    }
                }
            }
        }
    }

    async fn mark_error(&self, name: &str, message: &str) {
        let mut gateways = self.gateways.lock().await;
        if let Some(info) = gateways.get_mut(name) {
            info.status = GatewayStatus::Error;
            info.error = Some(message.to_string());
        }
    }

    /// Stop one gateway: provider stop, stop signal, then cancel the run
    /// task with a bounded wait.
    pub async fn stop_gateway(&self, name: &str, timeout: Duration) -> Result<(), SupervisorError> {
        let (provider, task) = {
            let mut gateways = self.gateways.lock().await;
            let info = gateways
                .get_mut(name)
                .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
            if !matches!(
                info.status,
                GatewayStatus::Running | GatewayStatus::Error | GatewayStatus::Starting
            ) {
                return Ok(());
            }
            info.status = GatewayStatus::Stopping;
            (Arc::clone(&info.provider), info.task.take())
        };

        if let Err(error) = provider.stop().await {
            warn!(gateway = name, %error, "gateway stop reported an error");
        }
        provider.stop_signal().trigger();

        if let Some(mut task) = task {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!(gateway = name, "gateway stop timed out, cancelling task");
                task.abort();
            }
        }

        let mut gateways = self.gateways.lock().await;
        if let Some(info) = gateways.get_mut(name) {
            info.status = GatewayStatus::Stopped;
            info.stopped_at = Some(Utc::now());
        }

        info!(gateway = name, "gateway stopped");
        Ok(())
    }

    /// Stop then start, bumping the restart counter.
    pub async fn restart_gateway(self: &Arc<Self>, name: &str) -> Result<(), SupervisorError> {
        {
            let mut gateways = self.gateways.lock().await;
            let info = gateways
                .get_mut(name)
                .ok_or_else(|| SupervisorError::NotFound(name.to_string()))?;
            info.status = GatewayStatus::Restarting;
            info.restart_count += 1;
        }

        self.stop_gateway(name, Duration::from_secs(5)).await?;
        self.start_gateway(name).await
    }

    /// Start every registered gateway concurrently; per-gateway outcomes.
    pub async fn start_all(self: &Arc<Self>) -> HashMap<String, bool> {
        let names: Vec<String> = self.gateways.lock().await.keys().cloned().collect();
        let outcomes = join_all(names.into_iter().map(|name| {
            let supervisor = Arc::clone(self);
            async move {
                let ok = supervisor.start_gateway(&name).await.is_ok();
                (name, ok)
            }
        }))
        .await;

        let results: HashMap<String, bool> = outcomes.into_iter().collect();
        let running = results.values().filter(|ok| **ok).count();
        info!(total = results.len(), running, "all gateways started");
        results
    }

    /// Stop every gateway concurrently; per-gateway outcomes.
    pub async fn stop_all(&self, timeout: Duration) -> HashMap<String, bool> {
        let names: Vec<String> = self.gateways.lock().await.keys().cloned().collect();
        let outcomes = join_all(names.into_iter().map(|name| async move {
            let ok = self.stop_gateway(&name, timeout).await.is_ok();
            (name, ok)
        }))
        .await;

        let results: HashMap<String, bool> = outcomes.into_iter().collect();
        info!(total = results.len(), "all gateways stopped");
        results
    }

    /// Status snapshot of every gateway.
    pub async fn status(&self) -> HashMap<String, GatewayReport> {
        self.gateways
            .lock()
            .await
            .iter()
            .map(|(name, info)| {
                (
                    name.clone(),
                    GatewayReport {
                        status: info.status,
                        kind: info.provider.gateway_kind(),
                        started_at: info.started_at,
                        stopped_at: info.stopped_at,
                        error: info.error.clone(),
                        restart_count: info.restart_count,
                    },
                )
            })
            .collect()
    }

    /// First registered provider of the given transport kind.
    pub async fn find_by_kind(&self, kind: GatewayKind) -> Option<Arc<dyn GatewayProvider>> {
        self.gateways
            .lock()
            .await
            .values()
            .find(|info| info.provider.gateway_kind() == kind)
            .map(|info| Arc::clone(&info.provider))
    }

    /// Names of gateways currently in `Running`.
    pub async fn running_gateways(&self) -> Vec<String> {
        self.gateways
            .lock()
            .await
            .iter()
            .filter(|(_, info)| info.status == GatewayStatus::Running)
            .map(|(name, _)| name.clone())
            .collect()
    }
}
