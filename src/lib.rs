pub mod audit;
pub mod authorize;
pub mod config;
pub mod history;
pub mod models;
pub mod probe;
pub mod registry;
pub mod signal;

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use audit::AuditLog;
use authorize::Alerter;
use config::Config;
use history::SignalHistory;
use models::{Alert, CycleResult, Device, DeviceFilter, Identity, RegistryEvent};
use probe::ProbeSource;
use registry::Registry;

/// Core lanwarden engine
///
/// Owns the registry, history, alerter, and audit log; all access goes
/// through this handle. Cloning is cheap and shares the same state.
#[derive(Clone)]
pub struct Lanwarden {
    config: Arc<Config>,
    registry: Arc<RwLock<Registry>>,
    history: Arc<RwLock<SignalHistory>>,
    alerter: Arc<Alerter>,
    audit: AuditLog,
    sources: Arc<Vec<Box<dyn ProbeSource>>>,
}

impl Lanwarden {
    /// Create an engine with probe sources built from the configuration
    pub fn new(config: Config) -> Result<Self> {
        let sources = probe::sources_from_config(&config.probe)?;
        Ok(Self::with_sources(config, sources))
    }

    /// Create an engine with caller-supplied probe sources (tests inject
    /// fakes here)
    pub fn with_sources(config: Config, sources: Vec<Box<dyn ProbeSource>>) -> Self {
        let audit = AuditLog::new(config.log_path());
        Self {
            config: Arc::new(config),
            registry: Arc::new(RwLock::new(Registry::new())),
            history: Arc::new(RwLock::new(SignalHistory::new())),
            alerter: Arc::new(Alerter::new()),
            audit,
            sources: Arc::new(sources),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run one complete discovery-measure-reconcile-persist pass.
    ///
    /// Probe failures degrade to empty reports, malformed observations are
    /// dropped and counted, and an audit write failure is logged without
    /// rolling back the in-memory cycle. Nothing here is fatal.
    pub async fn run_cycle(&self) -> Result<CycleResult> {
        let now = Utc::now();
        let mut observations = Vec::new();
        let mut malformed = 0;

        // Source order is reconciliation order: ARP table first
        for source in self.sources.iter() {
            match source.collect().await {
                Ok(report) => {
                    malformed += report.malformed;
                    observations.extend(report.observations);
                }
                Err(e) => {
                    warn!("Probe source {} failed: {:#}", source.name(), e);
                }
            }
        }

        let mut result = {
            let mut registry = self.registry.write().await;
            registry.reconcile(
                observations,
                now,
                &self.config.security,
                self.config.general.staleness_secs,
            )
        };
        result.dropped += malformed;

        {
            let mut history = self.history.write().await;
            for (identity, score) in &result.samples {
                history.append(identity, *score);
            }
        }

        self.alerter.process(&result.created);

        if self.config.probe.resolve_hostnames {
            self.resolve_new_names(&result.created).await;
        }

        let devices = self.registry.read().await.snapshot(DeviceFilter::All);
        if let Err(e) = self.audit.append_cycle(&devices, now) {
            error!("Audit log append failed (cycle state retained): {}", e);
        }

        info!(
            "Cycle complete: {} observed, {} new, {} dropped, {} tracked",
            result.observed,
            result.created.len(),
            result.dropped,
            devices.len()
        );
        Ok(result)
    }

    /// Best-effort display names for devices created this cycle
    async fn resolve_new_names(&self, created: &[RegistryEvent]) {
        for event in created {
            let RegistryEvent::DeviceCreated { identity, addr, .. } = event;
            if let Some(name) = probe::resolve_hostname(*addr, self.config.probe.timeout_ms).await {
                self.registry
                    .write()
                    .await
                    .set_display_name(identity, name);
            }
        }
    }

    /// Consistent point-in-time view for the presentation path
    pub async fn snapshot(&self, filter: DeviceFilter) -> Vec<Device> {
        self.registry.read().await.snapshot(filter)
    }

    pub async fn device(&self, identity: &Identity) -> Option<Device> {
        self.registry.read().await.get(identity).cloned()
    }

    /// Recent signal samples for a device, oldest first
    pub async fn history_for(&self, identity: &Identity) -> Vec<i16> {
        self.history.read().await.get(identity)
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerter.alerts()
    }
}

/// Periodic scan-cycle runner
///
/// Cycles run inline in the select loop, so at most one is ever in flight
/// and a shutdown is only observed between cycles, after the audit append
/// of the current one has completed. Manual refresh requests share a
/// capacity-1 channel: a request arriving while a cycle runs coalesces
/// with it instead of queueing another.
pub struct Daemon {
    engine: Lanwarden,
    refresh_tx: mpsc::Sender<()>,
    refresh_rx: Option<mpsc::Receiver<()>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
}

impl Daemon {
    pub fn new(engine: Lanwarden) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Self {
            engine,
            refresh_tx,
            refresh_rx: Some(refresh_rx),
            shutdown_tx,
            shutdown_rx: Some(shutdown_rx),
        }
    }

    pub fn engine(&self) -> &Lanwarden {
        &self.engine
    }

    /// Request an immediate cycle; coalesced if one is already pending
    pub fn refresh(&self) {
        let _ = self.refresh_tx.try_send(());
    }

    /// Signal shutdown
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Run the daemon until shutdown or ctrl-c
    pub async fn run(&mut self) -> Result<()> {
        let mut refresh_rx = self
            .refresh_rx
            .take()
            .context("Daemon is already running")?;
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .context("Daemon is already running")?;

        let auto_refresh = self.engine.config.general.auto_refresh;
        let interval_secs = self.engine.config.general.scan_interval_secs.max(1);

        info!(
            "Daemon started (interval: {}s, auto refresh: {})",
            interval_secs, auto_refresh
        );

        // First cycle immediately, then on the timer
        self.cycle().await;

        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.reset();

        loop {
            tokio::select! {
                _ = ticker.tick(), if auto_refresh => {
                    self.cycle().await;
                }
                Some(_) = refresh_rx.recv() => {
                    info!("Manual refresh requested");
                    self.cycle().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    break;
                }
            }
        }

        info!("Daemon stopped");
        Ok(())
    }

    async fn cycle(&self) {
        if let Err(e) = self.engine.run_cycle().await {
            error!("Scan cycle failed: {:#}", e);
        }
    }
}
