//! Reconciliation runs.
//!
//! A run fetches the running containers, derives their records, rewrites
//! the dnsmasq document and reloads the resolver.  Runs hold one lock for
//! their whole duration so they never overlap, and every run starts with
//! a settling delay because Docker reports a container transition as
//! several events and its state lags behind them.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::config::Config;
use crate::dnsmasq::{ConfigWriter, ResolverProcess};
use crate::error::{ReconcileError, RuntimeError, SystemError, WriteError};
use crate::names::{derive_records, normalize_suffix, NamingRules};
use crate::runtime::ContainerRuntime;
use crate::system::SystemResolution;
use crate::types::{AliasTable, ContainerSnapshot};

#[derive(Debug, Default)]
struct RunState {
    closed: bool,
    completed: u64,
    /// Set when `prepare` had to create the config directory.
    created_dir: bool,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub containers: usize,
    pub records: usize,
}

pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
    resolver: Arc<dyn ResolverProcess>,
    system: Arc<dyn SystemResolution>,
    writer: ConfigWriter,
    default_network: String,
    suffix: String,
    aliases: AliasTable,
    settle_delay: Duration,
    operation_timeout: Duration,
    state: Mutex<RunState>,
}

impl Reconciler {
    pub fn new(
        config: &Config,
        runtime: Arc<dyn ContainerRuntime>,
        resolver: Arc<dyn ResolverProcess>,
        system: Arc<dyn SystemResolution>,
    ) -> Self {
        let aliases = config.alias_table();
        if !aliases.is_empty() {
            info!("Loaded {} static names", aliases.len());
        }
        Self {
            runtime,
            resolver,
            system,
            writer: ConfigWriter::new(config.dnsmasq_conf(), &config.upstream_servers),
            default_network: config.default_network.clone(),
            suffix: normalize_suffix(&config.domain),
            aliases,
            settle_delay: config.settle_delay(),
            operation_timeout: config.operation_timeout(),
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn document(&self) -> &Path {
        self.writer.path()
    }

    /// Writes the header-only document dnsmasq can start from.
    pub async fn prepare(&self) -> Result<(), ReconcileError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ReconcileError::Closed);
        }
        state.created_dir |= self.writer.prepare()?;
        Ok(())
    }

    /// Performs one reconciliation run.
    ///
    /// Failing to list containers or to write the document aborts the run.
    /// A container that cannot be inspected only loses its hostname record.
    pub async fn reconcile(&self) -> Result<RunReport, ReconcileError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ReconcileError::Closed);
        }

        sleep(self.settle_delay).await;

        let containers = self
            .bounded(self.runtime.list_running())
            .await
            .map_err(ReconcileError::Inventory)?;

        let rules = NamingRules {
            default_network: &self.default_network,
            suffix: &self.suffix,
            aliases: &self.aliases,
        };
        let mut records = Vec::new();
        for summary in &containers {
            let container = self.with_identity(summary).await;
            let derived = derive_records(&container, &rules);
            for record in &derived {
                debug!(
                    "{} ({}): {} -> {}",
                    container.name, container.id, record.name, record.address
                );
            }
            records.extend(derived);
        }

        let written = self.writer.write(&records)?;
        state.completed += 1;

        if let Err(e) = self.bounded_system(self.resolver.reload()).await {
            warn!("Failed to reload dnsmasq: {}", e);
        }
        self.system.flush_cache().await;

        let report = RunReport {
            containers: containers.len(),
            records: written,
        };
        info!(
            "Reconciliation #{} wrote {} records for {} containers",
            state.completed, report.records, report.containers
        );
        Ok(report)
    }

    /// Waits for any run in progress, then refuses all further runs.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    /// Deletes the generated document.  The config directory goes too,
    /// but only if [`prepare`](Self::prepare) created it and nothing else
    /// was put there since.  Only allowed after [`close`](Self::close).
    pub async fn remove_artifacts(&self) -> Result<(), WriteError> {
        let state = self.state.lock().await;
        debug_assert!(state.closed, "artifacts removed while runs are allowed");
        let path = self.writer.path();
        info!("Removing {}", path.display());
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(WriteError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
            _ => {}
        }

        let Some(dir) = path.parent().filter(|_| state.created_dir) else {
            return Ok(());
        };
        match std::fs::remove_dir(dir) {
            Ok(()) => debug!("Removed {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => info!("Leaving {} in place: {}", dir.display(), e),
        }
        Ok(())
    }

    async fn with_identity(&self, container: &ContainerSnapshot) -> ContainerSnapshot {
        match self.bounded(self.runtime.inspect(&container.id)).await {
            Ok(identity) => ContainerSnapshot {
                hostname: identity.hostname,
                domain: identity.domain,
                ..container.clone()
            },
            Err(e) => {
                warn!("Failed to inspect {}: {}", container.name, e);
                container.clone()
            }
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, RuntimeError>>,
    ) -> Result<T, RuntimeError> {
        timeout(self.operation_timeout, fut)
            .await
            .unwrap_or(Err(RuntimeError::Timeout(self.operation_timeout)))
    }

    async fn bounded_system(
        &self,
        fut: impl Future<Output = Result<(), SystemError>>,
    ) -> Result<(), SystemError> {
        timeout(self.operation_timeout, fut)
            .await
            .unwrap_or_else(|_| Err(SystemError::Timeout("dnsmasq reload".into())))
    }
}

/// Requests runs from the reconciliation worker.
///
/// At most one request waits behind the run in progress.  Further requests
/// are folded into the waiting one, which has not fetched anything yet and
/// so still observes their state.
#[derive(Clone)]
pub struct Trigger {
    tx: mpsc::Sender<()>,
}

impl Trigger {
    pub fn request(&self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("Run already pending, coalescing trigger"),
            Err(TrySendError::Closed(())) => {
                debug!("Reconciliation worker stopped, ignoring trigger")
            }
        }
    }
}

/// Spawns the task executing requested runs one after another.
pub fn spawn_worker(reconciler: Arc<Reconciler>) -> (Trigger, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            match reconciler.reconcile().await {
                Ok(_) => {}
                Err(ReconcileError::Closed) => break,
                Err(e) => error!("Reconciliation failed: {}", e),
            }
        }
        debug!("Reconciliation worker stopped");
    });
    (Trigger { tx }, handle)
}
