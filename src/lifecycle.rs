//! Process startup and shutdown.

use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use log::{error, info, warn};

use crate::config::Config;
use crate::dnsmasq::{Dnsmasq, ResolverProcess};
use crate::reconciler::{spawn_worker, Reconciler};
use crate::runtime::{ContainerRuntime, DockerRuntime};
use crate::system::{SystemResolution, SystemdResolved};
use crate::watcher::EventWatcher;

/// Wires the Docker, dnsmasq and systemd-resolved collaborators together
/// and runs until SIGINT or SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect().context("Failed to connect to Docker")?);

    let listen_address = match config.listen_address {
        Some(address) => address,
        None => runtime
            .network_gateway(&config.default_network)
            .await
            .with_context(|| {
                format!(
                    "Failed to find the gateway of network {}",
                    config.default_network
                )
            })?,
    };

    let resolver = Arc::new(Dnsmasq::new(
        config.dnsmasq_binary.clone(),
        config.dnsmasq_conf(),
        listen_address,
    ));
    let system = Arc::new(SystemdResolved::new(
        config.resolved_dropin.clone(),
        config.operation_timeout(),
    ));

    let daemon = Daemon::new(config, listen_address, runtime, resolver, system);
    daemon.run_until(shutdown_signal()).await
}

/// Resolves on the first SIGINT or SIGTERM.
///
/// The SIGTERM handler is installed when this is called, not when the
/// future is first polled.
pub fn shutdown_signal() -> impl Future<Output = ()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("Unable to listen for SIGTERM: {}", e);
            None
        }
    };

    async move {
        let sigterm = async {
            match terminate.as_mut() {
                Some(s) => {
                    s.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => info!("Received SIGINT, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            },
            _ = sigterm => info!("Received SIGTERM, shutting down..."),
        }
    }
}

pub struct Daemon {
    config: Config,
    listen_address: IpAddr,
    runtime: Arc<dyn ContainerRuntime>,
    resolver: Arc<dyn ResolverProcess>,
    system: Arc<dyn SystemResolution>,
    reconciler: Arc<Reconciler>,
}

impl Daemon {
    pub fn new(
        config: Config,
        listen_address: IpAddr,
        runtime: Arc<dyn ContainerRuntime>,
        resolver: Arc<dyn ResolverProcess>,
        system: Arc<dyn SystemResolution>,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            &config,
            runtime.clone(),
            resolver.clone(),
            system.clone(),
        ));
        Self {
            config,
            listen_address,
            runtime,
            resolver,
            system,
            reconciler,
        }
    }

    /// Prepares the resolver plumbing, captures the containers already
    /// running and starts dnsmasq.  Any failure here is fatal; whatever
    /// was set up is torn down again before returning the error.
    pub async fn start(&self) -> anyhow::Result<()> {
        let result = self.try_start().await;
        if result.is_err() {
            self.teardown().await;
        }
        result
    }

    async fn try_start(&self) -> anyhow::Result<()> {
        info!(
            "Writing dnsmasq configuration to {}",
            self.reconciler.document().display()
        );
        self.reconciler
            .prepare()
            .await
            .context("Failed to prepare dnsmasq configuration")?;
        self.system
            .configure(self.listen_address)
            .await
            .context("Failed to configure systemd-resolved")?;
        self.system
            .restore_security_context(&self.managed_dirs())
            .await;

        let report = self
            .reconciler
            .reconcile()
            .await
            .context("Initial reconciliation failed")?;
        info!("Initial scan found {} containers", report.containers);

        self.resolver
            .start()
            .await
            .context("Failed to start dnsmasq")?;
        Ok(())
    }

    /// Starts, then serves until `shutdown` resolves.  A shutdown that
    /// arrives while starting abandons the startup and tears down.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);
        // the start future is dropped here, releasing the run lock
        let started = tokio::select! {
            res = self.start() => Some(res),
            _ = &mut shutdown => None,
        };
        match started {
            Some(res) => res?,
            None => {
                info!("Shutdown requested during startup");
                self.teardown().await;
                return Ok(());
            }
        }
        self.serve(shutdown).await;
        Ok(())
    }

    /// Runs the event loop until `shutdown` resolves, then tears down.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) {
        let (trigger, worker) = spawn_worker(self.reconciler.clone());
        let mut watcher = EventWatcher::spawn(self.runtime.clone());
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = watcher.events.recv() => {
                    info!("Container {:?}: {}", event.action, event.container);
                    trigger.request();
                }
                Some(err) = watcher.errors.recv() => {
                    warn!("Docker event subscription error: {}", err);
                }
            }
        }

        watcher.abort();
        self.teardown().await;
        drop(trigger);
        if let Err(e) = worker.await {
            warn!("Reconciliation worker ended abnormally: {}", e);
        }
        info!("Terminated");
    }

    /// Undoes everything [`start`](Self::start) set up.  Every step is
    /// attempted even when an earlier one failed.
    pub async fn teardown(&self) {
        info!("Terminating...");
        // Waits for a run holding the lock; nothing is written after this.
        self.reconciler.close().await;

        if let Err(e) = self.resolver.stop().await {
            warn!("Failed to stop dnsmasq: {}", e);
        }
        if let Err(e) = self.reconciler.remove_artifacts().await {
            warn!("Failed to remove dnsmasq config files: {}", e);
        }
        self.system.unconfigure().await;
        self.system.reload().await;
    }

    fn managed_dirs(&self) -> Vec<PathBuf> {
        [
            self.config.resolved_dropin.parent(),
            Some(self.config.config_dir.as_path()),
        ]
        .into_iter()
        .flatten()
        .map(PathBuf::from)
        .collect()
    }
}
