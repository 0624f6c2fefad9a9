//! systemd-resolved integration.
//!
//! A drop-in under `/etc/systemd/resolved.conf.d/` adds our dnsmasq as a
//! DNS server.  The drop-in carries a marker so we never remove a file
//! some other tool owns.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::time::timeout;

use super::SystemResolution;
use crate::error::SystemError;

const MANAGED_BY_MARKER: &str = "# managed by docker-domains";

pub struct SystemdResolved {
    dropin: PathBuf,
    command_timeout: Duration,
}

impl SystemdResolved {
    pub fn new(dropin: impl Into<PathBuf>, command_timeout: Duration) -> Self {
        Self {
            dropin: dropin.into(),
            command_timeout,
        }
    }

    fn io_error(&self, source: std::io::Error) -> SystemError {
        SystemError::Io {
            path: self.dropin.clone(),
            source,
        }
    }

    /// Runs `program args...`, failing on a non-zero exit.
    async fn run(&self, program: &str, args: &[&str]) -> Result<(), SystemError> {
        let command = format!("{} {}", program, args.join(" "));
        debug!("Running {}", command);
        let status = timeout(
            self.command_timeout,
            Command::new(program).args(args).kill_on_drop(true).status(),
        )
        .await
        .map_err(|_| SystemError::Timeout(command.clone()))?
        .map_err(|source| SystemError::Spawn {
            command: command.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(SystemError::Status { command, status })
        }
    }

    async fn selinux_enabled(&self) -> bool {
        self.run("selinuxenabled", &[]).await.is_ok()
    }
}

#[async_trait]
impl SystemResolution for SystemdResolved {
    async fn configure(&self, listen_address: IpAddr) -> Result<(), SystemError> {
        match tokio::fs::read_to_string(&self.dropin).await {
            Ok(content) if !content.contains(MANAGED_BY_MARKER) => {
                return Err(SystemError::NotManaged {
                    path: self.dropin.clone(),
                });
            }
            Ok(_) => debug!("Replacing stale {}", self.dropin.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.io_error(e)),
        }
        if let Some(dir) = self.dropin.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        tokio::fs::write(&self.dropin, dropin_content(listen_address))
            .await
            .map_err(|e| self.io_error(e))?;
        info!(
            "Configured systemd-resolved to use {} ({})",
            listen_address,
            self.dropin.display()
        );
        Ok(())
    }

    async fn unconfigure(&self) {
        match tokio::fs::read_to_string(&self.dropin).await {
            Ok(content) if content.contains(MANAGED_BY_MARKER) => {
                info!("Removing {}", self.dropin.display());
                if let Err(e) = tokio::fs::remove_file(&self.dropin).await {
                    warn!("Failed to remove {}: {}", self.dropin.display(), e);
                }
            }
            Ok(_) => warn!(
                "{} is not managed by docker-domains, leaving it in place",
                self.dropin.display()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} already removed", self.dropin.display());
            }
            Err(e) => warn!("Failed to read {}: {}", self.dropin.display(), e),
        }
    }

    async fn reload(&self) {
        info!("Reloading systemd-resolved");
        if let Err(e) = self
            .run("systemctl", &["condrestart", "systemd-resolved.service"])
            .await
        {
            warn!("Failed to reload systemd-resolved: {}", e);
        }
    }

    async fn flush_cache(&self) {
        debug!("Flushing systemd-resolved cache");
        let Err(e) = self.run("resolvectl", &["flush-caches"]).await else {
            return;
        };
        debug!("resolvectl failed ({}), trying systemd-resolve", e);
        if let Err(e) = self.run("systemd-resolve", &["--flush-caches"]).await {
            warn!("Failed to flush resolved cache: {}", e);
        }
    }

    async fn restore_security_context(&self, paths: &[PathBuf]) {
        if !self.selinux_enabled().await {
            return;
        }
        info!("Restoring SELinux context");
        for path in paths {
            let path = path.to_string_lossy();
            if let Err(e) = self.run("restorecon", &["-R", &*path]).await {
                warn!("Failed to restore SELinux context on {}: {}", path, e);
            }
        }
    }
}

/// Drop-in content:
///
/// ```text
/// # managed by docker-domains (pid=12345)
/// [Resolve]
/// DNS=172.17.0.1
/// ```
fn dropin_content(listen_address: IpAddr) -> String {
    let pid = std::process::id();
    format!("{MANAGED_BY_MARKER} (pid={pid})\n[Resolve]\nDNS={listen_address}\n")
}
