//! dnsmasq child process supervision.
//!
//! dnsmasq only rereads `address=` directives on startup, so a reload
//! is a restart of the child.

use std::net::IpAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use log::{info, warn};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::ResolverProcess;
use crate::error::SystemError;

/// Whether dnsmasq should be running, kept apart from the child handle so
/// a restart that failed to spawn is tried again on the next reload.
#[derive(Default)]
struct Supervised {
    wanted: bool,
    child: Option<Child>,
}

pub struct Dnsmasq {
    binary: String,
    conf_file: PathBuf,
    listen_address: IpAddr,
    state: Mutex<Supervised>,
}

impl Dnsmasq {
    pub fn new(
        binary: impl Into<String>,
        conf_file: impl Into<PathBuf>,
        listen_address: IpAddr,
    ) -> Self {
        Self {
            binary: binary.into(),
            conf_file: conf_file.into(),
            listen_address,
            state: Mutex::new(Supervised::default()),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--keep-in-foreground")
            .arg(format!("--conf-file={}", self.conf_file.display()))
            .arg(format!("--listen-address={}", self.listen_address))
            .arg("--bind-interfaces")
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self) -> Result<Child, SystemError> {
        let child = self.command().spawn().map_err(|source| SystemError::Spawn {
            command: self.binary.clone(),
            source,
        })?;
        info!(
            "Started {} (pid {}) listening on {}",
            self.binary,
            child.id().unwrap_or_default(),
            self.listen_address
        );
        Ok(child)
    }
}

async fn terminate(mut child: Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to stop dnsmasq: {}", e);
    }
}

#[async_trait]
impl ResolverProcess for Dnsmasq {
    async fn start(&self) -> Result<(), SystemError> {
        let mut state = self.state.lock().await;
        state.wanted = true;
        if let Some(old) = state.child.take() {
            terminate(old).await;
        }
        state.child = Some(self.spawn()?);
        Ok(())
    }

    async fn reload(&self) -> Result<(), SystemError> {
        let mut state = self.state.lock().await;
        if !state.wanted {
            return Ok(());
        }
        match state.child.take() {
            Some(old) => terminate(old).await,
            None => warn!("{} is not running, starting it again", self.binary),
        }
        state.child = Some(self.spawn()?);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SystemError> {
        let mut state = self.state.lock().await;
        state.wanted = false;
        if let Some(child) = state.child.take() {
            info!("Stopping {}", self.binary);
            terminate(child).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line() {
        let d = Dnsmasq::new("dnsmasq", "/tmp/x/dnsmasq.conf", "172.17.0.1".parse().unwrap());
        let cmd = d.command();
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--keep-in-foreground",
                "--conf-file=/tmp/x/dnsmasq.conf",
                "--listen-address=172.17.0.1",
                "--bind-interfaces",
            ]
        );
    }

    #[tokio::test]
    async fn reload_before_start_is_noop() {
        let d = Dnsmasq::new("/nonexistent/dnsmasq", "/tmp/x.conf", "127.0.0.1".parse().unwrap());
        d.reload().await.unwrap();
        d.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_reports_missing_binary() {
        let d = Dnsmasq::new("/nonexistent/dnsmasq", "/tmp/x.conf", "127.0.0.1".parse().unwrap());
        assert!(matches!(d.start().await, Err(SystemError::Spawn { .. })));
    }

    #[tokio::test]
    async fn stop_kills_running_child() {
        let d = Dnsmasq::new("sleep", "/tmp/x.conf", "127.0.0.1".parse().unwrap());
        let child = Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap();
        assert!(child.id().is_some());
        {
            let mut state = d.state.lock().await;
            state.wanted = true;
            state.child = Some(child);
        }
        d.stop().await.unwrap();
        let state = d.state.lock().await;
        assert!(state.child.is_none());
        assert!(!state.wanted);
    }

    #[tokio::test]
    async fn failed_restart_is_retried_on_next_reload() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("dnsmasq");
        std::os::unix::fs::symlink("/bin/sh", &binary).unwrap();
        let d = Dnsmasq::new(
            binary.to_string_lossy(),
            dir.path().join("dnsmasq.conf"),
            "127.0.0.1".parse().unwrap(),
        );
        d.start().await.unwrap();

        std::fs::remove_file(&binary).unwrap();
        assert!(matches!(d.reload().await, Err(SystemError::Spawn { .. })));
        assert!(matches!(d.reload().await, Err(SystemError::Spawn { .. })));
        assert!(d.state.lock().await.child.is_none());

        std::os::unix::fs::symlink("/bin/sh", &binary).unwrap();
        d.reload().await.unwrap();
        assert!(d.state.lock().await.child.is_some());
        d.stop().await.unwrap();
    }
}
