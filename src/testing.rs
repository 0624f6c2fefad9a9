//! In-memory collaborators for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::dnsmasq::ResolverProcess;
use crate::error::{RuntimeError, SystemError};
use crate::runtime::ContainerRuntime;
use crate::system::SystemResolution;
use crate::types::{ContainerAction, ContainerEvent, ContainerIdentity, ContainerSnapshot};

/// Ordered log of side effects shared by the fakes.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub fn container(id: &str, name: &str, networks: &[(&str, &str)]) -> ContainerSnapshot {
    ContainerSnapshot {
        id: id.to_string(),
        name: name.to_string(),
        networks: networks
            .iter()
            .map(|(n, a)| (n.to_string(), a.to_string()))
            .collect(),
        hostname: None,
        domain: None,
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    pub journal: Journal,
    containers: Mutex<Vec<ContainerSnapshot>>,
    identities: Mutex<HashMap<String, ContainerIdentity>>,
    broken_inspect: Mutex<HashSet<String>>,
    list_delay: Mutex<Duration>,
    fail_list: AtomicBool,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub list_calls: AtomicUsize,
    watch_sessions: Mutex<VecDeque<(Vec<ContainerAction>, bool)>>,
}

impl FakeRuntime {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn set_containers(&self, containers: Vec<ContainerSnapshot>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn set_identity(&self, id: &str, hostname: &str, domain: &str) {
        let identity = ContainerIdentity {
            hostname: Some(hostname.to_string()).filter(|h| !h.is_empty()),
            domain: Some(domain.to_string()).filter(|d| !d.is_empty()),
        };
        self.identities.lock().unwrap().insert(id.to_string(), identity);
    }

    pub fn break_inspect(&self, id: &str) {
        self.broken_inspect.lock().unwrap().insert(id.to_string());
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Queues one `watch` call delivering `actions`, then either failing or
    /// ending cleanly.  Once the queue is empty `watch` blocks forever.
    pub fn push_watch_session(&self, actions: Vec<ContainerAction>, fail: bool) {
        self.watch_sessions.lock().unwrap().push_back((actions, fail));
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_running(&self) -> Result<Vec<ContainerSnapshot>, RuntimeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.journal.record("list");

        let delay = *self.list_delay.lock().unwrap();
        let snapshot = self.containers.lock().unwrap().clone();
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RuntimeError::Timeout(Duration::ZERO));
        }
        Ok(snapshot)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerIdentity, RuntimeError> {
        if self.broken_inspect.lock().unwrap().contains(id) {
            return Err(RuntimeError::Timeout(Duration::ZERO));
        }
        Ok(self
            .identities
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn watch(&self, events: mpsc::Sender<ContainerEvent>) -> Result<(), RuntimeError> {
        let session = self.watch_sessions.lock().unwrap().pop_front();
        let Some((actions, fail)) = session else {
            return std::future::pending().await;
        };
        for action in actions {
            let event = ContainerEvent {
                action,
                container: "fake".into(),
            };
            if events.send(event).await.is_err() {
                return Ok(());
            }
        }
        if fail {
            Err(RuntimeError::NoGateway("fake".into()))
        } else {
            Ok(())
        }
    }

    async fn network_gateway(&self, _network: &str) -> Result<IpAddr, RuntimeError> {
        Ok(IpAddr::from([172, 17, 0, 1]))
    }
}

#[derive(Default)]
pub struct FakeResolver {
    pub journal: Journal,
    running: AtomicBool,
}

impl FakeResolver {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResolverProcess for FakeResolver {
    async fn start(&self) -> Result<(), SystemError> {
        self.journal.record("resolver start");
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn reload(&self) -> Result<(), SystemError> {
        if self.is_running() {
            self.journal.record("resolver reload");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SystemError> {
        self.journal.record("resolver stop");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSystem {
    pub journal: Journal,
    pub fail_configure: AtomicBool,
}

impl FakeSystem {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            fail_configure: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SystemResolution for FakeSystem {
    async fn configure(&self, listen_address: IpAddr) -> Result<(), SystemError> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(SystemError::Io {
                path: PathBuf::from("/etc/systemd/resolved.conf.d"),
                source: std::io::ErrorKind::PermissionDenied.into(),
            });
        }
        self.journal.record(format!("configure {listen_address}"));
        Ok(())
    }

    async fn unconfigure(&self) {
        self.journal.record("unconfigure");
    }

    async fn reload(&self) {
        self.journal.record("system reload");
    }

    async fn flush_cache(&self) {
        self.journal.record("flush");
    }

    async fn restore_security_context(&self, _paths: &[PathBuf]) {
        self.journal.record("restorecon");
    }
}
