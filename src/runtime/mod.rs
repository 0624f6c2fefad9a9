use std::net::IpAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RuntimeError;
use crate::types::{ContainerEvent, ContainerIdentity, ContainerSnapshot};

pub mod docker;
pub use docker::DockerRuntime;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All running containers, in the order the runtime lists them.
    /// Hostname and domain are left unset; see [`inspect`](Self::inspect).
    async fn list_running(&self) -> Result<Vec<ContainerSnapshot>, RuntimeError>;

    /// Hostname settings of one container.
    async fn inspect(&self, id: &str) -> Result<ContainerIdentity, RuntimeError>;

    /// Subscribes to container start/stop/die events and forwards them to
    /// `events` until the stream ends or the receiver goes away.  A
    /// subscription error ends the call; resubscribing is up to the caller.
    async fn watch(&self, events: mpsc::Sender<ContainerEvent>) -> Result<(), RuntimeError>;

    /// Gateway address of `network`, where the host is reachable from
    /// containers on it.
    async fn network_gateway(&self, network: &str) -> Result<IpAddr, RuntimeError>;
}
