use super::ContainerRuntime;
use crate::error::RuntimeError;
use crate::types::{ContainerAction, ContainerEvent, ContainerIdentity, ContainerSnapshot};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{ContainerSummary, EndpointSettings, EventMessage};
use bollard::network::InspectNetworkOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, info};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::mpsc;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon using default settings
    /// (`DOCKER_HOST`, or the unix socket on Linux).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<ContainerSnapshot>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            filters: HashMap::from([("status".to_string(), vec!["running".to_string()])]),
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;
        Ok(containers.iter().filter_map(snapshot_from_summary).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerIdentity, RuntimeError> {
        let detail = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let config = detail.config.unwrap_or_default();
        Ok(ContainerIdentity {
            hostname: config.hostname.filter(|h| !h.is_empty()),
            domain: config.domainname.filter(|d| !d.is_empty()),
        })
    }

    async fn watch(&self, events: mpsc::Sender<ContainerEvent>) -> Result<(), RuntimeError> {
        let opts = EventsOptions::<String> {
            filters: [
                ("type", ["container"].as_slice()),
                ("event", ["start", "stop", "die"].as_slice()),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect(),
            ..Default::default()
        };

        let mut stream = self.docker.events(Some(opts));

        info!("Listening for Docker events...");
        while let Some(msg) = stream.next().await {
            let Some(event) = container_event(msg?) else {
                continue;
            };
            debug!("Container event: {:?} for {}", event.action, event.container);
            if events.send(event).await.is_err() {
                debug!("Event receiver closed, unsubscribing");
                return Ok(());
            }
        }
        Ok(())
    }

    async fn network_gateway(&self, network: &str) -> Result<IpAddr, RuntimeError> {
        let detail = self
            .docker
            .inspect_network(network, None::<InspectNetworkOptions<String>>)
            .await?;
        detail
            .ipam
            .and_then(|ipam| ipam.config)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.gateway)
            .find_map(|gw| gw.parse().ok())
            .ok_or_else(|| RuntimeError::NoGateway(network.to_string()))
    }
}

/// Builds a snapshot from a `docker ps` entry.  Entries without an ID are
/// skipped; entries without a name fall back to the ID.
fn snapshot_from_summary(c: &ContainerSummary) -> Option<ContainerSnapshot> {
    let id = c.id.clone().filter(|id| !id.is_empty())?;
    let name = c
        .names
        .as_ref()
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| id.clone());

    let networks = c
        .network_settings
        .as_ref()
        .and_then(|s| s.networks.as_ref())
        .map(|networks| {
            networks
                .iter()
                .map(|(name, endpoint)| (name.clone(), endpoint_address(endpoint)))
                .collect()
        })
        .unwrap_or_default();

    Some(ContainerSnapshot {
        id,
        name,
        networks,
        hostname: None,
        domain: None,
    })
}

/// IPv4 address on the network, falling back to the global IPv6 one.
/// Empty when the endpoint has neither.
fn endpoint_address(endpoint: &EndpointSettings) -> String {
    [&endpoint.ip_address, &endpoint.global_ipv6_address]
        .into_iter()
        .flatten()
        .find(|ip| !ip.is_empty())
        .cloned()
        .unwrap_or_default()
}

fn container_event(event: EventMessage) -> Option<ContainerEvent> {
    let action = ContainerAction::from_docker(event.action.as_deref()?)?;
    let actor = event.actor.unwrap_or_default();
    let container = actor
        .attributes
        .and_then(|mut attributes| attributes.remove("name"))
        .filter(|n| !n.is_empty())
        .or(actor.id)
        .unwrap_or_default();
    Some(ContainerEvent { action, container })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerSummaryNetworkSettings, EventActor};

    fn endpoint(v4: &str, v6: &str) -> EndpointSettings {
        EndpointSettings {
            ip_address: Some(v4.to_string()),
            global_ipv6_address: Some(v6.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn summary_to_snapshot() {
        let summary = ContainerSummary {
            id: Some("c1".into()),
            names: Some(vec!["/web".into()]),
            network_settings: Some(ContainerSummaryNetworkSettings {
                networks: Some(HashMap::from([
                    ("bridge".to_string(), endpoint("172.17.0.2", "")),
                    ("v6only".to_string(), endpoint("", "fd00::2")),
                ])),
            }),
            ..Default::default()
        };
        let snap = snapshot_from_summary(&summary).unwrap();
        assert_eq!(snap.id, "c1");
        assert_eq!(snap.name, "web");
        assert_eq!(snap.networks["bridge"], "172.17.0.2");
        assert_eq!(snap.networks["v6only"], "fd00::2");
        assert_eq!(snap.hostname, None);
    }

    #[test]
    fn summary_without_name_uses_id() {
        let summary = ContainerSummary {
            id: Some("abc123".into()),
            ..Default::default()
        };
        let snap = snapshot_from_summary(&summary).unwrap();
        assert_eq!(snap.name, "abc123");
        assert!(snap.networks.is_empty());
    }

    #[test]
    fn summary_without_id_is_skipped() {
        assert!(snapshot_from_summary(&ContainerSummary::default()).is_none());
    }

    #[test]
    fn events_are_filtered_and_named() {
        let msg = |action: &str| EventMessage {
            action: Some(action.into()),
            actor: Some(EventActor {
                id: Some("c1".into()),
                attributes: Some(HashMap::from([("name".to_string(), "web".to_string())])),
            }),
            ..Default::default()
        };
        assert_eq!(
            container_event(msg("die")),
            Some(ContainerEvent {
                action: ContainerAction::Die,
                container: "web".into()
            })
        );
        assert_eq!(container_event(msg("attach")), None);
    }
}
