//! Data structures used throughout the docker-domains daemon.
//!
//! These types describe what a reconciliation run works with: a
//! point-in-time view of every running container, the name → address
//! records derived from it, and the operator supplied alias table.
//! None of them are mutated once built; every run fetches fresh
//! snapshots instead of patching old ones.

use std::collections::BTreeMap;
use std::fmt;

use log::warn;

/// Point-in-time metadata of one running container.
///
/// `networks` maps the network name to the container's address on that
/// network.  A `BTreeMap` keeps iteration sorted by network name so the
/// derived records never depend on the order the runtime reported them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSnapshot {
    pub id: String,
    /// Container name without the leading `/` Docker prefixes it with.
    pub name: String,
    pub networks: BTreeMap<String, String>,
    /// `None` when the container did not declare one, or when inspecting
    /// it failed.
    pub hostname: Option<String>,
    pub domain: Option<String>,
}

/// Hostname settings returned by inspecting a single container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerIdentity {
    pub hostname: Option<String>,
    pub domain: Option<String>,
}

/// One resolvable name bound to one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRecord {
    pub name: String,
    pub address: String,
}

impl NameRecord {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for NameRecord {
    /// Renders the record as a dnsmasq `address=` directive.  The leading
    /// dot makes dnsmasq answer for the name and every subdomain of it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address=/.{}/{}", self.name, self.address)
    }
}

/// A single `container:alias` binding from the static alias list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAlias {
    pub container: String,
    pub alias: String,
}

/// Operator supplied extra names, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable {
    entries: Vec<StaticAlias>,
}

impl AliasTable {
    /// Parses `name:alias[,name:alias...]`.
    ///
    /// Blank segments are ignored.  Segments that do not split into exactly
    /// two non-empty parts are skipped with a warning rather than failing
    /// startup.
    pub fn parse(list: &str) -> Self {
        let mut entries = Vec::new();
        for segment in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let parts: Vec<&str> = segment.split(':').map(str::trim).collect();
            match parts.as_slice() {
                [container, alias] if !container.is_empty() && !alias.is_empty() => {
                    entries.push(StaticAlias {
                        container: container.to_string(),
                        alias: alias.to_string(),
                    });
                }
                _ => warn!("Ignoring malformed static name entry: {:?}", segment),
            }
        }
        Self { entries }
    }

    /// Aliases declared for `container`, in declaration order.
    pub fn aliases_for<'a>(&'a self, container: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.container == container)
            .map(|e| e.alias.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lifecycle transitions the watcher reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Die,
    /// Emitted by the watcher after it resubscribed; events may have been
    /// missed while the stream was down.
    Resync,
}

impl ContainerAction {
    /// Maps a Docker event action onto the actions we care about.
    pub fn from_docker(action: &str) -> Option<Self> {
        match action {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "die" => Some(Self::Die),
            _ => None,
        }
    }
}

/// A qualifying container lifecycle event.  Only used as a trigger: runs
/// always re-read the full inventory and never trust the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub action: ContainerAction,
    pub container: String,
}

impl ContainerEvent {
    pub fn resync() -> Self {
        Self {
            action: ContainerAction::Resync,
            container: String::new(),
        }
    }
}
