//! Name derivation.
//!
//! Turns one [`ContainerSnapshot`] into the records the resolver should
//! answer for.  Pure: no I/O, no state, so the same snapshot set always
//! yields the same records.

use crate::types::{AliasTable, ContainerSnapshot, NameRecord};

/// Inputs shared by every derivation in a run.
#[derive(Debug, Clone)]
pub struct NamingRules<'a> {
    pub default_network: &'a str,
    /// Already normalized with [`normalize_suffix`].
    pub suffix: &'a str,
    pub aliases: &'a AliasTable,
}

/// Adds the leading `.` a user supplied suffix may lack.  An empty suffix
/// stays empty so names are emitted without any separator.
pub fn normalize_suffix(suffix: &str) -> String {
    let suffix = suffix.trim();
    if suffix.is_empty() || suffix.starts_with('.') {
        suffix.to_string()
    } else {
        format!(".{suffix}")
    }
}

/// Derives the records of one container.
///
/// Order is hostname record (if any), primary record, then static
/// aliases in declaration order.
pub fn derive_records(container: &ContainerSnapshot, rules: &NamingRules<'_>) -> Vec<NameRecord> {
    let (address, network) = select_address(container, rules.default_network);
    let mut records = Vec::new();

    if let Some(hostname) = container.hostname.as_deref().filter(|h| !h.is_empty()) {
        let name = match container.domain.as_deref().filter(|d| !d.is_empty()) {
            Some(domain) => format!("{hostname}.{domain}"),
            None => hostname.to_string(),
        };
        records.push(NameRecord::new(name, address));
    }

    let primary = match network {
        Some(network) => format!("{}.{}{}", container.name, network, rules.suffix),
        None => format!("{}{}", container.name, rules.suffix),
    };
    records.push(NameRecord::new(primary, address));

    for alias in rules.aliases.aliases_for(&container.name) {
        records.push(NameRecord::new(alias, address));
    }
    records
}

/// Picks the address to publish and the non-default network, if any, the
/// container is also attached to.
///
/// The default network's address wins.  A container that is not on the
/// default network uses its first attachment by network name.  With no
/// attachment at all the address is empty.
fn select_address<'a>(
    container: &'a ContainerSnapshot,
    default_network: &str,
) -> (&'a str, Option<&'a str>) {
    let secondary = container
        .networks
        .keys()
        .find(|name| name.as_str() != default_network)
        .map(String::as_str);

    let address = container
        .networks
        .get(default_network)
        .or_else(|| container.networks.values().next())
        .map(String::as_str)
        .unwrap_or_default();

    (address, secondary)
}
