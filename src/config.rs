use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::names::normalize_suffix;
use crate::types::AliasTable;

/// Keys still honoured under their historical `DOCKER_` names.
const LEGACY_ENV_KEYS: &[&str] = &["domain", "default_network", "static_names"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Suffix appended to container names, e.g. `.docker`.
    pub domain: String,
    pub default_network: String,
    /// `name:alias[,name:alias...]`
    pub static_names: String,
    /// Directory holding the generated `dnsmasq.conf`.
    pub config_dir: PathBuf,
    pub resolved_dropin: PathBuf,
    /// Address dnsmasq listens on. Defaults to the default network's gateway.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_address: Option<IpAddr>,
    pub dnsmasq_binary: String,
    pub upstream_servers: Vec<String>,
    pub settle_delay_ms: u64,
    pub operation_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: String::new(),
            default_network: "bridge".into(),
            static_names: String::new(),
            config_dir: PathBuf::from("/tmp/docker-domains"),
            resolved_dropin: PathBuf::from("/etc/systemd/resolved.conf.d/docker-dnsmasq.conf"),
            listen_address: None,
            dnsmasq_binary: "dnsmasq".into(),
            upstream_servers: Vec::new(),
            settle_delay_ms: 200,
            operation_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, an optional file and the
    /// environment.  Without `file`, `docker-domains.toml` and
    /// `docker-domains.json` in the working directory are tried.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        figment = match file {
            Some(path) if has_extension(path, "json") => figment.merge(Json::file(path)),
            Some(path) => figment.merge(Toml::file(path)),
            None => figment
                .merge(Toml::file("docker-domains.toml"))
                .merge(Json::file("docker-domains.json")),
        };
        Self::from_figment(
            figment
                .merge(Env::prefixed("DOCKER_").only(LEGACY_ENV_KEYS))
                .merge(Env::prefixed("DOCKER_DOMAINS_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        config.domain = normalize_suffix(&config.domain);
        if config.default_network.trim().is_empty() {
            config.default_network = Config::default().default_network;
        }
        Ok(config)
    }

    /// Parses the static alias list. Called once at startup.
    pub fn alias_table(&self) -> AliasTable {
        AliasTable::parse(&self.static_names)
    }

    /// Path of the document dnsmasq reads.
    pub fn dnsmasq_conf(&self) -> PathBuf {
        self.config_dir.join("dnsmasq.conf")
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
