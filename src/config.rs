//! Machine and cluster configuration with builder pattern, plus the persisted settings file

use crate::constants::*;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Everything needed to create the VM. Never mutated once a host exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub iso_url: String,
    pub memory_mb: u64,
    pub cpus: u32,
    pub disk_size_mb: u64,
    /// Backend tag, resolved to a driver when the host is created
    pub vm_driver: String,
    pub host_only_cidr: String,
    pub docker_env: Vec<String>,
    pub insecure_registry: Vec<String>,
    pub registry_mirror: Vec<String>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            iso_url: DEFAULT_ISO_URL.to_string(),
            memory_mb: DEFAULT_MEMORY_MB,
            cpus: DEFAULT_CPUS,
            disk_size_mb: DEFAULT_DISK_SIZE_MB,
            vm_driver: DEFAULT_VM_DRIVER.to_string(),
            host_only_cidr: DEFAULT_HOST_ONLY_CIDR.to_string(),
            docker_env: Vec::new(),
            insecure_registry: Vec::new(),
            registry_mirror: Vec::new(),
        }
    }
}

impl MachineConfig {
    pub fn builder() -> MachineConfigBuilder {
        MachineConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_mb < 1024 {
            return Err(Error::Config("memory must be at least 1024MB".into()));
        }
        if self.cpus < 1 {
            return Err(Error::Config("cpus must be at least 1".into()));
        }
        if self.disk_size_mb < 2000 {
            return Err(Error::Config("disk size must be at least 2000MB".into()));
        }
        if self.iso_url.is_empty() {
            return Err(Error::Config("iso url cannot be empty".into()));
        }
        if !self.host_only_cidr.contains('/') {
            return Err(Error::Config(format!(
                "host-only CIDR {} is not in address/prefix form",
                self.host_only_cidr
            )));
        }
        for env in &self.docker_env {
            if !env.contains('=') {
                return Err(Error::Config(format!("docker env {env} is not KEY=VALUE")));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MachineConfigBuilder {
    config: MachineConfig,
}

impl MachineConfigBuilder {
    pub fn iso_url(mut self, url: impl Into<String>) -> Self {
        self.config.iso_url = url.into();
        self
    }

    pub fn memory_mb(mut self, mb: u64) -> Self {
        self.config.memory_mb = mb;
        self
    }

    pub fn cpus(mut self, count: u32) -> Self {
        self.config.cpus = count;
        self
    }

    pub fn disk_size_mb(mut self, mb: u64) -> Self {
        self.config.disk_size_mb = mb;
        self
    }

    pub fn vm_driver(mut self, tag: impl Into<String>) -> Self {
        self.config.vm_driver = tag.into();
        self
    }

    pub fn host_only_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.config.host_only_cidr = cidr.into();
        self
    }

    pub fn docker_env(mut self, env: impl Into<String>) -> Self {
        self.config.docker_env.push(env.into());
        self
    }

    pub fn insecure_registry(mut self, registry: impl Into<String>) -> Self {
        self.config.insecure_registry.push(registry.into());
        self
    }

    pub fn registry_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.config.registry_mirror.push(mirror.into());
        self
    }

    pub fn build(self) -> MachineConfig {
        self.config
    }

    pub fn build_validated(self) -> Result<MachineConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

/// A `component.key=value` flag passed through to one control-plane component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraOption {
    pub component: String,
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for ExtraOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("extra option {s} is not component.key=value")))?;
        let (component, key) = path
            .split_once('.')
            .ok_or_else(|| Error::Config(format!("extra option {s} is missing a component")))?;
        if component.is_empty() || key.is_empty() {
            return Err(Error::Config(format!("extra option {s} is malformed")));
        }
        Ok(Self {
            component: component.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl std::fmt::Display for ExtraOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}={}", self.component, self.key, self.value)
    }
}

/// Which control plane to deploy and how to start it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Either a release tag such as `v1.5.1` or a direct `http(s)://` / `file://` URI
    pub kubernetes_version: String,
    pub node_ip: String,
    pub container_runtime: Option<String>,
    pub network_plugin: Option<String>,
    pub feature_gates: Option<String>,
    pub dns_domain: String,
    pub extra_options: Vec<ExtraOption>,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            node_ip: String::new(),
            container_runtime: None,
            network_plugin: None,
            feature_gates: None,
            dns_domain: DEFAULT_DNS_DOMAIN.to_string(),
            extra_options: Vec::new(),
        }
    }
}

impl KubernetesConfig {
    pub fn builder() -> KubernetesConfigBuilder {
        KubernetesConfigBuilder::default()
    }

    /// True when the requested binary differs from the one shipped with this build
    pub fn version_was_specified(&self) -> bool {
        self.kubernetes_version != DEFAULT_KUBERNETES_VERSION
    }

    /// Where a specified version's binary is fetched from
    pub fn localkube_uri(&self) -> String {
        let v = &self.kubernetes_version;
        if v.starts_with("http://") || v.starts_with("https://") || v.starts_with("file://") {
            v.clone()
        } else {
            format!("{LOCALKUBE_RELEASE_URL}/{v}/localkube-linux-amd64")
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kubernetes_version.is_empty() {
            return Err(Error::Config("kubernetes version cannot be empty".into()));
        }
        if self.dns_domain.is_empty() {
            return Err(Error::Config("dns domain cannot be empty".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct KubernetesConfigBuilder {
    config: KubernetesConfig,
}

impl KubernetesConfigBuilder {
    pub fn kubernetes_version(mut self, version: impl Into<String>) -> Self {
        self.config.kubernetes_version = version.into();
        self
    }

    pub fn node_ip(mut self, ip: impl Into<String>) -> Self {
        self.config.node_ip = ip.into();
        self
    }

    pub fn container_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.config.container_runtime = Some(runtime.into());
        self
    }

    pub fn network_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.config.network_plugin = Some(plugin.into());
        self
    }

    pub fn feature_gates(mut self, gates: impl Into<String>) -> Self {
        self.config.feature_gates = Some(gates.into());
        self
    }

    pub fn dns_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.dns_domain = domain.into();
        self
    }

    pub fn extra_option(mut self, option: ExtraOption) -> Self {
        self.config.extra_options.push(option);
        self
    }

    pub fn build(self) -> KubernetesConfig {
        self.config
    }
}

/// Persisted user settings (`<home>/config/config.json`)
#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    values: BTreeMap<String, serde_json::Value>,
}

impl Settings {
    pub fn default_path(home: &Path) -> PathBuf {
        home.join("config").join("config.json")
    }

    /// Load settings; a missing file is an empty set
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read(&path) {
            Ok(data) if data.is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(serde_json::Value::String(s)) => s
                .parse::<bool>()
                .map(Some)
                .map_err(|_| Error::Config(format!("setting {key}={s} is not a boolean"))),
            Some(other) => Err(Error::Config(format!(
                "setting {key}={other} is not a boolean"
            ))),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn unset(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&self.values)?)?;
        Ok(())
    }
}

/// Parse a CLI value: booleans and numbers become typed JSON, everything else a string
pub fn parse_setting_value(raw: &str) -> serde_json::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return serde_json::Value::Bool(b);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return serde_json::Value::from(n);
    }
    serde_json::Value::String(raw.to_string())
}
