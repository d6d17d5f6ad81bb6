//! Pushes the control-plane binary and add-on manifests to the VM and starts localkube

use crate::assets::{enabled_addon_files, CopyableFile};
use crate::cache::AssetCache;
use crate::config::{KubernetesConfig, Settings};
use crate::constants::*;
use crate::driver::Driver;
use crate::ssh::{transfer_file, CommandChannel};
use crate::template;
use crate::{Error, Result, ResultExt};
use minijinja::context;
use std::path::{Path, PathBuf};

const LOCALKUBE_PERMS: &str = "0777";

/// Env var pointing at a localkube binary to use instead of the one next to the executable
pub const LOCALKUBE_PATH_ENV: &str = "MINIKUBE_LOCALKUBE_PATH";

const START_COMMAND: &str = "sudo sh -c 'PATH=/usr/local/sbin:$PATH nohup {{ binary }}\
{% for flag in flags %} {{ flag }}{% endfor %} \
--generate-certs=false --logtostderr=true --enable-dns=false --node-ip={{ node_ip }} \
> {{ stdout }} 2> {{ stderr }} < /dev/null & echo $! > {{ pidfile }} &'";

/// Prints `Running` or `Stopped` depending on whether the recorded pid is alive
pub const STATUS_COMMAND: &str = "if ps $(cat /var/run/localkube.pid) 2>&1 1>/dev/null; \
then echo \"Running\"; else echo \"Stopped\"; fi";

pub const LOGS_COMMAND: &str = "tail -n +1 /var/log/localkube.err /var/log/localkube.out";

/// Local inputs for an update: where the bundled binary is, what is enabled, where downloads go
pub struct ClusterAssets<'a> {
    pub home: &'a Path,
    pub settings: &'a Settings,
    pub cache: &'a AssetCache,
    pub bundled_localkube: PathBuf,
}

impl<'a> ClusterAssets<'a> {
    pub fn new(home: &'a Path, settings: &'a Settings, cache: &'a AssetCache) -> Self {
        Self {
            home,
            settings,
            cache,
            bundled_localkube: bundled_localkube_path(),
        }
    }

    pub fn with_bundled_localkube(mut self, path: impl Into<PathBuf>) -> Self {
        self.bundled_localkube = path.into();
        self
    }
}

/// `$MINIKUBE_LOCALKUBE_PATH`, else `localkube` beside the running executable
pub fn bundled_localkube_path() -> PathBuf {
    if let Some(path) = std::env::var_os(LOCALKUBE_PATH_ENV) {
        return PathBuf::from(path);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(LOCALKUBE_BINARY)))
        .unwrap_or_else(|| PathBuf::from(LOCALKUBE_BINARY))
}

/// Push localkube and every enabled add-on to the VM behind `driver`
pub fn update_cluster(
    driver: &dyn Driver,
    config: &KubernetesConfig,
    assets: &ClusterAssets<'_>,
) -> Result<()> {
    let channel = driver.channel().context("Error creating new ssh client")?;
    update_cluster_with(channel.as_ref(), config, assets)
}

pub fn update_cluster_with(
    channel: &dyn CommandChannel,
    config: &KubernetesConfig,
    assets: &ClusterAssets<'_>,
) -> Result<()> {
    if config.version_was_specified() {
        let file = localkube_from_uri(config, assets.cache)
            .context("Error updating localkube from uri")?;
        transfer_file(&file, channel).context("Error updating localkube from uri")?;
    } else {
        let file = localkube_from_asset(&assets.bundled_localkube)
            .context("Error updating localkube from asset")?;
        transfer_file(&file, channel).context("Error updating localkube from asset")?;
    }

    let files = enabled_addon_files(assets.settings, assets.home)?;
    tracing::info!(count = files.len(), "Transferring add-on files");
    for file in &files {
        transfer_file(file, channel)?;
    }
    Ok(())
}

fn localkube_from_uri(config: &KubernetesConfig, cache: &AssetCache) -> Result<CopyableFile> {
    let uri = config.localkube_uri();
    tracing::info!(version = %config.kubernetes_version, uri = %uri, "Using localkube from uri");
    let path = cache.cache_localkube(&uri)?;
    Ok(localkube_file(path))
}

fn localkube_from_asset(path: &Path) -> Result<CopyableFile> {
    if !path.is_file() {
        return Err(Error::Config(format!(
            "bundled localkube not found at {} (set {})",
            path.display(),
            LOCALKUBE_PATH_ENV
        )));
    }
    Ok(localkube_file(path.to_path_buf()))
}

fn localkube_file(path: PathBuf) -> CopyableFile {
    CopyableFile::from_path(path, REMOTE_LOCALKUBE_DIR, LOCALKUBE_BINARY, LOCALKUBE_PERMS)
}

/// The shell command that launches localkube with `config`
pub fn start_command(config: &KubernetesConfig) -> Result<String> {
    if config.node_ip.is_empty() {
        return Err(Error::Config("node ip must be set to start localkube".into()));
    }

    let mut flags = vec![format!("--dns-domain={}", config.dns_domain)];
    if let Some(runtime) = &config.container_runtime {
        flags.push(format!("--container-runtime={runtime}"));
    }
    if let Some(plugin) = &config.network_plugin {
        flags.push(format!("--network-plugin={plugin}"));
    }
    if let Some(gates) = &config.feature_gates {
        flags.push(format!("--feature-gates={gates}"));
    }
    for option in &config.extra_options {
        flags.push(format!("--extra-config={option}"));
    }

    template::render(
        "start",
        START_COMMAND,
        context! {
            binary => format!("{REMOTE_LOCALKUBE_DIR}/{LOCALKUBE_BINARY}"),
            flags => flags,
            node_ip => config.node_ip,
            stdout => LOCALKUBE_STDOUT,
            stderr => LOCALKUBE_STDERR,
            pidfile => LOCALKUBE_PIDFILE,
        },
    )
}

/// Launch localkube on the VM
pub fn start_cluster(driver: &dyn Driver, config: &KubernetesConfig) -> Result<()> {
    let command = start_command(config).context("Error generating start command")?;
    tracing::debug!(command = %command, "Starting localkube");
    driver
        .run_command(&command)
        .context("Error running ssh command")?;
    Ok(())
}
