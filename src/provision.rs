//! Docker engine setup inside the VM: daemon TLS material and engine options

use crate::certs::generate_docker_certs;
use crate::config::MachineConfig;
use crate::constants::*;
use crate::driver::DriverKind;
use crate::ssh::{transfer, CommandChannel};
use crate::template;
use crate::{Result, ResultExt};
use minijinja::context;
use std::path::Path;

/// Sourced by the guest's docker init script
const PROFILE_TEMPLATE: &str = "EXTRA_ARGS='
--label provider={{ provider }}
{%- for registry in insecure_registry %}
--insecure-registry {{ registry }}
{%- endfor %}
{%- for mirror in registry_mirror %}
--registry-mirror {{ mirror }}
{%- endfor %}
'
CACERT={{ docker_dir }}/{{ ca_cert }}
DOCKER_HOST='-H tcp://0.0.0.0:{{ port }}'
DOCKER_STORAGE=aufs
DOCKER_TLS=auto
SERVERKEY={{ docker_dir }}/{{ server_key }}
SERVERCERT={{ docker_dir }}/{{ server_cert }}
{% for env in docker_env %}
export \"{{ env }}\"
{%- endfor %}
";

pub const RESTART_DOCKER_COMMAND: &str = "sudo /etc/init.d/docker restart";

/// Inputs of the auth step for one machine
pub struct AuthOptions<'a> {
    pub home: &'a Path,
    pub machine_dir: &'a Path,
    pub ip: &'a str,
    pub provider: DriverKind,
    /// Engine options recorded when the machine was created
    pub engine: &'a MachineConfig,
}

/// Daemon options file carrying the machine's engine options
pub fn docker_profile(provider: DriverKind, engine: &MachineConfig) -> Result<String> {
    template::render(
        "profile",
        PROFILE_TEMPLATE,
        context! {
            provider => provider.tag(),
            insecure_registry => engine.insecure_registry,
            registry_mirror => engine.registry_mirror,
            docker_env => engine.docker_env,
            docker_dir => REMOTE_DOCKER_DIR,
            ca_cert => DOCKER_CA_CERT,
            server_cert => DOCKER_SERVER_CERT,
            server_key => DOCKER_SERVER_KEY,
            port => DOCKER_DAEMON_PORT,
        },
    )
}

/// Issue docker TLS material for the VM's address, install it with the engine
/// options, then restart the daemon so both take effect.
pub fn configure_auth(channel: &dyn CommandChannel, opts: &AuthOptions<'_>) -> Result<()> {
    let certs_dir = opts.home.join("certs");
    generate_docker_certs(&certs_dir, opts.machine_dir, opts.ip)
        .context("Error generating docker certs")?;

    let files = [
        (certs_dir.as_path(), DOCKER_CA_CERT),
        (opts.machine_dir, DOCKER_SERVER_CERT),
        (opts.machine_dir, DOCKER_SERVER_KEY),
    ];
    for (dir, name) in files {
        let path = dir.join(name);
        let data = std::fs::read(&path)
            .with_context(|| format!("Error reading file: {}", path.display()))?;
        transfer(&data, REMOTE_DOCKER_DIR, name, perms_for(name), channel)
            .with_context(|| format!("Error transferring {name}"))?;
    }

    let profile = docker_profile(opts.provider, opts.engine)?;
    transfer(
        profile.as_bytes(),
        REMOTE_DOCKER_PROFILE_DIR,
        DOCKER_PROFILE,
        PUBLIC_FILE_PERMS,
        channel,
    )
    .context("Error writing docker options")?;

    channel
        .run(RESTART_DOCKER_COMMAND)
        .context("Error restarting docker")?;
    tracing::info!(ip = opts.ip, "Docker daemon configured");
    Ok(())
}
