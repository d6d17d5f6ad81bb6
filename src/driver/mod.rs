//! Hypervisor backends
//!
//! Every backend implements [`Driver`]. The set of backends is closed: a tag
//! either parses to a [`DriverKind`] or is rejected as unsupported before any
//! host record is touched.

mod hyperv;
mod kvm;
mod virtualbox;
mod vmware;

pub use hyperv::HyperVDriver;
pub use kvm::KvmDriver;
pub use virtualbox::VirtualBoxDriver;
pub use vmware::VmwareFusionDriver;

use crate::models::{Host, PowerState};
use crate::ssh::{CommandChannel, SshClient};
use crate::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

#[cfg(test)]
use mockall::automock;

/// Supported hypervisor backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    VirtualBox,
    VmwareFusion,
    Kvm,
    HyperV,
}

impl DriverKind {
    pub const ALL: [DriverKind; 4] = [
        DriverKind::VirtualBox,
        DriverKind::VmwareFusion,
        DriverKind::Kvm,
        DriverKind::HyperV,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            DriverKind::VirtualBox => "virtualbox",
            DriverKind::VmwareFusion => "vmwarefusion",
            DriverKind::Kvm => "kvm",
            DriverKind::HyperV => "hyperv",
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl std::str::FromStr for DriverKind {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        DriverKind::ALL
            .into_iter()
            .find(|k| k.tag() == tag)
            .ok_or_else(|| Error::UnsupportedDriver(tag.to_string()))
    }
}

/// How to reach the VM over SSH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredentials {
    pub user: String,
    pub port: u16,
    pub key_path: PathBuf,
}

impl SshCredentials {
    pub fn new(user: impl Into<String>, port: u16, key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            port,
            key_path: key_path.into(),
        }
    }

    /// Default credentials for a machine whose files live in `machine_dir`
    pub fn for_machine(machine_dir: &Path) -> Self {
        Self::new("docker", 22, machine_dir.join("id_rsa"))
    }
}

/// Capability set a hypervisor backend must provide
#[cfg_attr(test, automock)]
pub trait Driver {
    fn kind(&self) -> DriverKind;

    /// Provision the VM from the cached boot image and power it on
    fn create(&self) -> Result<()>;

    fn ip(&self) -> Result<String>;

    fn state(&self) -> Result<PowerState>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Destroy the VM and its disks
    fn remove(&self) -> Result<()>;

    fn ssh_credentials(&self) -> SshCredentials;

    /// Authenticated channel into the VM
    fn channel(&self) -> Result<Box<dyn CommandChannel>> {
        Ok(Box::new(SshClient::connect(self.ip()?, self.ssh_credentials())?))
    }

    /// Run a shell command inside the VM
    fn run_command(&self, command: &str) -> Result<String> {
        self.channel()?.run(command)
    }
}

/// Resource parameters every backend is configured with
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub machine_name: String,
    /// Directory holding the machine's disks, key and record
    pub machine_dir: PathBuf,
    pub iso_path: PathBuf,
    pub memory_mb: u64,
    pub cpus: u32,
    pub disk_size_mb: u64,
    pub host_only_cidr: String,
    pub ssh: SshCredentials,
}

impl DriverOptions {
    pub fn from_host(host: &Host, machines_dir: &Path) -> Self {
        Self {
            machine_name: host.name.clone(),
            machine_dir: machines_dir.join(&host.name),
            iso_path: PathBuf::from(&host.iso_path),
            memory_mb: host.machine.memory_mb,
            cpus: host.machine.cpus,
            disk_size_mb: host.machine.disk_size_mb,
            host_only_cidr: host.machine.host_only_cidr.clone(),
            ssh: host.ssh.clone(),
        }
    }

    pub fn disk_path(&self, extension: &str) -> PathBuf {
        self.machine_dir
            .join(format!("{}.{}", self.machine_name, extension))
    }
}

/// Builds the driver for a persisted host
pub trait DriverFactory {
    fn driver_for(&self, host: &Host) -> Result<Box<dyn Driver>>;
}

/// The compiled-in backends
pub struct BuiltinDrivers {
    machines_dir: PathBuf,
}

impl BuiltinDrivers {
    pub fn new(machines_dir: impl Into<PathBuf>) -> Self {
        Self {
            machines_dir: machines_dir.into(),
        }
    }
}

impl DriverFactory for BuiltinDrivers {
    fn driver_for(&self, host: &Host) -> Result<Box<dyn Driver>> {
        let opts = DriverOptions::from_host(host, &self.machines_dir);
        let driver: Box<dyn Driver> = match host.driver {
            DriverKind::VirtualBox => Box::new(VirtualBoxDriver::new(opts)),
            DriverKind::VmwareFusion => Box::new(VmwareFusionDriver::new(opts)),
            DriverKind::Kvm => Box::new(KvmDriver::new(opts)),
            DriverKind::HyperV => Box::new(HyperVDriver::new(opts)),
        };
        Ok(driver)
    }
}

/// Execute a hypervisor management tool and return its stdout
pub(crate) fn run_tool(program: &str, args: &[&str]) -> Result<String> {
    tracing::debug!(program, ?args, "Running hypervisor tool");
    let output = Command::new(program).args(args).output().map_err(|e| {
        Error::Command(format!("failed to execute {program}: {e}"))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        return Err(Error::Command(format!(
            "{} {}\nExit code: {:?}\nStderr: {}\nStdout: {}",
            program,
            args.join(" "),
            output.status.code(),
            stderr.trim(),
            stdout.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Create the machine directory and an SSH keypair for it, if missing
pub(crate) fn ensure_ssh_key(opts: &DriverOptions) -> Result<()> {
    std::fs::create_dir_all(&opts.machine_dir)?;
    if opts.ssh.key_path.exists() {
        return Ok(());
    }
    let key = opts.ssh.key_path.to_string_lossy();
    run_tool(
        "ssh-keygen",
        &["-q", "-t", "rsa", "-b", "2048", "-N", "", "-C", &opts.machine_name, "-f", &key],
    )?;
    Ok(())
}

pub(crate) fn public_key_path(key_path: &Path) -> PathBuf {
    let mut name = key_path.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

/// The machine's public key, to be authorized inside the guest
pub(crate) fn authorized_key(opts: &DriverOptions) -> Result<Vec<u8>> {
    let path = public_key_path(&opts.ssh.key_path);
    std::fs::read(&path).with_context(|| format!("Error reading public key {}", path.display()))
}

/// Name of the first tar entry; the guest formats any data disk starting with it
pub(crate) const B2D_FORMAT_MAGIC: &str = "boot2docker, please format-me";

/// Guest path the userdata archive is unpacked under
pub(crate) const GUEST_HOME: &str = "/home/docker";

/// Tar archive the guest unpacks into its home directory on first boot,
/// authorizing `public_key` for the docker user
pub(crate) fn userdata_image(public_key: &[u8]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut magic = tar::Header::new_gnu();
    magic.set_mode(0o644);
    magic.set_size(B2D_FORMAT_MAGIC.len() as u64);
    builder.append_data(&mut magic, B2D_FORMAT_MAGIC, B2D_FORMAT_MAGIC.as_bytes())?;

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_mode(0o700);
    dir.set_size(0);
    builder.append_data(&mut dir, ".ssh", std::io::empty())?;

    for name in [".ssh/authorized_keys", ".ssh/authorized_keys2"] {
        let mut key = tar::Header::new_gnu();
        key.set_mode(0o644);
        key.set_size(public_key.len() as u64);
        builder.append_data(&mut key, name, public_key)?;
    }

    Ok(builder.into_inner()?)
}

/// Raw disk of `size_mb` that starts with the userdata archive
pub(crate) fn write_userdata_disk(path: &Path, size_mb: u64, public_key: &[u8]) -> Result<()> {
    let image = userdata_image(public_key)?;
    let mut disk = std::fs::File::create(path)?;
    disk.write_all(&image)?;
    disk.set_len(size_mb * 1024 * 1024)?;
    Ok(())
}

/// First line of tool output that looks like an IPv4 address
pub(crate) fn first_ipv4(output: &str) -> Option<String> {
    output
        .split(|c: char| c.is_whitespace() || c == '/' || c == '=' || c == '"')
        .find(|tok| tok.parse::<std::net::Ipv4Addr>().is_ok())
        .map(str::to_string)
}
