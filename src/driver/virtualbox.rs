//! VirtualBox backend driven through `VBoxManage`

use super::{
    authorized_key, ensure_ssh_key, first_ipv4, run_tool, write_userdata_disk, Driver, DriverKind,
    DriverOptions, SshCredentials,
};
use crate::models::PowerState;
use crate::{Error, Result};

const VBOXMANAGE: &str = "VBoxManage";
const HOST_ONLY_IP_PROPERTY: &str = "/VirtualBox/GuestInfo/Net/1/V4/IP";

pub struct VirtualBoxDriver {
    opts: DriverOptions,
}

impl VirtualBoxDriver {
    pub fn new(opts: DriverOptions) -> Self {
        Self { opts }
    }

    fn vbox(&self, args: &[&str]) -> Result<String> {
        run_tool(VBOXMANAGE, args)
    }

    /// Find or create the host-only interface serving our CIDR
    fn host_only_interface(&self) -> Result<String> {
        let gateway = self
            .opts
            .host_only_cidr
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let list = self.vbox(&["list", "hostonlyifs"])?;
        if let Some(name) = parse_host_only_interface(&list, &gateway) {
            return Ok(name);
        }

        let created = self.vbox(&["hostonlyif", "create"])?;
        let name = created
            .split('\'')
            .nth(1)
            .ok_or_else(|| Error::Command(format!("unexpected hostonlyif output: {created}")))?
            .to_string();
        self.vbox(&["hostonlyif", "ipconfig", &name, "--ip", &gateway, "--netmask", "255.255.255.0"])?;
        Ok(name)
    }

    /// Hardware settings applied right after registration
    fn modifyvm_args(&self) -> Vec<String> {
        let memory = self.opts.memory_mb.to_string();
        let cpus = self.opts.cpus.to_string();
        [
            "modifyvm",
            self.opts.machine_name.as_str(),
            "--ostype",
            "Linux26_64",
            "--memory",
            memory.as_str(),
            "--cpus",
            cpus.as_str(),
            "--acpi",
            "on",
            "--ioapic",
            "on",
            "--rtcuseutc",
            "on",
            "--boot1",
            "dvd",
            "--boot2",
            "disk",
            "--nic1",
            "nat",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// VMDK data disk seeded with the userdata archive
    fn create_data_disk(&self, disk: &str) -> Result<()> {
        let raw = self.opts.disk_path("raw");
        write_userdata_disk(&raw, self.opts.disk_size_mb, &authorized_key(&self.opts)?)?;
        let raw_path = raw.to_string_lossy().to_string();
        let converted = self.vbox(&["convertfromraw", &raw_path, disk, "--format", "VMDK"]);
        std::fs::remove_file(&raw)?;
        converted?;
        Ok(())
    }
}

impl Driver for VirtualBoxDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::VirtualBox
    }

    fn create(&self) -> Result<()> {
        ensure_ssh_key(&self.opts)?;
        let name = self.opts.machine_name.as_str();
        let base = self.opts.machine_dir.to_string_lossy().to_string();
        let disk = self.opts.disk_path("vmdk").to_string_lossy().to_string();
        let iso = self.opts.iso_path.to_string_lossy().to_string();

        tracing::info!(machine = %name, "Creating VirtualBox VM");
        self.vbox(&["createvm", "--basefolder", &base, "--name", name, "--register"])?;
        let modify = self.modifyvm_args();
        self.vbox(&modify.iter().map(String::as_str).collect::<Vec<_>>())?;

        let hostonly = self.host_only_interface()?;
        self.vbox(&["modifyvm", name, "--nic2", "hostonly", "--hostonlyadapter2", &hostonly])?;

        self.vbox(&["storagectl", name, "--name", "SATA", "--add", "sata", "--hostiocache", "on"])?;
        self.vbox(&[
            "storageattach", name, "--storagectl", "SATA", "--port", "0", "--device", "0",
            "--type", "dvddrive", "--medium", &iso,
        ])?;
        self.create_data_disk(&disk)?;
        self.vbox(&[
            "storageattach", name, "--storagectl", "SATA", "--port", "1", "--device", "0",
            "--type", "hdd", "--medium", &disk,
        ])?;

        self.start()
    }

    fn ip(&self) -> Result<String> {
        let output = self.vbox(&["guestproperty", "get", &self.opts.machine_name, HOST_ONLY_IP_PROPERTY])?;
        first_ipv4(&output).ok_or_else(|| {
            Error::Command(format!("no IP reported for {}", self.opts.machine_name))
        })
    }

    fn state(&self) -> Result<PowerState> {
        let output = self.vbox(&["showvminfo", &self.opts.machine_name, "--machinereadable"])?;
        Ok(parse_vm_state(&output))
    }

    fn start(&self) -> Result<()> {
        self.vbox(&["startvm", &self.opts.machine_name, "--type", "headless"])?;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.vbox(&["controlvm", &self.opts.machine_name, "acpipowerbutton"])?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if self.state()? == PowerState::Running {
            self.vbox(&["controlvm", &self.opts.machine_name, "poweroff"])?;
        }
        self.vbox(&["unregistervm", &self.opts.machine_name, "--delete"])?;
        Ok(())
    }

    fn ssh_credentials(&self) -> SshCredentials {
        self.opts.ssh.clone()
    }
}

/// Map `showvminfo --machinereadable` output to a power state
fn parse_vm_state(output: &str) -> PowerState {
    let value = output
        .lines()
        .find_map(|l| l.strip_prefix("VMState="))
        .map(|v| v.trim_matches('"'));
    match value {
        Some("running") => PowerState::Running,
        Some("paused") => PowerState::Paused,
        Some("saved") => PowerState::Saved,
        Some("poweroff") | Some("aborted") => PowerState::Stopped,
        Some("starting") | Some("restoring") => PowerState::Starting,
        Some("stopping") => PowerState::Stopping,
        Some(_) => PowerState::Error,
        None => PowerState::None,
    }
}

/// Name of the host-only interface whose address is `gateway`
fn parse_host_only_interface(list: &str, gateway: &str) -> Option<String> {
    let mut current = None;
    for line in list.lines() {
        if let Some(name) = line.strip_prefix("Name:") {
            current = Some(name.trim().to_string());
        } else if let Some(ip) = line.strip_prefix("IPAddress:") {
            if ip.trim() == gateway {
                return current;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::models::Host;
    use std::path::Path;

    fn driver() -> VirtualBoxDriver {
        let machine = MachineConfig::builder().memory_mb(4096).cpus(3).build();
        let host = Host::new(
            "minikube",
            DriverKind::VirtualBox,
            machine,
            "/cache/minikube.iso",
            SshCredentials::for_machine(Path::new("/m/minikube")),
        );
        VirtualBoxDriver::new(DriverOptions::from_host(&host, Path::new("/m")))
    }

    #[test]
    fn test_modifyvm_args() {
        let args = driver().modifyvm_args();
        assert_eq!(&args[..2], &["modifyvm".to_string(), "minikube".to_string()]);
        let value = |flag: &str| {
            let idx = args.iter().position(|a| a == flag).unwrap();
            args[idx + 1].clone()
        };
        assert_eq!(value("--memory"), "4096");
        assert_eq!(value("--cpus"), "3");
        assert_eq!(value("--nic1"), "nat");
        // Guest is reached on its host-only address, so no NAT port forward is needed
        assert!(!args.iter().any(|a| a.starts_with("--natpf")));
        assert_eq!(args.len() % 2, 0);
    }

    #[test]
    fn test_parse_vm_state() {
        assert_eq!(parse_vm_state("name=\"minikube\"\nVMState=\"running\"\n"), PowerState::Running);
        assert_eq!(parse_vm_state("VMState=\"poweroff\""), PowerState::Stopped);
        assert_eq!(parse_vm_state("VMState=\"saved\""), PowerState::Saved);
        assert_eq!(parse_vm_state("VMState=\"gurumeditation\""), PowerState::Error);
        assert_eq!(parse_vm_state(""), PowerState::None);
    }

    #[test]
    fn test_parse_host_only_interface() {
        let list = "Name:            vboxnet0\nIPAddress:       192.168.56.1\n\n\
                    Name:            vboxnet1\nIPAddress:       192.168.99.1\n";
        assert_eq!(parse_host_only_interface(list, "192.168.99.1"), Some("vboxnet1".into()));
        assert_eq!(parse_host_only_interface(list, "10.0.0.1"), None);
    }
}
