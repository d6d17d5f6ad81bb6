//! KVM backend driven through libvirt's `virsh`

use super::{
    authorized_key, ensure_ssh_key, first_ipv4, run_tool, write_userdata_disk, Driver, DriverKind,
    DriverOptions, SshCredentials,
};
use crate::models::PowerState;
use crate::{Error, Result};

const VIRSH: &str = "virsh";
const CONNECTION_URI: &str = "qemu:///system";
const NETWORK: &str = "minikube-net";

pub struct KvmDriver {
    opts: DriverOptions,
}

impl KvmDriver {
    pub fn new(opts: DriverOptions) -> Self {
        Self { opts }
    }

    fn virsh(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["--connect", CONNECTION_URI];
        full.extend_from_slice(args);
        run_tool(VIRSH, &full)
    }

    fn ensure_network(&self) -> Result<()> {
        let nets = self.virsh(&["net-list", "--all", "--name"])?;
        if nets.lines().any(|l| l.trim() == NETWORK) {
            return Ok(());
        }
        let xml_path = self.opts.machine_dir.join("network.xml");
        std::fs::write(&xml_path, network_xml(&self.opts.host_only_cidr)?)?;
        let xml = xml_path.to_string_lossy().to_string();
        self.virsh(&["net-define", &xml])?;
        self.virsh(&["net-autostart", NETWORK])?;
        self.virsh(&["net-start", NETWORK])?;
        Ok(())
    }

    fn domain_xml(&self) -> String {
        format!(
            r#"<domain type='kvm'>
  <name>{name}</name>
  <memory unit='MiB'>{memory}</memory>
  <vcpu>{cpus}</vcpu>
  <os><type>hvm</type><boot dev='cdrom'/><boot dev='hd'/></os>
  <features><acpi/><apic/><pae/></features>
  <devices>
    <disk type='file' device='cdrom'>
      <source file='{iso}'/><target dev='hdc' bus='scsi'/><readonly/>
    </disk>
    <disk type='file' device='disk'>
      <driver name='qemu' type='raw' cache='default' io='threads'/>
      <source file='{disk}'/><target dev='hda' bus='virtio'/>
    </disk>
    <interface type='network'><source network='default'/><model type='virtio'/></interface>
    <interface type='network'><source network='{network}'/><model type='virtio'/></interface>
    <serial type='pty'><target port='0'/></serial>
    <console type='pty'><target type='serial' port='0'/></console>
  </devices>
</domain>"#,
            name = self.opts.machine_name,
            memory = self.opts.memory_mb,
            cpus = self.opts.cpus,
            iso = self.opts.iso_path.display(),
            disk = self.opts.disk_path("rawdisk").display(),
            network = NETWORK,
        )
    }
}

impl Driver for KvmDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Kvm
    }

    fn create(&self) -> Result<()> {
        ensure_ssh_key(&self.opts)?;
        tracing::info!(machine = %self.opts.machine_name, "Creating KVM domain");

        write_userdata_disk(
            &self.opts.disk_path("rawdisk"),
            self.opts.disk_size_mb,
            &authorized_key(&self.opts)?,
        )?;

        self.ensure_network()?;

        let xml_path = self.opts.machine_dir.join("domain.xml");
        std::fs::write(&xml_path, self.domain_xml())?;
        self.virsh(&["define", &xml_path.to_string_lossy()])?;
        self.start()
    }

    fn ip(&self) -> Result<String> {
        let output = self.virsh(&["domifaddr", &self.opts.machine_name, "--source", "lease"])?;
        // The lease on our private network is the reachable one
        let ips: Vec<String> = output.lines().filter_map(first_ipv4).collect();
        ips.last()
            .cloned()
            .ok_or_else(|| Error::Command(format!("no lease found for {}", self.opts.machine_name)))
    }

    fn state(&self) -> Result<PowerState> {
        let output = self.virsh(&["domstate", &self.opts.machine_name])?;
        Ok(parse_domstate(&output))
    }

    fn start(&self) -> Result<()> {
        self.virsh(&["start", &self.opts.machine_name])?;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.virsh(&["shutdown", &self.opts.machine_name])?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if self.state()? == PowerState::Running {
            self.virsh(&["destroy", &self.opts.machine_name])?;
        }
        self.virsh(&["undefine", &self.opts.machine_name])?;
        let disk = self.opts.disk_path("rawdisk");
        if disk.exists() {
            std::fs::remove_file(disk)?;
        }
        Ok(())
    }

    fn ssh_credentials(&self) -> SshCredentials {
        self.opts.ssh.clone()
    }
}

fn parse_domstate(output: &str) -> PowerState {
    match output.trim() {
        "running" => PowerState::Running,
        "paused" => PowerState::Paused,
        "shut off" | "crashed" => PowerState::Stopped,
        "in shutdown" => PowerState::Stopping,
        "pmsuspended" => PowerState::Saved,
        "" => PowerState::None,
        _ => PowerState::Error,
    }
}

/// NAT network definition for a `gateway/prefix` CIDR
fn network_xml(cidr: &str) -> Result<String> {
    let (gateway, _) = cidr
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("invalid CIDR {cidr}")))?;
    let addr: std::net::Ipv4Addr = gateway
        .parse()
        .map_err(|_| Error::Config(format!("invalid gateway in {cidr}")))?;
    let [a, b, c, _] = addr.octets();
    Ok(format!(
        r#"<network>
  <name>{NETWORK}</name>
  <ip address='{gateway}' netmask='255.255.255.0'>
    <dhcp><range start='{a}.{b}.{c}.2' end='{a}.{b}.{c}.254'/></dhcp>
  </ip>
</network>"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domstate() {
        assert_eq!(parse_domstate("running\n\n"), PowerState::Running);
        assert_eq!(parse_domstate("shut off\n"), PowerState::Stopped);
        assert_eq!(parse_domstate("in shutdown"), PowerState::Stopping);
        assert_eq!(parse_domstate(""), PowerState::None);
        assert_eq!(parse_domstate("blocked"), PowerState::Error);
    }

    #[test]
    fn test_network_xml() {
        let xml = network_xml("192.168.39.1/24").unwrap();
        assert!(xml.contains("address='192.168.39.1'"));
        assert!(xml.contains("start='192.168.39.2'"));
        assert!(network_xml("192.168.39.1").is_err());
        assert!(network_xml("nothing/24").is_err());
    }
}
