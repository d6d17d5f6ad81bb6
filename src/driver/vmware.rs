//! VMware Fusion backend driven through `vmrun`

use super::{
    ensure_ssh_key, first_ipv4, public_key_path, run_tool, Driver, DriverKind, DriverOptions,
    SshCredentials, GUEST_HOME,
};
use crate::models::PowerState;
use crate::{Error, Result};
use std::path::PathBuf;

const VMRUN: &str = "/Applications/VMware Fusion.app/Contents/Library/vmrun";
const VDISKMANAGER: &str = "/Applications/VMware Fusion.app/Contents/Library/vmware-vdiskmanager";

/// Stock guest account, used once to install the machine key
const GUEST_USER: &str = "docker";
const GUEST_PASSWORD: &str = "tcuser";

pub struct VmwareFusionDriver {
    opts: DriverOptions,
}

impl VmwareFusionDriver {
    pub fn new(opts: DriverOptions) -> Self {
        Self { opts }
    }

    fn vmx_path(&self) -> PathBuf {
        self.opts.disk_path("vmx")
    }

    fn vmrun(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["-T", "fusion"];
        full.extend_from_slice(args);
        run_tool(VMRUN, &full)
    }

    fn vmrun_in_guest(&self, args: &[&str]) -> Result<String> {
        let mut full = vec!["-gu", GUEST_USER, "-gp", GUEST_PASSWORD];
        full.extend_from_slice(args);
        self.vmrun(&full)
    }

    /// Authorize the machine key for the guest user through VMware Tools
    fn install_key(&self) -> Result<()> {
        let vmx = self.vmx_path().to_string_lossy().to_string();
        let key = public_key_path(&self.opts.ssh.key_path).to_string_lossy().to_string();
        let ssh_dir = format!("{GUEST_HOME}/.ssh");
        let authorized = format!("{ssh_dir}/authorized_keys");

        self.vmrun_in_guest(&["runProgramInGuest", &vmx, "/bin/mkdir", "-p", &ssh_dir])?;
        self.vmrun_in_guest(&["copyFileFromHostToGuest", &vmx, &key, &authorized])?;
        self.vmrun_in_guest(&["runProgramInGuest", &vmx, "/bin/chmod", "600", &authorized])?;
        Ok(())
    }

    fn vmx(&self) -> String {
        format!(
            r#".encoding = "UTF-8"
config.version = "8"
virtualHW.version = "10"
displayName = "{name}"
guestOS = "other3xlinux-64"
memsize = "{memory}"
numvcpus = "{cpus}"
ide1:0.present = "TRUE"
ide1:0.fileName = "{iso}"
ide1:0.deviceType = "cdrom-image"
scsi0.present = "TRUE"
scsi0.virtualDev = "lsilogic"
scsi0:0.present = "TRUE"
scsi0:0.fileName = "{disk}"
ethernet0.present = "TRUE"
ethernet0.connectionType = "nat"
ethernet0.virtualDev = "vmxnet3"
ethernet0.addressType = "generated"
tools.syncTime = "TRUE"
"#,
            name = self.opts.machine_name,
            memory = self.opts.memory_mb,
            cpus = self.opts.cpus,
            iso = self.opts.iso_path.display(),
            disk = self.opts.disk_path("vmdk").display(),
        )
    }
}

impl Driver for VmwareFusionDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::VmwareFusion
    }

    fn create(&self) -> Result<()> {
        ensure_ssh_key(&self.opts)?;
        tracing::info!(machine = %self.opts.machine_name, "Creating VMware Fusion VM");

        let disk = self.opts.disk_path("vmdk").to_string_lossy().to_string();
        let size = format!("{}MB", self.opts.disk_size_mb);
        run_tool(VDISKMANAGER, &["-c", "-t", "0", "-s", &size, "-a", "lsilogic", &disk])?;

        std::fs::write(self.vmx_path(), self.vmx())?;
        self.start()?;
        // Blocks until the guest has an address, so tools are up
        self.ip()?;
        self.install_key()
    }

    fn ip(&self) -> Result<String> {
        let vmx = self.vmx_path().to_string_lossy().to_string();
        let output = self.vmrun(&["getGuestIPAddress", &vmx, "-wait"])?;
        first_ipv4(&output).ok_or_else(|| {
            Error::Command(format!("no IP reported for {}", self.opts.machine_name))
        })
    }

    fn state(&self) -> Result<PowerState> {
        let vmx = self.vmx_path();
        if !vmx.exists() {
            return Ok(PowerState::None);
        }
        let running = self.vmrun(&["list"])?;
        let vmx = vmx.to_string_lossy();
        if running.lines().any(|l| l.trim() == vmx) {
            Ok(PowerState::Running)
        } else {
            Ok(PowerState::Stopped)
        }
    }

    fn start(&self) -> Result<()> {
        let vmx = self.vmx_path().to_string_lossy().to_string();
        self.vmrun(&["start", &vmx, "nogui"])?;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let vmx = self.vmx_path().to_string_lossy().to_string();
        self.vmrun(&["stop", &vmx, "soft"])?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        let vmx = self.vmx_path().to_string_lossy().to_string();
        if self.state()? == PowerState::Running {
            self.vmrun(&["stop", &vmx, "hard"])?;
        }
        self.vmrun(&["deleteVM", &vmx])?;
        Ok(())
    }

    fn ssh_credentials(&self) -> SshCredentials {
        self.opts.ssh.clone()
    }
}
