//! Hyper-V backend driven through PowerShell cmdlets

use super::{
    authorized_key, ensure_ssh_key, run_tool, userdata_image, Driver, DriverKind, DriverOptions,
    SshCredentials,
};
use crate::models::PowerState;
use crate::{Error, Result};
use serde::Deserialize;
use std::io::Write;

/// Fixed seed disk the userdata archive is written into before conversion
const SEED_DISK_MB: u64 = 10;

/// VM information as returned by `Get-VM | ConvertTo-Json`
#[derive(Debug, Clone, Deserialize)]
struct HyperVInfo {
    #[serde(rename = "State")]
    state: i32,
}

pub struct HyperVDriver {
    opts: DriverOptions,
    /// External switch the VM's adapter is connected to
    switch_name: String,
}

impl HyperVDriver {
    pub fn new(opts: DriverOptions) -> Self {
        Self {
            opts,
            switch_name: "Default Switch".to_string(),
        }
    }

    fn name(&self) -> String {
        escape_ps(&self.opts.machine_name)
    }

    fn get_vm(&self) -> Result<Option<HyperVInfo>> {
        let output = powershell(&format!(
            "Get-VM -Name '{}' -ErrorAction SilentlyContinue | Select-Object Name, State | ConvertTo-Json -Compress",
            self.name()
        ))?;

        if output.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(output.trim())?))
    }
}

impl Driver for HyperVDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::HyperV
    }

    fn create(&self) -> Result<()> {
        ensure_ssh_key(&self.opts)?;
        tracing::info!(machine = %self.opts.machine_name, "Creating Hyper-V VM");

        // A fixed VHD stores its data raw from offset 0, so the archive can be written in place
        let seed = self.opts.disk_path("vhd");
        powershell(&format!(
            "New-VHD -Path '{}' -SizeBytes {SEED_DISK_MB}MB -Fixed",
            escape_ps(&seed.to_string_lossy())
        ))?;
        let image = userdata_image(&authorized_key(&self.opts)?)?;
        std::fs::OpenOptions::new()
            .write(true)
            .open(&seed)?
            .write_all(&image)?;

        let disk = self.opts.disk_path("vhdx");
        let script = format!(
            r#"
            Convert-VHD -Path '{seed}' -DestinationPath '{disk}' -VHDType Dynamic -DeleteSource
            Resize-VHD -Path '{disk}' -SizeBytes {disk_mb}MB
            New-VM -Name '{name}' -MemoryStartupBytes {memory}MB -Generation 1 -SwitchName '{switch}' -Path '{dir}'
            Set-VMProcessor -VMName '{name}' -Count {cpus}
            Set-VMDvdDrive -VMName '{name}' -Path '{iso}'
            Add-VMHardDiskDrive -VMName '{name}' -Path '{disk}'
            Set-VM -Name '{name}' -AutomaticStartAction Nothing -AutomaticStopAction ShutDown
            Start-VM -Name '{name}'
            "#,
            seed = escape_ps(&seed.to_string_lossy()),
            disk = escape_ps(&disk.to_string_lossy()),
            disk_mb = self.opts.disk_size_mb,
            name = self.name(),
            memory = self.opts.memory_mb,
            switch = escape_ps(&self.switch_name),
            dir = escape_ps(&self.opts.machine_dir.to_string_lossy()),
            cpus = self.opts.cpus,
            iso = escape_ps(&self.opts.iso_path.to_string_lossy()),
        );
        powershell(&script)?;
        Ok(())
    }

    fn ip(&self) -> Result<String> {
        let output = powershell(&format!(
            r#"(Get-VMNetworkAdapter -VMName '{}').IPAddresses | Where-Object {{ $_ -match '^\d+\.\d+\.\d+\.\d+$' }} | Select-Object -First 1"#,
            self.name()
        ))?;

        let ip = output.trim();
        if ip.is_empty() {
            Err(Error::Command(format!("no IP reported for {}", self.opts.machine_name)))
        } else {
            Ok(ip.to_string())
        }
    }

    fn state(&self) -> Result<PowerState> {
        Ok(self
            .get_vm()?
            .map(|info| PowerState::from_hyperv_state(info.state))
            .unwrap_or(PowerState::None))
    }

    fn start(&self) -> Result<()> {
        powershell(&format!("Start-VM -Name '{}'", self.name()))?;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        powershell(&format!("Stop-VM -Name '{}'", self.name()))?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if self.state()? == PowerState::Running {
            powershell(&format!("Stop-VM -Name '{}' -TurnOff -Force", self.name()))?;
        }
        powershell(&format!("Remove-VM -Name '{}' -Force", self.name()))?;
        let disk = self.opts.disk_path("vhdx");
        if disk.exists() {
            std::fs::remove_file(disk)?;
        }
        Ok(())
    }

    fn ssh_credentials(&self) -> SshCredentials {
        self.opts.ssh.clone()
    }
}

fn powershell(script: &str) -> Result<String> {
    run_tool(
        "powershell",
        &["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command", script],
    )
}

/// Escape string for PowerShell
fn escape_ps(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_ps() {
        assert_eq!(escape_ps("minikube"), "minikube");
        assert_eq!(escape_ps("mini'kube"), "mini''kube");
    }

    #[test]
    fn test_hyperv_info_parse() {
        let info: HyperVInfo = serde_json::from_str(r#"{"Name":"minikube","State":2}"#).unwrap();
        assert_eq!(PowerState::from_hyperv_state(info.state), PowerState::Running);
    }
}
