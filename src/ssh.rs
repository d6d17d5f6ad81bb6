//! SSH channel to the VM and the file transfer primitive built on it

use crate::assets::CopyableFile;
use crate::driver::SshCredentials;
use crate::{Error, Result, ResultExt};
use std::io::Write;
use std::process::{Command, Stdio};

#[cfg(test)]
use mockall::automock;

/// An authenticated command channel into the VM
#[cfg_attr(test, automock)]
pub trait CommandChannel {
    fn run(&self, command: &str) -> Result<String>;

    /// Run `command` with `input` fed to its stdin
    fn run_with_input(&self, command: &str, input: &[u8]) -> Result<String>;
}

/// Channel backed by the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshClient {
    host: String,
    creds: SshCredentials,
}

impl SshClient {
    pub fn new(host: impl Into<String>, creds: SshCredentials) -> Self {
        Self {
            host: host.into(),
            creds,
        }
    }

    /// Client for `host` that refuses to start without the private key on disk
    pub fn connect(host: impl Into<String>, creds: SshCredentials) -> Result<Self> {
        if !creds.key_path.exists() {
            return Err(Error::Config(format!(
                "ssh key {} does not exist",
                creds.key_path.display()
            )));
        }
        Ok(Self::new(host, creds))
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args([
            "-F",
            "/dev/null",
            "-o",
            "BatchMode=yes",
            "-o",
            "PasswordAuthentication=no",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=quiet",
            "-o",
            "ConnectTimeout=10",
            "-o",
            "IdentitiesOnly=yes",
            "-i",
        ])
        .arg(&self.creds.key_path)
        .args(["-p", &self.creds.port.to_string()])
        .arg(format!("{}@{}", self.creds.user, self.host))
        .arg(remote);
        cmd
    }

    fn finish(remote: &str, output: std::process::Output) -> Result<String> {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            return Err(Error::Command(format!(
                "ssh command `{}` exited with {:?}: {}",
                remote,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(stdout)
    }
}

impl CommandChannel for SshClient {
    fn run(&self, command: &str) -> Result<String> {
        tracing::debug!(host = %self.host, command, "Running ssh command");
        let output = self.command(command).stdin(Stdio::null()).output()?;
        Self::finish(command, output)
    }

    fn run_with_input(&self, command: &str, input: &[u8]) -> Result<String> {
        tracing::debug!(host = %self.host, command, bytes = input.len(), "Running ssh command with input");
        let mut child = self
            .command(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input)?;
        }
        let output = child.wait_with_output()?;
        Self::finish(command, output)
    }
}

/// Push `data` to `dir/filename` on the VM with `perms`, replacing any existing file.
///
/// Speaks the scp sink protocol: a `C<perms> <len> <name>` header, the payload,
/// then a terminating NUL.
pub fn transfer(
    data: &[u8],
    dir: &str,
    filename: &str,
    perms: &str,
    channel: &dyn CommandChannel,
) -> Result<()> {
    let target = format!("{}/{}", dir.trim_end_matches('/'), filename);
    tracing::debug!(target = %target, perms, bytes = data.len(), "Transferring file");

    channel
        .run(&format!("sudo rm -f {target}"))
        .with_context(|| format!("Error removing existing {target}"))?;

    let mut payload = format!("C{} {} {}\n", perms, data.len(), filename).into_bytes();
    payload.extend_from_slice(data);
    payload.push(0);

    channel
        .run_with_input(&format!("sudo mkdir -p {dir} && sudo scp -t {dir}"), &payload)
        .with_context(|| format!("Error transferring {target}"))?;
    Ok(())
}

pub fn transfer_file(file: &CopyableFile, channel: &dyn CommandChannel) -> Result<()> {
    let data = file.contents()?;
    transfer(
        &data,
        file.target_dir(),
        file.target_name(),
        file.permissions(),
        channel,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    #[test]
    fn test_transfer_writes_scp_header() {
        let mut channel = MockCommandChannel::new();
        channel
            .expect_run()
            .with(eq("sudo rm -f /var/lib/localkube/certs/ca.key"))
            .times(1)
            .returning(|_| Ok(String::new()));
        channel
            .expect_run_with_input()
            .withf(|cmd, input| {
                cmd == "sudo mkdir -p /var/lib/localkube/certs && sudo scp -t /var/lib/localkube/certs"
                    && input == b"C0600 5 ca.key\nhello\0"
            })
            .times(1)
            .returning(|_, _| Ok(String::new()));

        transfer(b"hello", "/var/lib/localkube/certs", "ca.key", "0600", &channel).unwrap();
    }

    #[test]
    fn test_transfer_propagates_with_context() {
        let mut channel = MockCommandChannel::new();
        channel.expect_run().returning(|_| Ok(String::new()));
        channel
            .expect_run_with_input()
            .returning(|_, _| Err(Error::Command("connection reset".into())));

        let err = transfer(b"x", "/tmp/", "f", "0644", &channel).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error transferring /tmp/f: Command failed: connection reset"
        );
    }

    #[test]
    fn test_transfer_file_uses_asset_metadata() {
        let file = CopyableFile::from_bytes(b"kind: Pod".to_vec(), "/etc/kubernetes/addons", "pod.yaml", "0640");
        let mut channel = MockCommandChannel::new();
        channel.expect_run().returning(|_| Ok(String::new()));
        channel
            .expect_run_with_input()
            .withf(|_, input| input.starts_with(b"C0640 9 pod.yaml\n"))
            .times(1)
            .returning(|_, _| Ok(String::new()));

        transfer_file(&file, &channel).unwrap();
    }

    #[test]
    fn test_connect_requires_key() {
        let temp = tempfile::TempDir::new().unwrap();
        let key = temp.path().join("id_rsa");
        let creds = SshCredentials::new("docker", 22, &key);
        assert!(matches!(
            SshClient::connect("192.168.99.100", creds.clone()),
            Err(Error::Config(_))
        ));

        std::fs::write(&key, "key").unwrap();
        assert!(SshClient::connect("192.168.99.100", creds).is_ok());
    }
}
