//! Fixed names, paths and defaults shared across the crate

use std::path::PathBuf;

/// The one machine managed per installation
pub const MACHINE_NAME: &str = "minikube";

/// Control-plane version bundled with this build
pub const DEFAULT_KUBERNETES_VERSION: &str = "v1.5.1";

pub const DEFAULT_ISO_URL: &str =
    "https://storage.googleapis.com/minikube/iso/minikube-v1.0.1.iso";

/// Release bucket for versioned localkube binaries
pub const LOCALKUBE_RELEASE_URL: &str = "https://storage.googleapis.com/minikube/k8sReleases";

pub const DEFAULT_VM_DRIVER: &str = "virtualbox";
pub const DEFAULT_MEMORY_MB: u64 = 2048;
pub const DEFAULT_CPUS: u32 = 2;
pub const DEFAULT_DISK_SIZE_MB: u64 = 20000;
pub const DEFAULT_HOST_ONLY_CIDR: &str = "192.168.99.1/24";
pub const DEFAULT_DNS_DOMAIN: &str = "cluster.local";

/// First address of the default service CIDR, always a SAN on the apiserver cert
pub const DEFAULT_SERVICE_CLUSTER_IP: &str = "10.0.0.1";

pub const API_SERVER_PORT: u16 = 8443;
pub const DOCKER_DAEMON_PORT: u16 = 2376;

/// Remote credential directory
pub const REMOTE_CERT_DIR: &str = "/var/lib/localkube/certs";
pub const REMOTE_ADDONS_DIR: &str = "/etc/kubernetes/addons";
pub const REMOTE_LOCALKUBE_DIR: &str = "/usr/local/bin";
pub const LOCALKUBE_BINARY: &str = "localkube";

pub const LOCALKUBE_PIDFILE: &str = "/var/run/localkube.pid";
pub const LOCALKUBE_STDOUT: &str = "/var/log/localkube.out";
pub const LOCALKUBE_STDERR: &str = "/var/log/localkube.err";

/// Certificate bundle, in transfer order
pub const CERT_FILES: [&str; 4] = ["ca.crt", "ca.key", "apiserver.crt", "apiserver.key"];

/// Suffix that marks a private key
pub const PRIVATE_KEY_SUFFIX: &str = ".key";
pub const PRIVATE_KEY_PERMS: &str = "0600";
pub const PUBLIC_FILE_PERMS: &str = "0644";

/// Docker TLS material. CA and client pair live in `<home>/certs`, the
/// server pair in the machine directory.
pub const DOCKER_CA_CERT: &str = "ca.pem";
pub const DOCKER_CA_KEY: &str = "ca-key.pem";
pub const DOCKER_CLIENT_CERT: &str = "cert.pem";
pub const DOCKER_CLIENT_KEY: &str = "key.pem";
pub const DOCKER_SERVER_CERT: &str = "server.pem";
pub const DOCKER_SERVER_KEY: &str = "server.key";

pub const REMOTE_DOCKER_DIR: &str = "/etc/docker";
/// Daemon options read by the guest's docker init script
pub const REMOTE_DOCKER_PROFILE_DIR: &str = "/var/lib/boot2docker";
pub const DOCKER_PROFILE: &str = "profile";

/// Status token reported when no machine is known
pub const DOES_NOT_EXIST: &str = "Does Not Exist";

/// Root of all local state: `$MINIKUBE_HOME`, else `$HOME/.minikube`
pub fn minipath() -> PathBuf {
    if let Some(home) = std::env::var_os("MINIKUBE_HOME") {
        return PathBuf::from(home);
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".minikube")
}

/// Permission string for a file about to be pushed to the VM
pub fn perms_for(filename: &str) -> &'static str {
    if filename.ends_with(PRIVATE_KEY_SUFFIX) {
        PRIVATE_KEY_PERMS
    } else {
        PUBLIC_FILE_PERMS
    }
}
