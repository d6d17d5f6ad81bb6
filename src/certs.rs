//! Local CA and apiserver certificate generation, and their transfer to the VM
//!
//! The CA pair under `<home>` is generated once and reused; the apiserver
//! pair is reissued on every setup so its SANs always carry the current IP.

use crate::constants::{
    perms_for, CERT_FILES, DEFAULT_SERVICE_CLUSTER_IP, DOCKER_CA_CERT, DOCKER_CA_KEY,
    DOCKER_CLIENT_CERT, DOCKER_CLIENT_KEY, DOCKER_SERVER_CERT, DOCKER_SERVER_KEY, REMOTE_CERT_DIR,
};
use crate::driver::Driver;
use crate::ssh::{transfer, CommandChannel};
use crate::{Result, ResultExt};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use std::path::Path;

const CA_COMMON_NAME: &str = "minikubeCA";
const SERVER_COMMON_NAME: &str = "minikube";
const DOCKER_CA_COMMON_NAME: &str = "minikubeDockerCA";
const DOCKER_CLIENT_COMMON_NAME: &str = "minikube-docker-client";

/// DNS names the in-cluster apiserver is reachable under
const SERVER_DNS_NAMES: [&str; 5] = [
    "kubernetes.default.svc.cluster.local",
    "kubernetes.default.svc",
    "kubernetes.default",
    "kubernetes",
    "localhost",
];

/// Generate certificates for the apiserver at `ip`, signed by the CA at
/// `ca_cert`/`ca_key` (created if either file is missing).
pub fn generate_certs(
    ca_cert: &Path,
    ca_key: &Path,
    cert: &Path,
    key: &Path,
    ip: &str,
) -> Result<()> {
    let (issuer, _) = load_or_create_ca(ca_cert, ca_key, CA_COMMON_NAME)?;

    let mut sans = vec![ip.to_string(), DEFAULT_SERVICE_CLUSTER_IP.to_string()];
    sans.extend(SERVER_DNS_NAMES.iter().map(|s| s.to_string()));

    issue(&issuer, SERVER_COMMON_NAME, sans, Usage::ServerAndClient, cert, key)?;
    tracing::info!(ip, cert = %cert.display(), "Generated apiserver certificate");
    Ok(())
}

/// TLS material for the docker daemon at `ip`.
///
/// The CA and client pair under `certs_dir` are what `DOCKER_CERT_PATH` points
/// at; the client pair is only reissued when missing or when the CA is new.
/// The server pair under `machine_dir` is reissued every time.
pub fn generate_docker_certs(certs_dir: &Path, machine_dir: &Path, ip: &str) -> Result<()> {
    let (issuer, ca_created) = load_or_create_ca(
        &certs_dir.join(DOCKER_CA_CERT),
        &certs_dir.join(DOCKER_CA_KEY),
        DOCKER_CA_COMMON_NAME,
    )?;

    let client_cert = certs_dir.join(DOCKER_CLIENT_CERT);
    let client_key = certs_dir.join(DOCKER_CLIENT_KEY);
    if ca_created || !client_cert.is_file() || !client_key.is_file() {
        issue(&issuer, DOCKER_CLIENT_COMMON_NAME, Vec::new(), Usage::Client, &client_cert, &client_key)?;
    }

    issue(
        &issuer,
        SERVER_COMMON_NAME,
        vec![ip.to_string(), "localhost".to_string()],
        Usage::Server,
        &machine_dir.join(DOCKER_SERVER_CERT),
        &machine_dir.join(DOCKER_SERVER_KEY),
    )?;
    tracing::info!(ip, "Generated docker certificates");
    Ok(())
}

enum Usage {
    Server,
    Client,
    ServerAndClient,
}

/// Sign a fresh leaf pair with `issuer` and write it to `cert`/`key`
fn issue(
    issuer: &Issuer<'static, KeyPair>,
    common_name: &str,
    sans: Vec<String>,
    usage: Usage,
    cert: &Path,
    key: &Path,
) -> Result<()> {
    let mut params = CertificateParams::new(sans)?;
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = match usage {
        Usage::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
        Usage::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
        Usage::ServerAndClient => vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ],
    };

    let key_pair = KeyPair::generate()?;
    let signed = params.signed_by(&key_pair, issuer)?;

    write_public(cert, &signed.pem())?;
    write_private(key, &key_pair.serialize_pem())?;
    Ok(())
}

/// The CA at `cert_path`/`key_path`, and whether it had to be created
fn load_or_create_ca(
    cert_path: &Path,
    key_path: &Path,
    common_name: &str,
) -> Result<(Issuer<'static, KeyPair>, bool)> {
    if cert_path.is_file() && key_path.is_file() {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        let key = KeyPair::from_pem(&key_pem)?;
        tracing::debug!(cert = %cert_path.display(), "Reusing existing CA");
        return Ok((Issuer::from_ca_cert_pem(&cert_pem, key)?, false));
    }

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];

    let key = KeyPair::generate()?;
    let cert = params.self_signed(&key)?;
    write_public(cert_path, &cert.pem())?;
    write_private(key_path, &key.serialize_pem())?;
    tracing::info!(cert = %cert_path.display(), "Generated new CA");

    Ok((Issuer::new(params, key), true))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn
}

fn write_public(path: &Path, pem: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pem)?;
    Ok(())
}

fn write_private(path: &Path, pem: &str) -> Result<()> {
    write_public(path, pem)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Transfer the four credential files from `home` to the VM
pub fn push_certs(home: &Path, channel: &dyn CommandChannel) -> Result<()> {
    for name in CERT_FILES {
        let path = home.join(name);
        let data = std::fs::read(&path)
            .with_context(|| format!("Error reading file: {}", path.display()))?;
        transfer(&data, REMOTE_CERT_DIR, name, perms_for(name), channel)
            .with_context(|| format!("Error transferring {name}"))?;
    }
    Ok(())
}

/// Generate credentials for the VM's current IP and install them on it
pub fn setup_certs(driver: &dyn Driver, home: &Path) -> Result<()> {
    let ip = driver.ip().context("Error getting ip from driver")?;
    tracing::info!(ip = %ip, "Setting up certificates");

    generate_certs(
        &home.join("ca.crt"),
        &home.join("ca.key"),
        &home.join("apiserver.crt"),
        &home.join("apiserver.key"),
        &ip,
    )
    .context("Error generating certs")?;

    let channel = driver.channel().context("Error creating new ssh client")?;
    push_certs(home, channel.as_ref())
}
