//! Files pushed to the VM: add-on bundles and user-supplied manifests

use crate::config::Settings;
use crate::constants::{perms_for, REMOTE_ADDONS_DIR};
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Static pods the kubelet picks up directly
const REMOTE_MANIFESTS_DIR: &str = "/etc/kubernetes/manifests";

#[derive(Debug, Clone)]
enum Source {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// A file destined for the VM with its target location and permission string
#[derive(Debug, Clone)]
pub struct CopyableFile {
    source: Source,
    target_dir: String,
    target_name: String,
    permissions: String,
}

impl CopyableFile {
    pub fn from_bytes(
        data: impl Into<Vec<u8>>,
        target_dir: impl Into<String>,
        target_name: impl Into<String>,
        permissions: impl Into<String>,
    ) -> Self {
        Self {
            source: Source::Bytes(data.into()),
            target_dir: target_dir.into(),
            target_name: target_name.into(),
            permissions: permissions.into(),
        }
    }

    pub fn from_path(
        path: impl Into<PathBuf>,
        target_dir: impl Into<String>,
        target_name: impl Into<String>,
        permissions: impl Into<String>,
    ) -> Self {
        Self {
            source: Source::Path(path.into()),
            target_dir: target_dir.into(),
            target_name: target_name.into(),
            permissions: permissions.into(),
        }
    }

    pub fn target_dir(&self) -> &str {
        &self.target_dir
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn target_path(&self) -> String {
        format!("{}/{}", self.target_dir.trim_end_matches('/'), self.target_name)
    }

    pub fn permissions(&self) -> &str {
        &self.permissions
    }

    pub fn contents(&self) -> Result<Vec<u8>> {
        match &self.source {
            Source::Bytes(data) => Ok(data.clone()),
            Source::Path(path) => std::fs::read(path).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("reading {}: {}", path.display(), e),
                ))
            }),
        }
    }
}

/// A named group of manifests switched on and off together
#[derive(Debug, Clone)]
pub struct Addon {
    pub name: &'static str,
    pub default_enabled: bool,
    pub assets: Vec<CopyableFile>,
}

impl Addon {
    fn new(name: &'static str, default_enabled: bool, assets: Vec<CopyableFile>) -> Self {
        Self {
            name,
            default_enabled,
            assets,
        }
    }

    /// The user's setting for this add-on, else its default
    pub fn is_enabled(&self, settings: &Settings) -> Result<bool> {
        Ok(settings
            .get_bool(self.name)?
            .unwrap_or(self.default_enabled))
    }
}

fn manifest(data: &'static str, dir: &str, name: &str) -> CopyableFile {
    CopyableFile::from_bytes(data.as_bytes(), dir, name, perms_for(name))
}

macro_rules! addon_manifest {
    ($file:literal) => {
        manifest(
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/deploy/addons/", $file)),
            REMOTE_ADDONS_DIR,
            $file,
        )
    };
}

/// Built-in add-on bundles, in transfer order
pub fn builtin_addons() -> Vec<Addon> {
    vec![
        Addon::new(
            "addon-manager",
            true,
            vec![manifest(
                include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/deploy/addons/addon-manager.yaml")),
                REMOTE_MANIFESTS_DIR,
                "addon-manager.yaml",
            )],
        ),
        Addon::new(
            "dashboard",
            true,
            vec![addon_manifest!("dashboard-rc.yaml"), addon_manifest!("dashboard-svc.yaml")],
        ),
        Addon::new(
            "kube-dns",
            true,
            vec![addon_manifest!("kube-dns-rc.yaml"), addon_manifest!("kube-dns-svc.yaml")],
        ),
        Addon::new(
            "heapster",
            false,
            vec![
                addon_manifest!("influx-grafana-rc.yaml"),
                addon_manifest!("heapster-rc.yaml"),
                addon_manifest!("heapster-svc.yaml"),
            ],
        ),
        Addon::new(
            "ingress",
            false,
            vec![addon_manifest!("ingress-rc.yaml"), addon_manifest!("ingress-svc.yaml")],
        ),
        Addon::new("registry-creds", false, vec![addon_manifest!("registry-creds-rc.yaml")]),
    ]
}

pub fn find_addon(name: &str) -> Option<Addon> {
    builtin_addons().into_iter().find(|a| a.name == name)
}

/// Every file under `<home>/addons`, flattened into the remote add-ons directory
pub fn user_addon_files(home: &Path) -> Result<Vec<CopyableFile>> {
    let root = home.join("addons");
    let mut files = Vec::new();
    if root.is_dir() {
        collect_files(&root, &mut files)?;
    }
    files.sort_by(|a, b| a.target_name.cmp(&b.target_name));
    Ok(files)
}

fn collect_files(dir: &Path, out: &mut Vec<CopyableFile>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) {
            let perms = perms_for(&name);
            out.push(CopyableFile::from_path(path, REMOTE_ADDONS_DIR, name, perms));
        }
    }
    Ok(())
}

/// Files of every enabled bundle followed by the user's own files
pub fn enabled_addon_files(settings: &Settings, home: &Path) -> Result<Vec<CopyableFile>> {
    let mut files = Vec::new();
    for addon in builtin_addons() {
        if addon.is_enabled(settings)? {
            tracing::debug!(addon = addon.name, "Add-on enabled");
            files.extend(addon.assets);
        }
    }
    files.extend(user_addon_files(home)?);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings(temp: &TempDir) -> Settings {
        Settings::load(Settings::default_path(temp.path())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = settings(&temp);
        let enabled: Vec<&str> = builtin_addons()
            .iter()
            .filter(|a| a.is_enabled(&settings).unwrap())
            .map(|a| a.name)
            .collect();
        assert_eq!(enabled, vec!["addon-manager", "dashboard", "kube-dns"]);
    }

    #[test]
    fn test_setting_overrides_default() {
        let temp = TempDir::new().unwrap();
        let mut settings = settings(&temp);
        settings.set("dashboard", serde_json::json!(false));
        settings.set("heapster", serde_json::json!(true));

        assert!(!find_addon("dashboard").unwrap().is_enabled(&settings).unwrap());
        assert!(find_addon("heapster").unwrap().is_enabled(&settings).unwrap());
    }

    #[test]
    fn test_bad_setting_is_an_error() {
        let temp = TempDir::new().unwrap();
        let mut settings = settings(&temp);
        settings.set("ingress", serde_json::json!(3));
        assert!(enabled_addon_files(&settings, temp.path()).is_err());
    }

    #[test]
    fn test_user_files_follow_bundles() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("addons").join("extra");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("pod.yaml"), "kind: Pod").unwrap();

        let files = enabled_addon_files(&settings(&temp), temp.path()).unwrap();
        let last = files.last().unwrap();
        assert_eq!(last.target_path(), "/etc/kubernetes/addons/pod.yaml");
        assert_eq!(last.contents().unwrap(), b"kind: Pod");
        assert_eq!(files[0].target_path(), "/etc/kubernetes/manifests/addon-manager.yaml");
    }

    #[test]
    fn test_user_file_permissions() {
        let temp = TempDir::new().unwrap();
        let addons = temp.path().join("addons");
        std::fs::create_dir_all(&addons).unwrap();
        std::fs::write(addons.join("registry.key"), "secret").unwrap();
        std::fs::write(addons.join("registry.yaml"), "kind: Pod").unwrap();

        let files = user_addon_files(temp.path()).unwrap();
        let perms: Vec<(&str, &str)> = files
            .iter()
            .map(|f| (f.target_name(), f.permissions()))
            .collect();
        assert_eq!(perms, vec![("registry.key", "0600"), ("registry.yaml", "0644")]);
        assert!(builtin_addons()
            .iter()
            .flat_map(|a| &a.assets)
            .all(|f| f.permissions() == "0644"));
    }

    #[test]
    fn test_missing_source_file() {
        let file = CopyableFile::from_path("/nonexistent/pod.yaml", "/tmp", "pod.yaml", "0644");
        assert!(file.contents().is_err());
    }
}
