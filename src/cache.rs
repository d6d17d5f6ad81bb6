//! Download cache for boot images and control-plane binaries

use crate::{Error, Result, ResultExt};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Files fetched once and kept under `<home>/cache`
pub struct AssetCache {
    root: PathBuf,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn in_home(home: &Path) -> Self {
        Self::new(home.join("cache"))
    }

    /// Local path of a boot ISO
    pub fn cache_iso(&self, url: &str) -> Result<PathBuf> {
        self.cache("iso", url)
            .with_context(|| format!("Error caching ISO from {url}"))
    }

    /// Local path of a localkube binary
    pub fn cache_localkube(&self, url: &str) -> Result<PathBuf> {
        self.cache("localkube", url)
            .with_context(|| format!("Error caching localkube from {url}"))
    }

    /// Resolve `url` to a local file, downloading into `subdir` on first use.
    ///
    /// `file://` URLs are returned as-is without copying.
    pub fn cache(&self, subdir: &str, url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url)?;
        match parsed.scheme() {
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| Error::Config(format!("{url} is not a local file path")))?;
                if !path.is_file() {
                    return Err(Error::Config(format!("{} does not exist", path.display())));
                }
                Ok(path)
            }
            "http" | "https" => {
                let target = self.cached_path(subdir, &parsed)?;
                if target.is_file() {
                    tracing::debug!(url, path = %target.display(), "Using cached asset");
                    return Ok(target);
                }
                download(url, &target)?;
                Ok(target)
            }
            other => Err(Error::Config(format!("unsupported URL scheme {other} in {url}"))),
        }
    }

    /// Where `url` lands in the cache: `<root>/<subdir>/<basename>`, versioned
    /// release URLs keep their version directory to avoid collisions.
    pub fn cached_path(&self, subdir: &str, url: &Url) -> Result<PathBuf> {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let basename = segments
            .last()
            .ok_or_else(|| Error::Config(format!("{url} has no file name")))?;

        let mut dir = self.root.join(subdir);
        if segments.len() >= 2 {
            let parent = segments[segments.len() - 2];
            if parent.starts_with('v') && parent[1..].starts_with(|c: char| c.is_ascii_digit()) {
                dir = dir.join(parent);
            }
        }
        Ok(dir.join(basename))
    }
}

fn download(url: &str, target: &Path) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| Error::Config(format!("{} has no parent", target.display())))?;
    std::fs::create_dir_all(dir)?;

    tracing::info!(url, path = %target.display(), "Downloading");
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()?;
    let mut response = client.get(url).send()?.error_for_status()?;

    let tmp = dir.join(format!(".download-{}", uuid::Uuid::new_v4()));
    let result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        response.copy_to(&mut file)?;
        file.flush()?;
        std::fs::rename(&tmp, target)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}
