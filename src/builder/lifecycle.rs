//! Lifecycle release tarballs
//!
//! A release is a `.tgz` holding `lifecycle.toml` and a `lifecycle/`
//! directory of phase binaries. Inside a builder the binaries live in
//! `/cnb/lifecycle`.

use crate::archive::{self, LayerWriter};
use crate::builder::metadata::{LegacyApi, LifecycleApis, LifecycleMetadata};
use crate::error::{PackError, PackResult};
use crate::image::{BlobInfo, BlobStore};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tar::EntryType;
use tracing::debug;

pub const DEFAULT_LIFECYCLE_VERSION: &str = "0.20.5";

/// Directory holding the phase binaries inside a builder
pub const LIFECYCLE_DIR: &str = "/cnb/lifecycle";

const REQUIRED_BINARIES: &[&str] = &["detector", "analyzer", "restorer", "builder", "exporter", "launcher"];

/// Release download URL for `version` on `arch`
pub fn download_url(version: &str, arch: &str) -> String {
    let suffix = match arch {
        "arm64" | "aarch64" => "linux.arm64",
        _ => "linux.x86-64",
    };
    format!(
        "https://github.com/buildpacks/lifecycle/releases/download/v{v}/lifecycle-v{v}+{suffix}.tgz",
        v = version,
        suffix = suffix
    )
}

/// Lifecycle image used for untrusted builds
pub fn lifecycle_image(version: &str) -> String {
    format!("docker.io/buildpacksio/lifecycle:{}", version)
}

#[derive(Debug, Default, Deserialize)]
struct LifecycleToml {
    #[serde(default)]
    lifecycle: VersionTable,
    #[serde(default)]
    api: Option<LegacyApi>,
    #[serde(default)]
    apis: LifecycleApis,
}

#[derive(Debug, Default, Deserialize)]
struct VersionTable {
    #[serde(default)]
    version: String,
}

/// A validated lifecycle release on disk
#[derive(Debug, Clone)]
pub struct LifecycleArchive {
    path: PathBuf,
    metadata: LifecycleMetadata,
}

impl LifecycleArchive {
    /// Open and validate a release tarball
    pub fn open(path: &Path) -> PackResult<Self> {
        let invalid = |reason: String| PackError::DescriptorInvalid {
            path: path.display().to_string(),
            reason,
        };

        let raw = archive::read_entry(archive::open_tar(path)?, "lifecycle.toml")?
            .ok_or_else(|| invalid("archive has no lifecycle.toml".to_string()))?;
        let raw = String::from_utf8(raw).map_err(|e| invalid(e.to_string()))?;
        let descriptor: LifecycleToml = toml::from_str(&raw).map_err(|e| invalid(e.to_string()))?;

        let metadata = LifecycleMetadata {
            version: descriptor.lifecycle.version,
            api: descriptor.api,
            apis: descriptor.apis,
        };
        if metadata.platform_apis().is_empty() {
            return Err(invalid("lifecycle.toml declares no platform APIs".to_string()));
        }

        let binaries: BTreeSet<String> = archive::list_entries(archive::open_tar(path)?)?
            .into_iter()
            .filter_map(|entry| binary_name(&entry).map(str::to_string))
            .collect();
        let missing: Vec<&str> = REQUIRED_BINARIES
            .iter()
            .copied()
            .filter(|b| !binaries.contains(*b))
            .collect();
        if !missing.is_empty() {
            return Err(invalid(format!("missing binaries: {}", missing.join(", "))));
        }

        debug!("Lifecycle {} at {}", metadata.version, path.display());
        Ok(Self {
            path: path.to_path_buf(),
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &LifecycleMetadata {
        &self.metadata
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Write the `/cnb/lifecycle` layer into the store
    pub fn write_layer(&self, store: &BlobStore) -> PackResult<BlobInfo> {
        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        writer.add_dir(LIFECYCLE_DIR)?;

        let mut tar = tar::Archive::new(archive::open_tar(&self.path)?);
        let entries = tar
            .entries()
            .map_err(|e| PackError::io(format!("reading {}", self.path.display()), e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| PackError::io("reading lifecycle entry", e))?;
            let name = entry
                .path()
                .map_err(|e| PackError::io("reading lifecycle entry path", e))?
                .to_string_lossy()
                .into_owned();
            let Some(binary) = binary_name(&archive::normalize_path(&name)).map(str::to_string) else {
                continue;
            };
            let target = format!("{}/{}", LIFECYCLE_DIR, binary);

            match entry.header().entry_type() {
                EntryType::Symlink => {
                    let link = entry
                        .link_name()
                        .map_err(|e| PackError::io("reading lifecycle symlink", e))?
                        .map(|l| l.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    writer.add_symlink(&target, &link)?;
                }
                EntryType::Regular => {
                    let mode = entry.header().mode().unwrap_or(0o755);
                    let size = entry.size();
                    writer.add_reader(&target, size, mode, &mut entry)?;
                }
                _ => {}
            }
        }

        let bytes = writer.finish()?;
        store.insert_reader(bytes.as_slice())
    }
}

/// `lifecycle/<name>` -> `name`
fn binary_name(entry: &str) -> Option<&str> {
    let entry = entry.trim_start_matches("./");
    let (dir, name) = entry.split_once('/')?;
    if dir.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;

    /// Build a fake lifecycle release with every required binary
    pub(crate) fn fake_lifecycle(dir: &Path, version: &str, platform_apis: &[&str]) -> PathBuf {
        let path = dir.join(format!("lifecycle-v{}.tgz", version));
        let file = File::create(&path).unwrap();
        let mut writer = LayerWriter::new(GzEncoder::new(file, Compression::default()), 0, 0);
        let apis = platform_apis
            .iter()
            .map(|a| format!("\"{}\"", a))
            .collect::<Vec<_>>()
            .join(", ");
        let descriptor = format!(
            "[apis.buildpack]\ndeprecated = []\nsupported = [\"0.10\"]\n[apis.platform]\ndeprecated = []\nsupported = [{}]\n[lifecycle]\nversion = \"{}\"\n",
            apis, version
        );
        writer.add_file("lifecycle.toml", descriptor.as_bytes(), 0o644).unwrap();
        for binary in REQUIRED_BINARIES.iter().chain(&["creator"]) {
            writer
                .add_file(&format!("lifecycle/{}", binary), b"#!/bin/sh\n", 0o755)
                .unwrap();
        }
        writer.finish().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn opens_release_and_writes_layer() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = fake_lifecycle(temp.path(), "0.20.5", &["0.12", "0.13"]);
        let lifecycle = LifecycleArchive::open(&path).unwrap();
        assert_eq!(lifecycle.version(), "0.20.5");
        assert_eq!(lifecycle.metadata().platform_apis(), vec!["0.12", "0.13"]);

        let store = BlobStore::open(temp.path().join("store")).unwrap();
        let info = lifecycle.write_layer(&store).unwrap();
        let entries = archive::list_entries(store.open_layer(&info.diff_id).unwrap()).unwrap();
        assert!(entries.contains(&"cnb/lifecycle/creator".to_string()));
        assert!(entries.contains(&"cnb/lifecycle/detector".to_string()));
        assert!(!entries.iter().any(|e| e.ends_with("lifecycle.toml")));

        assert_eq!(lifecycle.write_layer(&store).unwrap(), info);
    }

    #[test]
    fn missing_binaries_are_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("broken.tar");
        archive::write_single_file_tar(
            "/lifecycle.toml",
            b"[apis.platform]\nsupported = [\"0.12\"]\n[lifecycle]\nversion = \"0.1.0\"\n",
            0,
            0,
            &path,
        )
        .unwrap();
        assert!(matches!(
            LifecycleArchive::open(&path),
            Err(PackError::DescriptorInvalid { reason, .. }) if reason.contains("detector")
        ));
    }

    #[test]
    fn download_urls() {
        assert_eq!(
            download_url("0.20.5", "amd64"),
            "https://github.com/buildpacks/lifecycle/releases/download/v0.20.5/lifecycle-v0.20.5+linux.x86-64.tgz"
        );
        assert!(download_url("0.20.5", "arm64").ends_with("+linux.arm64.tgz"));
        assert_eq!(binary_name("lifecycle/detector"), Some("detector"));
        assert_eq!(binary_name("lifecycle.toml"), None);
        assert_eq!(binary_name("lifecycle/nested/x"), None);
    }
}
