//! Image index model and the local index store
//!
//! Indexes are kept under `$PACK_HOME/manifests/<escaped name>/index.json`
//! until pushed. The escaped name replaces `/` and `:` so every reference
//! maps to one flat directory.

use crate::error::{PackError, PackResult};
use crate::image::remote::{DOCKER_LIST_MEDIA_TYPE, INDEX_MEDIA_TYPE};
use crate::image::ImageRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const INDEX_FILE: &str = "index.json";

/// Media type family of the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexFormat {
    #[default]
    Oci,
    Docker,
}

impl IndexFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            Self::Oci => INDEX_MEDIA_TYPE,
            Self::Docker => DOCKER_LIST_MEDIA_TYPE,
        }
    }
}

impl std::str::FromStr for IndexFormat {
    type Err = PackError;

    fn from_str(s: &str) -> PackResult<Self> {
        match s {
            "oci" => Ok(Self::Oci),
            "v2s2" | "docker" => Ok(Self::Docker),
            other => Err(PackError::invalid(format!(
                "unsupported index format '{}'; use oci or v2s2",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// One child manifest of an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    pub media_type: String,
    #[serde(default)]
    pub manifests: Vec<IndexEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ImageIndex {
    pub fn new(format: IndexFormat) -> Self {
        Self {
            schema_version: 2,
            media_type: format.media_type().to_string(),
            manifests: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Add `entry`, replacing any entry with the same digest
    pub fn upsert(&mut self, entry: IndexEntry) {
        match self.manifests.iter_mut().find(|m| m.digest == entry.digest) {
            Some(existing) => *existing = entry,
            None => self.manifests.push(entry),
        }
    }

    pub fn find_mut(&mut self, digest: &str) -> Option<&mut IndexEntry> {
        self.manifests.iter_mut().find(|m| m.digest == digest)
    }

    /// Drop the entry with `digest`; false when it was not present
    pub fn remove(&mut self, digest: &str) -> bool {
        let before = self.manifests.len();
        self.manifests.retain(|m| m.digest != digest);
        self.manifests.len() != before
    }
}

/// Local, not-yet-pushed indexes
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir(&self, name: &ImageRef) -> PathBuf {
        let escaped: String = name
            .to_string()
            .chars()
            .map(|c| match c {
                '/' | ':' | '@' => '_',
                c => c,
            })
            .collect();
        self.root.join(escaped)
    }

    pub fn path(&self, name: &ImageRef) -> PathBuf {
        self.dir(name).join(INDEX_FILE)
    }

    pub fn exists(&self, name: &ImageRef) -> bool {
        self.path(name).is_file()
    }

    pub fn load(&self, name: &ImageRef) -> PackResult<ImageIndex> {
        let path = self.path(name);
        if !path.is_file() {
            return Err(PackError::ImageNotFound(format!("{} (no local manifest list)", name)));
        }
        let bytes = fs::read(&path).map_err(|e| PackError::io(format!("reading {}", path.display()), e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, name: &ImageRef, index: &ImageIndex) -> PackResult<()> {
        let dir = self.dir(name);
        fs::create_dir_all(&dir).map_err(|e| PackError::io(format!("creating {}", dir.display()), e))?;
        write_atomic(&dir.join(INDEX_FILE), &serde_json::to_vec_pretty(index)?)?;
        debug!("Saved manifest list {} with {} entries", name, index.manifests.len());
        Ok(())
    }

    pub fn delete(&self, name: &ImageRef) -> PackResult<()> {
        let dir = self.dir(name);
        if !dir.exists() {
            return Err(PackError::ImageNotFound(format!("{} (no local manifest list)", name)));
        }
        fs::remove_dir_all(&dir).map_err(|e| PackError::io(format!("removing {}", dir.display()), e))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> PackResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| PackError::io(format!("writing {}", tmp.display()), e))?;
    fs::rename(&tmp, path).map_err(|e| PackError::io(format!("renaming {}", tmp.display()), e))
}
