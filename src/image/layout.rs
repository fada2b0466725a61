//! OCI image layout directories
//!
//! ```text
//! <root>/oci-layout
//! <root>/index.json
//! <root>/blobs/sha256/<hex>
//! ```
//!
//! Also hosts the descriptor / manifest / index JSON models shared with the
//! manifest-list store.

use crate::archive;
use crate::error::{PackError, PackResult};
use crate::image::blob::{sha256_digest, BlobStore};
use crate::image::config::ImageConfig;
use crate::image::remote::{CONFIG_MEDIA_TYPE, INDEX_MEDIA_TYPE, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE};
use crate::image::{Layer, LayerOrigin};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Annotation naming the tag of a manifest inside a layout
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ImageIndex {
    pub fn new() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(INDEX_MEDIA_TYPE.to_string()),
            manifests: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }
}

impl Default for ImageIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn blob_path(root: &Path, digest: &str) -> PathBuf {
    root.join("blobs/sha256")
        .join(digest.strip_prefix("sha256:").unwrap_or(digest))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> PackResult<T> {
    let bytes = fs::read(path).map_err(|e| PackError::io(format!("reading {}", path.display()), e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn write_blob(root: &Path, bytes: &[u8]) -> PackResult<Descriptor> {
    let digest = sha256_digest(bytes);
    let path = blob_path(root, &digest);
    fs::write(&path, bytes).map_err(|e| PackError::io(format!("writing {}", path.display()), e))?;
    Ok(Descriptor {
        media_type: String::new(),
        digest,
        size: bytes.len() as u64,
        platform: None,
        annotations: BTreeMap::new(),
    })
}

/// Open the first image in a layout; `None` when the layout does not exist
pub(crate) fn open(root: &Path) -> PackResult<Option<(ImageConfig, String, Vec<Layer>)>> {
    let index_path = root.join("index.json");
    if !index_path.is_file() {
        return Ok(None);
    }
    let index: ImageIndex = read_json(&index_path)?;
    let Some(entry) = index.manifests.first() else {
        return Ok(None);
    };

    let manifest: ImageManifest = read_json(&blob_path(root, &entry.digest))?;
    let config: ImageConfig = read_json(&blob_path(root, &manifest.config.digest))?;
    if config.rootfs.diff_ids.len() != manifest.layers.len() {
        return Err(PackError::Internal(format!(
            "layout {} lists {} layers but its config has {} diff-ids",
            root.display(),
            manifest.layers.len(),
            config.rootfs.diff_ids.len()
        )));
    }

    let layers = config
        .rootfs
        .diff_ids
        .iter()
        .zip(&manifest.layers)
        .map(|(diff_id, desc)| Layer {
            diff_id: diff_id.clone(),
            digest: Some(desc.digest.clone()),
            size: Some(desc.size),
            origin: LayerOrigin::Layout {
                root: root.to_path_buf(),
            },
        })
        .collect();
    Ok(Some((config, entry.digest.clone(), layers)))
}

/// Copy layout blobs for `layers` into the store, verifying their digests
pub(crate) fn materialize(store: &BlobStore, root: &Path, layers: &[Layer]) -> PackResult<()> {
    for layer in layers {
        if store.contains(&layer.diff_id) {
            continue;
        }
        let digest = layer
            .digest
            .as_deref()
            .ok_or_else(|| PackError::LayerNotFound(layer.diff_id.clone()))?;
        store.insert_compressed(&blob_path(root, digest), Some(digest))?;
    }
    Ok(())
}

/// Write an image into a layout directory; returns the manifest digest
pub(crate) fn save(
    root: &Path,
    store: &BlobStore,
    config_bytes: &[u8],
    layers: &[Layer],
    ref_names: &[String],
) -> PackResult<String> {
    let blobs = root.join("blobs/sha256");
    fs::create_dir_all(&blobs).map_err(|e| PackError::io(format!("creating {}", blobs.display()), e))?;
    fs::write(root.join("oci-layout"), br#"{"imageLayoutVersion":"1.0.0"}"#)
        .map_err(|e| PackError::io(format!("writing {}/oci-layout", root.display()), e))?;

    let mut layer_descriptors = Vec::with_capacity(layers.len());
    for layer in layers {
        let info = store
            .lookup(&layer.diff_id)
            .ok_or_else(|| PackError::LayerNotFound(layer.diff_id.clone()))?;
        let target = blob_path(root, &info.digest);
        if !target.is_file() {
            fs::copy(store.blob_path(&info.digest), &target)
                .map_err(|e| PackError::io(format!("writing {}", target.display()), e))?;
        }
        layer_descriptors.push(Descriptor {
            media_type: LAYER_MEDIA_TYPE.to_string(),
            digest: info.digest,
            size: info.size,
            platform: None,
            annotations: BTreeMap::new(),
        });
    }

    let mut config_desc = write_blob(root, config_bytes)?;
    config_desc.media_type = CONFIG_MEDIA_TYPE.to_string();

    let manifest = ImageManifest {
        schema_version: 2,
        media_type: Some(MANIFEST_MEDIA_TYPE.to_string()),
        config: config_desc,
        layers: layer_descriptors,
        annotations: BTreeMap::new(),
    };
    let mut manifest_desc = write_blob(root, &serde_json::to_vec(&manifest)?)?;
    manifest_desc.media_type = MANIFEST_MEDIA_TYPE.to_string();

    let config: ImageConfig = serde_json::from_slice(config_bytes)?;
    manifest_desc.platform = Some(Platform {
        architecture: config.architecture.clone(),
        os: config.os.clone(),
        variant: config.variant.clone(),
        os_version: config.os_version.clone(),
        features: Vec::new(),
    });

    let mut index = ImageIndex::new();
    if ref_names.is_empty() {
        index.manifests.push(manifest_desc.clone());
    }
    for name in ref_names {
        let mut desc = manifest_desc.clone();
        desc.annotations
            .insert(REF_NAME_ANNOTATION.to_string(), name.clone());
        index.manifests.push(desc);
    }
    let index_path = root.join("index.json");
    fs::write(&index_path, serde_json::to_vec_pretty(&index)?)
        .map_err(|e| PackError::io(format!("writing {}", index_path.display()), e))?;

    Ok(manifest_desc.digest)
}

/// Package a layout directory as a single tar file (`.cnb`)
pub fn write_layout_archive(root: &Path, out: &Path) -> PackResult<()> {
    archive::write_source_tar(root, "/", 0, 0, archive::ModeRule::Source, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::LayerWriter;
    use tempfile::TempDir;

    #[test]
    fn save_then_open() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path().join("store")).unwrap();
        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        writer.add_file("/cnb/buildpacks/x/1/buildpack.toml", b"api = \"0.10\"", 0o644).unwrap();
        let info = store.insert_reader(writer.finish().unwrap().as_slice()).unwrap();

        let mut config = ImageConfig::empty("linux", "arm64");
        config.rootfs.diff_ids.push(info.diff_id.clone());
        let layer = Layer {
            diff_id: info.diff_id.clone(),
            digest: Some(info.digest.clone()),
            size: Some(info.size),
            origin: LayerOrigin::Store,
        };

        let root = dir.path().join("layout");
        let digest = save(
            &root,
            &store,
            &config.to_bytes().unwrap(),
            &[layer],
            &["latest".to_string()],
        )
        .unwrap();

        let index: ImageIndex = read_json(&root.join("index.json")).unwrap();
        assert_eq!(index.manifests[0].digest, digest);
        assert_eq!(
            index.manifests[0].annotations.get(REF_NAME_ANNOTATION).map(String::as_str),
            Some("latest")
        );
        assert_eq!(index.manifests[0].platform.as_ref().unwrap().architecture, "arm64");

        let (opened, opened_digest, layers) = open(&root).unwrap().unwrap();
        assert_eq!(opened_digest, digest);
        assert_eq!(opened.rootfs.diff_ids, vec![info.diff_id.clone()]);
        assert_eq!(layers[0].digest.as_deref(), Some(info.digest.as_str()));

        let fresh = BlobStore::open(dir.path().join("fresh")).unwrap();
        materialize(&fresh, &root, &layers).unwrap();
        assert!(fresh.contains(&info.diff_id));
    }

    #[test]
    fn missing_layout_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(open(&dir.path().join("nothing")).unwrap().is_none());
    }

    #[test]
    fn index_json_shape() {
        let index = ImageIndex::new();
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["mediaType"], INDEX_MEDIA_TYPE);
        assert!(json["manifests"].as_array().unwrap().is_empty());
    }
}
