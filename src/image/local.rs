//! Images stored in the container daemon
//!
//! Reads go through `image inspect` (metadata) and `save` (layer content,
//! fetched lazily). Writes build a docker-archive tarball from the blob
//! store and `load` it.

use crate::archive;
use crate::error::{PackError, PackResult};
use crate::image::blob::BlobStore;
use crate::image::config::ImageConfig;
use crate::image::{Layer, LayerOrigin};
use crate::orchestration::ContainerRuntime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// One entry of a docker-archive `manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ArchiveManifest {
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

/// An extracted docker-archive
pub(crate) struct ExtractedArchive {
    pub dir: TempDir,
    pub manifest: ArchiveManifest,
    pub config_bytes: Vec<u8>,
}

impl ExtractedArchive {
    pub fn config(&self) -> PackResult<ImageConfig> {
        Ok(serde_json::from_slice(&self.config_bytes)?)
    }

    pub fn layer_paths(&self) -> Vec<PathBuf> {
        self.manifest
            .layers
            .iter()
            .map(|l| self.dir.path().join(l))
            .collect()
    }
}

/// Unpack a docker-archive produced by `docker save`
pub(crate) fn extract_archive(path: &Path) -> PackResult<ExtractedArchive> {
    let dir = TempDir::new().map_err(|e| PackError::io("creating temp dir", e))?;
    archive::extract(archive::open_tar(path)?, dir.path(), 0)?;

    let manifest_path = dir.path().join("manifest.json");
    let raw = fs::read(&manifest_path)
        .map_err(|e| PackError::io(format!("reading {}", manifest_path.display()), e))?;
    let mut manifests: Vec<ArchiveManifest> = serde_json::from_slice(&raw)?;
    if manifests.is_empty() {
        return Err(PackError::Internal("docker archive has no images".to_string()));
    }
    let manifest = manifests.swap_remove(0);

    let config_path = dir.path().join(&manifest.config);
    let config_bytes = fs::read(&config_path)
        .map_err(|e| PackError::io(format!("reading {}", config_path.display()), e))?;

    Ok(ExtractedArchive {
        dir,
        manifest,
        config_bytes,
    })
}

/// Inspect `name` in the daemon; returns its config, image ID and layers
pub(crate) async fn open(
    runtime: &Arc<dyn ContainerRuntime>,
    name: &str,
) -> PackResult<Option<(ImageConfig, String, Vec<Layer>)>> {
    let Some(inspect) = runtime.image_inspect(name).await? else {
        return Ok(None);
    };

    let config = inspect.to_config();
    let layers = config
        .rootfs
        .diff_ids
        .iter()
        .map(|diff_id| Layer {
            diff_id: diff_id.clone(),
            digest: None,
            size: None,
            origin: LayerOrigin::Daemon {
                image: inspect.id.clone(),
            },
        })
        .collect();
    Ok(Some((config, inspect.id, layers)))
}

/// Copy the content of `wanted` daemon layers of `image` into the blob store
pub(crate) async fn materialize(
    runtime: &Arc<dyn ContainerRuntime>,
    store: &Arc<BlobStore>,
    image: &str,
    wanted: &[String],
) -> PackResult<()> {
    debug!("Exporting {} layer(s) of {} from daemon", wanted.len(), image);

    let temp = TempDir::new().map_err(|e| PackError::io("creating temp dir", e))?;
    let archive_path = temp.path().join("image.tar");
    runtime.image_save(image, &archive_path).await?;

    let store = Arc::clone(store);
    let wanted: HashSet<String> = wanted.iter().cloned().collect();
    tokio::task::spawn_blocking(move || -> PackResult<()> {
        let extracted = extract_archive(&archive_path)?;
        let config = extracted.config()?;
        for (diff_id, path) in config.rootfs.diff_ids.iter().zip(extracted.layer_paths()) {
            if !wanted.contains(diff_id) || store.contains(diff_id) {
                continue;
            }
            let info = store.insert_tar(&path)?;
            if &info.diff_id != diff_id {
                return Err(PackError::BlobCorrupt {
                    expected: diff_id.clone(),
                    actual: info.diff_id,
                });
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| PackError::Internal(e.to_string()))?
}

/// Write a docker-archive for `config` + `layers` tagged with `tags`
///
/// Layers are written gzip-compressed; `docker load` and `podman load`
/// both decompress them and check the result against the config diff-ids.
pub(crate) fn write_archive(
    out: &Path,
    store: &BlobStore,
    config_bytes: &[u8],
    layers: &[Layer],
    tags: &[String],
) -> PackResult<()> {
    let config_digest = crate::image::blob::sha256_digest(config_bytes);
    let config_name = format!("{}.json", hex_part(&config_digest));

    let mut layer_names = Vec::with_capacity(layers.len());
    for layer in layers {
        layer_names.push(format!("{}/layer.tar", hex_part(&layer.diff_id)));
    }

    let manifest = vec![ArchiveManifest {
        config: config_name.clone(),
        repo_tags: Some(tags.to_vec()),
        layers: layer_names.clone(),
    }];
    let manifest_bytes = serde_json::to_vec(&manifest)?;

    let file = File::create(out).map_err(|e| PackError::io(format!("creating {}", out.display()), e))?;
    let mut builder = tar::Builder::new(BufWriter::new(file));

    append_bytes(&mut builder, &config_name, config_bytes)?;
    let mut written = HashSet::new();
    for (layer, name) in layers.iter().zip(&layer_names) {
        if !written.insert(name.clone()) {
            continue;
        }
        let info = store
            .lookup(&layer.diff_id)
            .ok_or_else(|| PackError::LayerNotFound(layer.diff_id.clone()))?;
        let path = store.blob_path(&info.digest);
        let mut blob =
            File::open(&path).map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
        let mut header = tar_header(info.size);
        builder
            .append_data(&mut header, name, &mut blob)
            .map_err(|e| PackError::io(format!("writing {} to archive", name), e))?;
    }
    append_bytes(&mut builder, "manifest.json", &manifest_bytes)?;

    let mut inner = builder
        .into_inner()
        .map_err(|e| PackError::io("finishing image archive", e))?;
    inner
        .flush()
        .map_err(|e| PackError::io(format!("flushing {}", out.display()), e))
}

/// Load `config` + `layers` into the daemon; returns the image ID
pub(crate) async fn save(
    runtime: &Arc<dyn ContainerRuntime>,
    store: &Arc<BlobStore>,
    config_bytes: Vec<u8>,
    layers: Vec<Layer>,
    tags: Vec<String>,
) -> PackResult<String> {
    let image_id = crate::image::blob::sha256_digest(&config_bytes);
    let temp = TempDir::new().map_err(|e| PackError::io("creating temp dir", e))?;
    let archive_path = temp.path().join("image.tar");

    let store = Arc::clone(store);
    let path = archive_path.clone();
    tokio::task::spawn_blocking(move || write_archive(&path, &store, &config_bytes, &layers, &tags))
        .await
        .map_err(|e| PackError::Internal(e.to_string()))??;

    runtime.image_load(&archive_path).await?;
    Ok(image_id)
}

fn append_bytes<W: Write>(builder: &mut tar::Builder<W>, name: &str, bytes: &[u8]) -> PackResult<()> {
    let mut header = tar_header(bytes.len() as u64);
    builder
        .append_data(&mut header, name, bytes)
        .map_err(|e| PackError::io(format!("writing {} to archive", name), e))
}

fn tar_header(size: u64) -> tar::Header {
    let mut header = tar::Header::new_ustar();
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_entry_type(tar::EntryType::Regular);
    header
}

fn hex_part(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::LayerWriter;

    #[test]
    fn archive_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path().join("store")).unwrap();

        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        writer.add_file("/cnb/stack.toml", b"[run-image]\n", 0o644).unwrap();
        let info = store.insert_reader(writer.finish().unwrap().as_slice()).unwrap();

        let mut config = ImageConfig::empty("linux", "amd64");
        config.rootfs.diff_ids.push(info.diff_id.clone());
        let config_bytes = config.to_bytes().unwrap();

        let layer = Layer {
            diff_id: info.diff_id.clone(),
            digest: Some(info.digest.clone()),
            size: Some(info.size),
            origin: LayerOrigin::Store,
        };
        let out = dir.path().join("image.tar");
        write_archive(
            &out,
            &store,
            &config_bytes,
            &[layer],
            &["docker.io/library/app:latest".to_string()],
        )
        .unwrap();

        let extracted = extract_archive(&out).unwrap();
        assert_eq!(
            extracted.manifest.repo_tags,
            Some(vec!["docker.io/library/app:latest".to_string()])
        );
        assert_eq!(extracted.config().unwrap(), config);

        let other = BlobStore::open(dir.path().join("other")).unwrap();
        let reinserted = other.insert_tar(&extracted.layer_paths()[0]).unwrap();
        assert_eq!(reinserted.diff_id, info.diff_id);
    }
}
