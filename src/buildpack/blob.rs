//! Buildpacks and extensions as layer blobs
//!
//! A module's files always land under `/cnb/{buildpacks,extensions}/<escaped id>/<version>/`
//! owned by root, so the same source produces the same diff-id in every
//! builder and package that includes it.

use crate::archive::{self, LayerWriter, ModeRule};
use crate::buildpack::descriptor::{Descriptor, ModuleInfo, ModuleKind};
use crate::error::{PackError, PackResult};
use crate::image::{BlobInfo, BlobStore};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Where a module's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// An unpacked directory containing the descriptor at its root
    Dir(PathBuf),
    /// A `.tgz` / `.tar` with the descriptor at its root
    Archive(PathBuf),
    /// An existing layer in the blob store (from a package or builder image)
    Layer { diff_id: String },
}

/// A resolved buildpack or extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildModule {
    pub descriptor: Descriptor,
    pub source: ModuleSource,
}

impl BuildModule {
    /// Load a module from a directory or a tar archive on disk
    pub fn from_path(kind: ModuleKind, path: &Path) -> PackResult<Self> {
        if path.is_dir() {
            let descriptor = Descriptor::read_dir(kind, path)?;
            return Ok(Self {
                descriptor,
                source: ModuleSource::Dir(path.to_path_buf()),
            });
        }
        if !path.is_file() {
            return Err(PackError::PathNotFound(path.to_path_buf()));
        }

        let contents = archive::read_entry(archive::open_tar(path)?, kind.descriptor_file())?
            .ok_or_else(|| PackError::DescriptorInvalid {
                path: path.display().to_string(),
                reason: format!("archive has no {}", kind.descriptor_file()),
            })?;
        let contents = String::from_utf8(contents).map_err(|e| PackError::DescriptorInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let descriptor = Descriptor::parse(
            kind,
            &contents,
            &format!("{}!{}", path.display(), kind.descriptor_file()),
        )?;
        Ok(Self {
            descriptor,
            source: ModuleSource::Archive(path.to_path_buf()),
        })
    }

    /// A module whose layer is already in the blob store
    pub fn from_layer(descriptor: Descriptor, diff_id: impl Into<String>) -> Self {
        Self {
            descriptor,
            source: ModuleSource::Layer {
                diff_id: diff_id.into(),
            },
        }
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.descriptor.info
    }

    pub fn kind(&self) -> ModuleKind {
        self.descriptor.kind
    }

    /// Produce (or look up) this module's layer in the blob store
    pub fn write_layer(&self, store: &BlobStore) -> PackResult<BlobInfo> {
        match &self.source {
            ModuleSource::Layer { diff_id } => store
                .lookup(diff_id)
                .ok_or_else(|| PackError::LayerNotFound(diff_id.clone())),
            ModuleSource::Dir(dir) => self.layer_from_dir(store, dir),
            ModuleSource::Archive(path) => {
                let temp = TempDir::new().map_err(|e| PackError::io("creating temp dir", e))?;
                archive::extract(archive::open_tar(path)?, temp.path(), 0)?;
                self.layer_from_dir(store, temp.path())
            }
        }
    }

    fn layer_from_dir(&self, store: &BlobStore, dir: &Path) -> PackResult<BlobInfo> {
        let target = self.descriptor.install_dir();
        debug!("Writing layer for {} at {}", self.info(), target);

        let mut writer = LayerWriter::new(Vec::new(), 0, 0).with_mode_rule(ModeRule::Buildpack);
        writer.add_dir_tree(dir, &target)?;
        let bytes = writer.finish()?;
        store.insert_reader(bytes.as_slice())
    }
}
