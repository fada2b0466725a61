//! Packaged buildpacks: images (or `.cnb` OCI layout files) whose layers are modules
//!
//! Two labels describe a package:
//! `io.buildpacks.buildpackage.metadata` names the top-level module, and
//! `io.buildpacks.buildpack.layers` maps `id -> version -> layer info` for
//! every module inside it. Builders carry the same layers label.

use crate::archive;
use crate::buildpack::blob::BuildModule;
use crate::buildpack::descriptor::{Descriptor, ModuleInfo, ModuleKind, Order, Stack, Target};
use crate::error::{PackError, PackResult};
use crate::image::{labels, Image};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Label listing extension layers in a builder or extension package
pub const EXTENSION_LAYERS_LABEL: &str = "io.buildpacks.extension.layers";

/// One entry of the layers label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLayerInfo {
    #[serde(default)]
    pub api: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<Stack>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Order,
    #[serde(rename = "layerDiffID")]
    pub layer_diff_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `id -> version -> layer info`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleLayers(pub BTreeMap<String, BTreeMap<String, ModuleLayerInfo>>);

impl ModuleLayers {
    pub fn insert(&mut self, descriptor: &Descriptor, diff_id: &str) {
        self.0
            .entry(descriptor.info.id.clone())
            .or_default()
            .insert(
                descriptor.info.version.clone(),
                ModuleLayerInfo {
                    api: descriptor.api.clone(),
                    stacks: descriptor.stacks.clone(),
                    targets: descriptor.targets.clone(),
                    order: descriptor.order.clone(),
                    layer_diff_id: diff_id.to_string(),
                    homepage: descriptor.info.homepage.clone(),
                    name: descriptor.info.name.clone(),
                },
            );
    }

    pub fn get(&self, id: &str, version: &str) -> Option<&ModuleLayerInfo> {
        self.0.get(id)?.get(version)
    }

    pub fn contains(&self, id: &str, version: &str) -> bool {
        self.get(id, version).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every module, as a descriptor rebuilt from the label plus its diff-id
    pub fn descriptors(&self, kind: ModuleKind) -> Vec<(Descriptor, String)> {
        self.0
            .iter()
            .flat_map(|(id, versions)| {
                versions.iter().map(move |(version, layer)| {
                    let descriptor = Descriptor {
                        kind,
                        api: layer.api.clone(),
                        info: ModuleInfo {
                            id: id.clone(),
                            version: version.clone(),
                            homepage: layer.homepage.clone(),
                            name: layer.name.clone(),
                            ..Default::default()
                        },
                        stacks: layer.stacks.clone(),
                        targets: layer.targets.clone(),
                        order: layer.order.clone(),
                    };
                    (descriptor, layer.layer_diff_id.clone())
                })
            })
            .collect()
    }

    /// Read the layers label of `kind` from an image; absent label is empty
    pub fn from_image(image: &Image, kind: ModuleKind) -> PackResult<Self> {
        let key = match kind {
            ModuleKind::Buildpack => labels::BUILDPACK_LAYERS,
            ModuleKind::Extension => EXTENSION_LAYERS_LABEL,
        };
        match image.label(key) {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(raw)?),
            _ => Ok(Self::default()),
        }
    }
}

/// `io.buildpacks.buildpackage.metadata`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    #[serde(flatten)]
    pub info: ModuleInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stacks: Vec<Stack>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
}

/// The modules contained in a package image
#[derive(Debug, Clone)]
pub struct PackageContents {
    /// The module named by the package metadata
    pub main: BuildModule,
    /// Every other module in the package
    pub dependencies: Vec<BuildModule>,
}

impl PackageContents {
    pub fn all(&self) -> impl Iterator<Item = &BuildModule> {
        std::iter::once(&self.main).chain(self.dependencies.iter())
    }
}

/// Read the modules out of a package image, copying their layers into the blob store
pub async fn extract_modules(image: &Image, kind: ModuleKind) -> PackResult<PackageContents> {
    let raw = image
        .label(labels::BUILDPACKAGE_METADATA)
        .ok_or_else(|| {
            PackError::invalid(format!(
                "{} is not a {} package: missing label {}",
                image.name(),
                kind,
                labels::BUILDPACKAGE_METADATA
            ))
        })?;
    let metadata: PackageMetadata = serde_json::from_str(raw)?;
    let layers = ModuleLayers::from_image(image, kind)?;

    let mut main = None;
    let mut dependencies = Vec::new();
    for (descriptor, diff_id) in layers.descriptors(kind) {
        image.ensure_layer(&diff_id).await?;
        let module = BuildModule::from_layer(descriptor, diff_id);
        if module.info().matches(&metadata.info) {
            main = Some(module);
        } else {
            dependencies.push(module);
        }
    }

    let main = main.ok_or_else(|| {
        PackError::BuilderInconsistent(format!(
            "package {} does not contain its main {} {}",
            image.name(),
            kind,
            metadata.info
        ))
    })?;
    debug!(
        "Package {} provides {} with {} dependencies",
        image.name(),
        main.info(),
        dependencies.len()
    );
    Ok(PackageContents { main, dependencies })
}

/// Whether a file is an OCI layout archive (a `.cnb` package)
pub fn is_layout_archive(path: &Path) -> PackResult<bool> {
    if !path.is_file() || archive::is_zip(path)? {
        return Ok(false);
    }
    let entries = match archive::list_entries(archive::open_tar(path)?) {
        Ok(entries) => entries,
        Err(_) => return Ok(false),
    };
    Ok(entries.iter().any(|e| e == "oci-layout") && entries.iter().any(|e| e == "index.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildpack::blob::tests::leaf_buildpack;
    use crate::image::{Backend, BlobStore, ImageRef};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn layers_label_shape() {
        let temp = TempDir::new().unwrap();
        let dir = leaf_buildpack(temp.path(), "example/leaf", "1.0.0");
        let descriptor = Descriptor::read_dir(ModuleKind::Buildpack, &dir).unwrap();

        let mut layers = ModuleLayers::default();
        layers.insert(&descriptor, "sha256:abc");
        let json = serde_json::to_value(&layers).unwrap();
        assert_eq!(json["example/leaf"]["1.0.0"]["layerDiffID"], "sha256:abc");
        assert_eq!(json["example/leaf"]["1.0.0"]["api"], "0.10");
        assert_eq!(json["example/leaf"]["1.0.0"]["stacks"][0]["id"], "*");

        let (rebuilt, diff_id) = layers.descriptors(ModuleKind::Buildpack).remove(0);
        assert_eq!(diff_id, "sha256:abc");
        assert_eq!(rebuilt.info.full_name(), "example/leaf@1.0.0");
        assert_eq!(rebuilt.stacks, descriptor.stacks);
    }

    #[tokio::test]
    async fn extracts_modules_from_layout_package() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::open(temp.path().join("store")).unwrap());
        let main_dir = leaf_buildpack(temp.path(), "example/main", "2.0.0");
        let dep_dir = leaf_buildpack(temp.path(), "example/dep", "1.0.0");

        let root = temp.path().join("layout");
        let mut image = Image::new(
            ImageRef::parse("example/main:2.0.0").unwrap(),
            Backend::Layout(root.clone()),
            Arc::clone(&store),
            "linux",
            "amd64",
        );
        let mut layers = ModuleLayers::default();
        for dir in [&main_dir, &dep_dir] {
            let module = BuildModule::from_path(ModuleKind::Buildpack, dir).unwrap();
            let info = module.write_layer(&store).unwrap();
            image.reuse_layer(&info.diff_id).unwrap();
            layers.insert(&module.descriptor, &info.diff_id);
        }
        let metadata = PackageMetadata {
            info: ModuleInfo::new("example/main", "2.0.0"),
            ..Default::default()
        };
        image
            .set_label(labels::BUILDPACKAGE_METADATA, &serde_json::to_string(&metadata).unwrap())
            .unwrap();
        image
            .set_label(labels::BUILDPACK_LAYERS, &serde_json::to_string(&layers).unwrap())
            .unwrap();
        image.save().await.unwrap();

        let reopened = Image::open(ImageRef::parse("example/main:2.0.0").unwrap(), Backend::Layout(root), store)
            .await
            .unwrap();
        let contents = extract_modules(&reopened, ModuleKind::Buildpack).await.unwrap();
        assert_eq!(contents.main.info().id, "example/main");
        assert_eq!(contents.dependencies.len(), 1);
        assert_eq!(contents.dependencies[0].info().id, "example/dep");
    }

    #[test]
    fn detects_layout_archives() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("plain.tar");
        archive::write_single_file_tar("/buildpack.toml", b"", 0, 0, &plain).unwrap();
        assert!(!is_layout_archive(&plain).unwrap());

        let layout = temp.path().join("layout");
        std::fs::create_dir_all(&layout).unwrap();
        std::fs::write(layout.join("oci-layout"), "{}").unwrap();
        std::fs::write(layout.join("index.json"), "{}").unwrap();
        let cnb = temp.path().join("bp.cnb");
        crate::image::layout::write_layout_archive(&layout, &cnb).unwrap();
        assert!(is_layout_archive(&cnb).unwrap());
    }
}
