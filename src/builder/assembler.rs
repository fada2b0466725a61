//! Layered construction of builder images
//!
//! Layer order on top of the build image: lifecycle, default directories,
//! module layers (children before parents, deduplicated by diff-id), then
//! `order.toml`, `stack.toml`, `run.toml` and the platform env.

use crate::archive::LayerWriter;
use crate::builder::lifecycle::LifecycleArchive;
use crate::builder::metadata::{
    json_label, run_toml, stack_toml, Builder, BuilderMetadata, RunImageMetadata, StackMetadata,
    CREATOR_NAME, ENV_GID, ENV_UID, EXTENSION_ORDER_LABEL,
};
use crate::buildpack::blob::BuildModule;
use crate::buildpack::descriptor::{Group, ModuleInfo, ModuleKind, ModuleRef, Order};
use crate::buildpack::package::{ModuleLayers, EXTENSION_LAYERS_LABEL};
use crate::buildpack::resolve::sort_modules;
use crate::error::{PackError, PackResult};
use crate::image::{labels, Backend, Image, ImageRef};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const ORDER_PATH: &str = "/cnb/order.toml";
pub const STACK_PATH: &str = "/cnb/stack.toml";
pub const RUN_PATH: &str = "/cnb/run.toml";
pub const LAYERS_DIR: &str = "/layers";
pub const WORKSPACE_DIR: &str = "/workspace";
pub const PLATFORM_DIR: &str = "/platform";

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct OrderToml {
    order: Order,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    order_extensions: Order,
}

/// Builds a builder image from a build image (new builder) or an existing builder (ephemeral)
pub struct BuilderAssembler {
    image: Image,
    metadata: BuilderMetadata,
    buildpack_layers: ModuleLayers,
    extension_layers: ModuleLayers,
    existing: Vec<BuildModule>,
    added: Vec<BuildModule>,
    lifecycle: Option<LifecycleArchive>,
    order: Option<Order>,
    order_extensions: Option<Order>,
    env: BTreeMap<String, String>,
    stack_id: String,
    mixins: Vec<String>,
    uid: u32,
    gid: u32,
    fresh: bool,
}

impl BuilderAssembler {
    /// Start a new builder named `name` on top of `build_image`
    ///
    /// The build image must carry `CNB_USER_ID` and `CNB_GROUP_ID`.
    pub fn new(name: ImageRef, backend: Backend, build_image: &Image) -> PackResult<Self> {
        let parse_id = |key: &str| -> PackResult<u32> {
            let raw = build_image.env(key).ok_or_else(|| {
                PackError::invalid(format!(
                    "build image {} is missing required env var {}",
                    build_image.name(),
                    key
                ))
            })?;
            raw.trim().parse().map_err(|_| {
                PackError::invalid(format!("{} on {} must be an integer, got '{}'", key, build_image.name(), raw))
            })
        };
        let uid = parse_id(ENV_UID)?;
        let gid = parse_id(ENV_GID)?;
        let mixins: Vec<String> = build_image
            .label(labels::STACK_MIXINS)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        Ok(Self {
            image: Image::from_base(name, backend, build_image),
            metadata: BuilderMetadata::default(),
            buildpack_layers: ModuleLayers::default(),
            extension_layers: ModuleLayers::default(),
            existing: Vec::new(),
            added: Vec::new(),
            lifecycle: None,
            order: Some(Order::new()),
            order_extensions: None,
            env: BTreeMap::new(),
            stack_id: build_image.label(labels::STACK_ID).unwrap_or_default().to_string(),
            mixins,
            uid,
            gid,
            fresh: true,
        })
    }

    /// Start from an existing builder; its modules, lifecycle and order are kept
    pub fn extend(name: ImageRef, backend: Backend, builder: &Builder) -> Self {
        let mut existing = builder.modules(ModuleKind::Buildpack);
        existing.extend(builder.modules(ModuleKind::Extension));
        Self {
            image: Image::from_base(name, backend, builder.image()),
            metadata: builder.metadata().clone(),
            buildpack_layers: builder.layers(ModuleKind::Buildpack).clone(),
            extension_layers: builder.layers(ModuleKind::Extension).clone(),
            existing,
            added: Vec::new(),
            lifecycle: None,
            order: None,
            order_extensions: None,
            env: BTreeMap::new(),
            stack_id: builder.stack_id().to_string(),
            mixins: builder.mixins().to_vec(),
            uid: builder.uid(),
            gid: builder.gid(),
            fresh: false,
        }
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.metadata.description = description.into();
    }

    pub fn set_stack_id(&mut self, stack_id: impl Into<String>) {
        self.stack_id = stack_id.into();
    }

    /// Run images in preference order; the first is also the legacy stack run image
    pub fn set_run_images(&mut self, images: Vec<RunImageMetadata>) {
        self.metadata.stack = StackMetadata {
            run_image: images.first().cloned().unwrap_or_default(),
        };
        self.metadata.images = images;
    }

    pub fn set_lifecycle(&mut self, lifecycle: LifecycleArchive) {
        self.metadata.lifecycle = lifecycle.metadata().clone();
        self.lifecycle = Some(lifecycle);
    }

    /// Add a module; an existing module with the same id and version is replaced
    pub fn add_module(&mut self, module: BuildModule) {
        self.added
            .retain(|m| !(m.kind() == module.kind() && m.info().matches(module.info())));
        self.added.push(module);
    }

    pub fn set_order(&mut self, kind: ModuleKind, order: Order) {
        match kind {
            ModuleKind::Buildpack => self.order = Some(order),
            ModuleKind::Extension => self.order_extensions = Some(order),
        }
    }

    /// Build-time env written to `/platform/env`
    pub fn set_build_env(&mut self, env: BTreeMap<String, String>) {
        self.env = env;
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Every module the builder will contain
    fn all_modules(&self) -> Vec<BuildModule> {
        let mut all: Vec<BuildModule> = self
            .existing
            .iter()
            .filter(|e| {
                !self
                    .added
                    .iter()
                    .any(|a| a.kind() == e.kind() && a.info().matches(e.info()))
            })
            .cloned()
            .collect();
        all.extend(self.added.iter().cloned());
        all
    }

    fn validate_modules(&self, modules: &[BuildModule]) -> PackResult<()> {
        let buildpack_apis = self.metadata.lifecycle.buildpack_apis();
        for module in &self.added {
            let descriptor = &module.descriptor;
            if !buildpack_apis.is_empty() && !buildpack_apis.contains(&descriptor.api) {
                return Err(PackError::invalid(format!(
                    "{} {} (Buildpack API {}) is incompatible with lifecycle {} (Buildpack APIs {})",
                    descriptor.kind,
                    descriptor.info.full_name(),
                    descriptor.api,
                    self.metadata.lifecycle.version,
                    buildpack_apis.join(", ")
                )));
            }
            if !self.stack_id.is_empty() {
                descriptor.ensure_stack_support(&self.stack_id, &self.mixins)?;
            }
            descriptor.ensure_target_support(self.image.os(), self.image.architecture())?;
        }
        // Children of meta buildpacks must be present, and no cycles.
        sort_modules(modules).map(|_| ())
    }

    /// Produce the unsaved builder image
    pub async fn assemble(mut self) -> PackResult<Image> {
        let modules = self.all_modules();
        self.validate_modules(&modules)?;
        let store = std::sync::Arc::clone(self.image.store());

        if let Some(lifecycle) = self.lifecycle.clone() {
            let layer_store = std::sync::Arc::clone(&store);
            let info = tokio::task::spawn_blocking(move || lifecycle.write_layer(&layer_store))
                .await
                .map_err(|e| PackError::Internal(e.to_string()))??;
            self.image.reuse_layer(&info.diff_id)?;
        } else if self.fresh {
            return Err(PackError::invalid("a lifecycle is required to create a builder"));
        }

        if self.fresh {
            let bytes = self.dirs_layer()?;
            self.image
                .add_layer_reader(bytes.as_slice(), Some("pack: default directories"))?;
        }

        for module in sort_modules(&modules)? {
            if !self.added.iter().any(|a| a == &module) {
                continue;
            }
            let layer_store = std::sync::Arc::clone(&store);
            let writer = module.clone();
            let info = tokio::task::spawn_blocking(move || writer.write_layer(&layer_store))
                .await
                .map_err(|e| PackError::Internal(e.to_string()))??;

            let layers = match module.kind() {
                ModuleKind::Buildpack => &mut self.buildpack_layers,
                ModuleKind::Extension => &mut self.extension_layers,
            };
            if layers.contains(&module.info().id, &module.info().version) {
                warn!("{} {} already exists on builder and will be overridden", module.kind(), module.info());
            }
            layers.insert(&module.descriptor, &info.diff_id);

            if self.image.has_layer(&info.diff_id) {
                debug!("Layer for {} already present", module.info());
            } else {
                self.image.reuse_layer(&info.diff_id)?;
            }
        }

        self.metadata.buildpacks = infos(&modules, ModuleKind::Buildpack);
        self.metadata.extensions = infos(&modules, ModuleKind::Extension);

        if let Some(order) = self.order.take() {
            let resolved = resolve_order(&order, &modules, ModuleKind::Buildpack)?;
            let resolved_ext = match self.order_extensions.take() {
                Some(ext) => resolve_order(&ext, &modules, ModuleKind::Extension)?,
                None => json_label(&self.image, EXTENSION_ORDER_LABEL)?,
            };
            let contents = toml::to_string(&OrderToml {
                order: resolved.clone(),
                order_extensions: resolved_ext.clone(),
            })?;
            self.add_file_layer(ORDER_PATH, contents.as_bytes(), "pack: order.toml")?;
            self.image
                .set_label(labels::BUILDER_ORDER, &serde_json::to_string(&resolved)?)?;
            if !resolved_ext.is_empty() {
                self.image
                    .set_label(EXTENSION_ORDER_LABEL, &serde_json::to_string(&resolved_ext)?)?;
            }
        }

        if self.fresh {
            let run_images = self.metadata.run_images();
            let stack = stack_toml(&run_images)?;
            self.add_file_layer(STACK_PATH, stack.as_bytes(), "pack: stack.toml")?;
            let run = run_toml(&run_images)?;
            self.add_file_layer(RUN_PATH, run.as_bytes(), "pack: run.toml")?;
        }

        if !self.env.is_empty() {
            let mut writer = LayerWriter::new(Vec::new(), 0, 0);
            writer.add_dir(&format!("{}/env", PLATFORM_DIR))?;
            for (key, value) in &self.env {
                writer.add_file(&format!("{}/env/{}", PLATFORM_DIR, key), value.as_bytes(), 0o644)?;
            }
            let bytes = writer.finish()?;
            self.image
                .add_layer_reader(bytes.as_slice(), Some("pack: platform env"))?;
        }

        self.metadata.created_by.name = CREATOR_NAME.to_string();
        self.metadata.created_by.version = env!("CARGO_PKG_VERSION").to_string();

        if !self.stack_id.is_empty() {
            self.image.set_label(labels::STACK_ID, &self.stack_id)?;
        }
        self.image
            .set_label(labels::BUILDER_METADATA, &serde_json::to_string(&self.metadata)?)?;
        self.image
            .set_label(labels::BUILDPACK_LAYERS, &serde_json::to_string(&self.buildpack_layers)?)?;
        if !self.extension_layers.is_empty() {
            self.image
                .set_label(EXTENSION_LAYERS_LABEL, &serde_json::to_string(&self.extension_layers)?)?;
        }
        self.image.set_env(ENV_UID, &self.uid.to_string())?;
        self.image.set_env(ENV_GID, &self.gid.to_string())?;
        self.image.set_working_dir(LAYERS_DIR)?;

        ensure_consistent(&self.image, &self.buildpack_layers, &self.extension_layers)?;
        Ok(self.image)
    }

    fn dirs_layer(&self) -> PackResult<Vec<u8>> {
        let (uid, gid) = (u64::from(self.uid), u64::from(self.gid));
        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        writer.add_dir_owned(WORKSPACE_DIR, uid, gid)?;
        writer.add_dir_owned(LAYERS_DIR, uid, gid)?;
        writer.add_dir(ModuleKind::Buildpack.install_root())?;
        writer.add_dir(ModuleKind::Extension.install_root())?;
        writer.add_dir(&format!("{}/env", PLATFORM_DIR))?;
        writer.finish()
    }

    fn add_file_layer(&mut self, path: &str, contents: &[u8], created_by: &str) -> PackResult<()> {
        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        writer.add_file(path, contents, 0o644)?;
        let bytes = writer.finish()?;
        self.image.add_layer_reader(bytes.as_slice(), Some(created_by))?;
        Ok(())
    }
}

fn infos(modules: &[BuildModule], kind: ModuleKind) -> Vec<ModuleInfo> {
    let mut infos: Vec<ModuleInfo> = modules
        .iter()
        .filter(|m| m.kind() == kind)
        .map(|m| ModuleInfo {
            id: m.info().id.clone(),
            version: m.info().version.clone(),
            homepage: m.info().homepage.clone(),
            name: m.info().name.clone(),
            ..Default::default()
        })
        .collect();
    infos.sort();
    infos.dedup();
    infos
}

/// Pin every order entry to a version present on the builder
pub fn resolve_order(order: &Order, modules: &[BuildModule], kind: ModuleKind) -> PackResult<Order> {
    order
        .iter()
        .map(|group| {
            let refs = group
                .group
                .iter()
                .map(|reference| {
                    let versions: Vec<&str> = modules
                        .iter()
                        .filter(|m| m.kind() == kind && m.info().id == reference.id)
                        .map(|m| m.info().version.as_str())
                        .collect();
                    if versions.is_empty() {
                        return Err(PackError::BuilderInconsistent(format!(
                            "no versions of {} {} were found on the builder",
                            kind, reference.id
                        )));
                    }
                    let version = if reference.version.is_empty() {
                        if versions.len() > 1 {
                            return Err(PackError::invalid(format!(
                                "unable to resolve version: multiple versions of {} - must specify an explicit version",
                                reference.id
                            )));
                        }
                        versions[0].to_string()
                    } else if versions.contains(&reference.version.as_str()) {
                        reference.version.clone()
                    } else {
                        return Err(PackError::BuilderInconsistent(format!(
                            "{} {} with version {} was not found on the builder",
                            kind, reference.id, reference.version
                        )));
                    };
                    Ok(ModuleRef {
                        id: reference.id.clone(),
                        version,
                        optional: reference.optional,
                    })
                })
                .collect::<PackResult<Vec<_>>>()?;
            Ok(Group { group: refs })
        })
        .collect()
}

/// Every ordered module must have a layers-label entry backed by an image layer
pub fn ensure_consistent(image: &Image, buildpacks: &ModuleLayers, extensions: &ModuleLayers) -> PackResult<()> {
    let check = |label: &str, layers: &ModuleLayers| -> PackResult<()> {
        let order: Order = json_label(image, label)?;
        for reference in order.iter().flat_map(|g| &g.group) {
            let entry = layers.get(&reference.id, &reference.version).ok_or_else(|| {
                PackError::BuilderInconsistent(format!(
                    "{} is in the order but missing from the layers label",
                    reference.full_name()
                ))
            })?;
            if !image.has_layer(&entry.layer_diff_id) {
                return Err(PackError::BuilderInconsistent(format!(
                    "layer {} for {} is not part of the image",
                    entry.layer_diff_id,
                    reference.full_name()
                )));
            }
        }
        Ok(())
    };
    check(labels::BUILDER_ORDER, buildpacks)?;
    check(EXTENSION_ORDER_LABEL, extensions)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive;
    use crate::buildpack::blob::tests::leaf_buildpack;
    use crate::builder::lifecycle::tests::fake_lifecycle;
    use crate::image::BlobStore;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) fn build_image(temp: &Path, store: Arc<BlobStore>) -> Image {
        let mut image = Image::new(
            ImageRef::parse("example/build:jammy").unwrap(),
            Backend::Layout(temp.join("build-image")),
            store,
            "linux",
            "amd64",
        );
        image.set_env(ENV_UID, "1000").unwrap();
        image.set_env(ENV_GID, "1000").unwrap();
        image.set_label(labels::STACK_ID, "io.buildpacks.stacks.jammy").unwrap();
        image
    }

    /// A saved builder with one buildpack `example/leaf@1.0.0`
    pub(crate) async fn saved_builder(temp: &Path, store: Arc<BlobStore>) -> Image {
        saved_builder_in(temp, store, Backend::Layout(temp.join("builder"))).await
    }

    /// Same builder, saved to `backend`
    pub(crate) async fn saved_builder_in(temp: &Path, store: Arc<BlobStore>, backend: Backend) -> Image {
        let base = build_image(temp, Arc::clone(&store));
        let mut assembler =
            BuilderAssembler::new(ImageRef::parse("example/builder:latest").unwrap(), backend, &base).unwrap();
        let lifecycle = fake_lifecycle(temp, "0.20.5", &["0.12", "0.13"]);
        assembler.set_lifecycle(LifecycleArchive::open(&lifecycle).unwrap());
        assembler.set_run_images(vec![RunImageMetadata {
            image: "example/run:jammy".into(),
            mirrors: vec!["mirror.example.com/run:jammy".into()],
        }]);
        let dir = leaf_buildpack(temp, "example/leaf", "1.0.0");
        assembler.add_module(BuildModule::from_path(ModuleKind::Buildpack, &dir).unwrap());
        assembler.set_order(
            ModuleKind::Buildpack,
            vec![Group {
                group: vec![ModuleRef::new("example/leaf", "")],
            }],
        );
        let mut image = assembler.assemble().await.unwrap();
        image.save().await.unwrap();
        image
    }

    fn layer_files(image: &Image, diff_id: &str) -> Vec<String> {
        archive::list_entries(image.store().open_layer(diff_id).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn assembles_consistent_builder() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::open(temp.path().join("store")).unwrap());
        let image = saved_builder(temp.path(), store).await;

        let builder = Builder::from_image(image).unwrap();
        assert_eq!(builder.order()[0].group[0].version, "1.0.0");
        assert!(builder.layers(ModuleKind::Buildpack).contains("example/leaf", "1.0.0"));
        assert_eq!(builder.uid(), 1000);
        assert_eq!(builder.lifecycle().version, "0.20.5");
        assert_eq!(builder.metadata().created_by.name, CREATOR_NAME);
        assert_eq!(builder.run_image().as_deref(), Some("example/run:jammy"));
        assert_eq!(builder.image().working_dir(), Some(LAYERS_DIR));

        let diff_ids = builder.image().diff_ids();
        assert!(layer_files(builder.image(), &diff_ids[0]).contains(&"cnb/lifecycle/detector".to_string()));
        let order_files = layer_files(builder.image(), &diff_ids[3]);
        assert!(order_files.contains(&"cnb/order.toml".to_string()));
        let bp_layer = &builder.layers(ModuleKind::Buildpack).get("example/leaf", "1.0.0").unwrap().layer_diff_id;
        assert_eq!(&diff_ids[2], bp_layer);
    }

    #[tokio::test]
    async fn missing_order_entries_are_inconsistent() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::open(temp.path().join("store")).unwrap());
        let base = build_image(temp.path(), Arc::clone(&store));
        let mut assembler = BuilderAssembler::new(
            ImageRef::parse("example/builder").unwrap(),
            Backend::Layout(temp.path().join("b")),
            &base,
        )
        .unwrap();
        let lifecycle = fake_lifecycle(temp.path(), "0.20.5", &["0.13"]);
        assembler.set_lifecycle(LifecycleArchive::open(&lifecycle).unwrap());
        assembler.set_order(
            ModuleKind::Buildpack,
            vec![Group {
                group: vec![ModuleRef::new("example/ghost", "1.0.0")],
            }],
        );
        assert!(matches!(
            assembler.assemble().await,
            Err(PackError::BuilderInconsistent(_))
        ));
    }

    #[tokio::test]
    async fn malformed_extension_order_label_is_inconsistent() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::open(temp.path().join("store")).unwrap());
        let mut base = build_image(temp.path(), Arc::clone(&store));
        base.set_label(EXTENSION_ORDER_LABEL, "[{\"group\": ").unwrap();
        let mut assembler = BuilderAssembler::new(
            ImageRef::parse("example/builder").unwrap(),
            Backend::Layout(temp.path().join("b")),
            &base,
        )
        .unwrap();
        let lifecycle = fake_lifecycle(temp.path(), "0.20.5", &["0.13"]);
        assembler.set_lifecycle(LifecycleArchive::open(&lifecycle).unwrap());
        let dir = leaf_buildpack(temp.path(), "example/leaf", "1.0.0");
        assembler.add_module(BuildModule::from_path(ModuleKind::Buildpack, &dir).unwrap());
        assembler.set_order(
            ModuleKind::Buildpack,
            vec![Group {
                group: vec![ModuleRef::new("example/leaf", "1.0.0")],
            }],
        );
        match assembler.assemble().await {
            Err(PackError::BuilderInconsistent(msg)) => assert!(msg.contains(EXTENSION_ORDER_LABEL)),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("malformed label was accepted"),
        }
    }

    #[tokio::test]
    async fn build_image_needs_user_ids() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::open(temp.path()).unwrap());
        let base = Image::new(
            ImageRef::parse("example/build").unwrap(),
            Backend::Layout(temp.path().join("b")),
            store,
            "linux",
            "amd64",
        );
        assert!(BuilderAssembler::new(
            ImageRef::parse("example/builder").unwrap(),
            Backend::Layout(temp.path().join("c")),
            &base
        )
        .is_err());
    }

    #[tokio::test]
    async fn extending_keeps_existing_modules() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::open(temp.path().join("store")).unwrap());
        let image = saved_builder(temp.path(), Arc::clone(&store)).await;
        let builder = Builder::from_image(image).unwrap();
        let base_layers = builder.image().diff_ids().len();

        let extra = leaf_buildpack(temp.path(), "example/extra", "0.1.0");
        let mut assembler = BuilderAssembler::extend(
            ImageRef::parse("pack.local/builder/test:latest").unwrap(),
            Backend::Layout(temp.path().join("ephemeral")),
            &builder,
        );
        assembler.add_module(BuildModule::from_path(ModuleKind::Buildpack, &extra).unwrap());
        assembler.set_order(
            ModuleKind::Buildpack,
            vec![Group {
                group: vec![ModuleRef::new("example/extra", ""), ModuleRef::new("example/leaf", "")],
            }],
        );
        let ephemeral = Builder::from_image(assembler.assemble().await.unwrap()).unwrap();

        assert_eq!(ephemeral.image().diff_ids().len(), base_layers + 2);
        assert_eq!(ephemeral.order()[0].group.len(), 2);
        assert!(ephemeral.layers(ModuleKind::Buildpack).contains("example/leaf", "1.0.0"));
        assert!(ephemeral.layers(ModuleKind::Buildpack).contains("example/extra", "0.1.0"));
        assert_eq!(ephemeral.metadata().buildpacks.len(), 2);
    }

    #[test]
    fn ambiguous_versions_need_pinning() {
        let temp = TempDir::new().unwrap();
        let a = BuildModule::from_path(ModuleKind::Buildpack, &leaf_buildpack(temp.path(), "x", "1.0.0")).unwrap();
        let b = BuildModule::from_path(ModuleKind::Buildpack, &leaf_buildpack(temp.path(), "x", "2.0.0")).unwrap();
        let order = vec![Group {
            group: vec![ModuleRef::new("x", "")],
        }];
        assert!(matches!(
            resolve_order(&order, &[a.clone(), b], ModuleKind::Buildpack),
            Err(PackError::InvalidOptions(_))
        ));
        let pinned = resolve_order(&order, &[a], ModuleKind::Buildpack).unwrap();
        assert_eq!(pinned[0].group[0].version, "1.0.0");
    }
}
