//! Images in a daemon, a registry or an OCI layout
//!
//! An [`Image`] is a config plus an ordered list of layers. Opening an image
//! only reads metadata; layer content is copied into the shared
//! [`BlobStore`] the first time it is needed (`get_layer`, or `save` to a
//! different backend). After `save` the handle is frozen until `reopen`.

pub mod blob;
pub mod config;
pub mod fetcher;
pub mod layout;
pub(crate) mod local;
pub mod pull_policy;
pub mod reference;
pub mod remote;

pub use blob::{BlobInfo, BlobStore};
pub use config::ImageConfig;
pub use fetcher::{FetchOptions, Fetcher};
pub use pull_policy::PullPolicy;
pub use reference::ImageRef;
pub use remote::RegistryClient;

use crate::error::{PackError, PackResult};
use crate::image::config::History;
use crate::image::remote::{BlobLocation, LAYER_MEDIA_TYPE};
use crate::orchestration::ContainerRuntime;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// Label keys written and read by pack and the lifecycle
pub mod labels {
    pub const STACK_ID: &str = "io.buildpacks.stack.id";
    pub const STACK_MIXINS: &str = "io.buildpacks.stack.mixins";
    pub const BUILDER_METADATA: &str = "io.buildpacks.builder.metadata";
    pub const BUILDPACK_LAYERS: &str = "io.buildpacks.buildpack.layers";
    pub const BUILDER_ORDER: &str = "io.buildpacks.buildpack.order";
    pub const BUILDPACKAGE_METADATA: &str = "io.buildpacks.buildpackage.metadata";
    pub const LIFECYCLE_METADATA: &str = "io.buildpacks.lifecycle.metadata";
    pub const BUILD_METADATA: &str = "io.buildpacks.build.metadata";
    pub const PROJECT_METADATA: &str = "io.buildpacks.project.metadata";
    pub const LIFECYCLE_VERSION: &str = "io.buildpacks.lifecycle.version";
    pub const LIFECYCLE_APIS: &str = "io.buildpacks.lifecycle.apis";
    pub const RUN_IMAGE_MIRRORS: &str = "io.buildpacks.run-image.mirrors";
}

/// Where a layer's content can be fetched from when it is not in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOrigin {
    /// Already in the blob store
    Store,
    /// Inside a daemon image, identified by image ID
    Daemon { image: String },
    /// A blob in a registry repository
    Registry { reference: ImageRef, media_type: String },
    /// A blob in an OCI layout directory
    Layout { root: PathBuf },
}

/// One layer of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub diff_id: String,
    pub digest: Option<String>,
    pub size: Option<u64>,
    pub origin: LayerOrigin,
}

/// Where an image lives
#[derive(Clone)]
pub enum Backend {
    Local(Arc<dyn ContainerRuntime>),
    Remote(Arc<RegistryClient>),
    Layout(PathBuf),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "daemon",
            Self::Remote(_) => "registry",
            Self::Layout(_) => "layout",
        }
    }
}

/// Clients able to materialize layers from other backends
#[derive(Clone, Default)]
struct Sources {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    registry: Option<Arc<RegistryClient>>,
}

impl Sources {
    fn from_backend(backend: &Backend) -> Self {
        match backend {
            Backend::Local(runtime) => Self {
                runtime: Some(Arc::clone(runtime)),
                registry: None,
            },
            Backend::Remote(registry) => Self {
                runtime: None,
                registry: Some(Arc::clone(registry)),
            },
            Backend::Layout(_) => Self::default(),
        }
    }

    fn merge(&mut self, other: &Sources) {
        if self.runtime.is_none() {
            self.runtime = other.runtime.clone();
        }
        if self.registry.is_none() {
            self.registry = other.registry.clone();
        }
    }
}

/// An image handle; single owner, not shared between tasks
pub struct Image {
    name: ImageRef,
    backend: Backend,
    store: Arc<BlobStore>,
    sources: Sources,
    config: ImageConfig,
    layers: Vec<Layer>,
    known: HashMap<String, Layer>,
    identifier: Option<String>,
    found: bool,
    saved: bool,
}

impl Image {
    /// An empty image that does not exist yet
    pub fn new(name: ImageRef, backend: Backend, store: Arc<BlobStore>, os: &str, architecture: &str) -> Self {
        let sources = Sources::from_backend(&backend);
        Self {
            name,
            backend,
            store,
            sources,
            config: ImageConfig::empty(os, architecture),
            layers: Vec::new(),
            known: HashMap::new(),
            identifier: None,
            found: false,
            saved: false,
        }
    }

    /// Open `name` in `backend`; an absent image opens empty (`exists() == false`)
    pub async fn open(name: ImageRef, backend: Backend, store: Arc<BlobStore>) -> PackResult<Self> {
        let mut image = Self::new(name, backend, store, "linux", "amd64");

        let opened = match &image.backend {
            Backend::Local(runtime) => local::open(runtime, &image.name.to_string()).await?,
            Backend::Remote(client) => match client.fetch_image(&image.name).await? {
                Some(remote) => {
                    let layers = remote
                        .config
                        .rootfs
                        .diff_ids
                        .iter()
                        .zip(&remote.manifest.layers)
                        .map(|(diff_id, desc)| Layer {
                            diff_id: diff_id.clone(),
                            digest: Some(desc.digest.clone()),
                            size: u64::try_from(desc.size).ok(),
                            origin: LayerOrigin::Registry {
                                reference: image.name.clone(),
                                media_type: desc.media_type.clone(),
                            },
                        })
                        .collect();
                    Some((remote.config, remote.digest, layers))
                }
                None => None,
            },
            Backend::Layout(root) => layout::open(root)?,
        };

        if let Some((config, identifier, layers)) = opened {
            debug!("Opened {} image {} ({})", image.backend.kind(), image.name, identifier);
            image.config = config;
            image.set_layers(layers);
            image.identifier = Some(identifier);
            image.found = true;
        }
        Ok(image)
    }

    /// Open `name` and fail with `ImageNotFound` when it does not exist
    pub async fn open_existing(name: ImageRef, backend: Backend, store: Arc<BlobStore>) -> PackResult<Self> {
        let image = Self::open(name, backend, store).await?;
        if !image.found {
            return Err(PackError::ImageNotFound(image.name.to_string()));
        }
        Ok(image)
    }

    /// A new, unsaved image named `name` in `backend`, starting from `base`'s config and layers
    pub fn from_base(name: ImageRef, backend: Backend, base: &Image) -> Self {
        let mut sources = Sources::from_backend(&backend);
        sources.merge(&base.sources);
        Self {
            name,
            backend,
            store: Arc::clone(&base.store),
            sources,
            config: base.config.clone(),
            layers: base.layers.clone(),
            known: base.known.clone(),
            identifier: None,
            found: false,
            saved: false,
        }
    }

    fn set_layers(&mut self, layers: Vec<Layer>) {
        for layer in &layers {
            self.known.insert(layer.diff_id.clone(), layer.clone());
        }
        self.layers = layers;
        self.sync_rootfs();
    }

    fn sync_rootfs(&mut self) {
        self.config.rootfs.diff_ids = self.layers.iter().map(|l| l.diff_id.clone()).collect();
    }

    fn ensure_mutable(&self) -> PackResult<()> {
        if self.saved {
            Err(PackError::AlreadySaved(self.name.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn name(&self) -> &ImageRef {
        &self.name
    }

    /// Image ID (daemon) or manifest digest (registry, layout)
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.found
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn diff_ids(&self) -> Vec<String> {
        self.config.rootfs.diff_ids.clone()
    }

    pub fn top_layer(&self) -> Option<&str> {
        self.layers.last().map(|l| l.diff_id.as_str())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.config.config.labels.get(key).map(String::as_str)
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.config.config.labels
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.config.env(key)
    }

    pub fn entrypoint(&self) -> Option<&[String]> {
        self.config.config.entrypoint.as_deref()
    }

    pub fn cmd(&self) -> Option<&[String]> {
        self.config.config.cmd.as_deref()
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.config.config.working_dir.as_deref()
    }

    pub fn os(&self) -> &str {
        &self.config.os
    }

    pub fn architecture(&self) -> &str {
        &self.config.architecture
    }

    pub fn variant(&self) -> Option<&str> {
        self.config.variant.as_deref()
    }

    /// `os/arch[/variant]`
    pub fn platform(&self) -> String {
        match &self.config.variant {
            Some(variant) => format!("{}/{}/{}", self.config.os, self.config.architecture, variant),
            None => format!("{}/{}", self.config.os, self.config.architecture),
        }
    }

    pub fn created(&self) -> Option<&str> {
        self.config.created.as_deref()
    }

    /// Give the unsaved image a new name
    pub fn rename(&mut self, name: ImageRef) -> PackResult<()> {
        self.ensure_mutable()?;
        self.name = name;
        Ok(())
    }

    pub fn set_label(&mut self, key: &str, value: &str) -> PackResult<()> {
        self.ensure_mutable()?;
        self.config
            .config
            .labels
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_label(&mut self, key: &str) -> PackResult<()> {
        self.ensure_mutable()?;
        self.config.config.labels.remove(key);
        Ok(())
    }

    pub fn set_env(&mut self, key: &str, value: &str) -> PackResult<()> {
        self.ensure_mutable()?;
        self.config.set_env(key, value);
        Ok(())
    }

    pub fn set_entrypoint(&mut self, entrypoint: Vec<String>) -> PackResult<()> {
        self.ensure_mutable()?;
        self.config.config.entrypoint = Some(entrypoint);
        Ok(())
    }

    pub fn set_cmd(&mut self, cmd: Vec<String>) -> PackResult<()> {
        self.ensure_mutable()?;
        self.config.config.cmd = Some(cmd);
        Ok(())
    }

    pub fn set_working_dir(&mut self, dir: &str) -> PackResult<()> {
        self.ensure_mutable()?;
        self.config.config.working_dir = Some(dir.to_string());
        Ok(())
    }

    pub fn set_user(&mut self, user: &str) -> PackResult<()> {
        self.ensure_mutable()?;
        self.config.config.user = Some(user.to_string());
        Ok(())
    }

    pub fn set_platform(&mut self, os: &str, architecture: &str, variant: Option<&str>) -> PackResult<()> {
        self.ensure_mutable()?;
        self.config.os = os.to_string();
        self.config.architecture = architecture.to_string();
        self.config.variant = variant.map(str::to_string);
        Ok(())
    }

    pub fn set_created(&mut self, created: DateTime<Utc>) -> PackResult<()> {
        self.ensure_mutable()?;
        self.config.created = Some(created.to_rfc3339_opts(SecondsFormat::Secs, true));
        Ok(())
    }

    /// Append a layer tar (plain or gzip) from disk
    pub fn add_layer(&mut self, path: &Path) -> PackResult<BlobInfo> {
        self.add_layer_with_history(path, None)
    }

    /// Append a layer tar, recording `created_by` in the history
    pub fn add_layer_with_history(&mut self, path: &Path, created_by: Option<&str>) -> PackResult<BlobInfo> {
        self.ensure_mutable()?;
        let info = self.store.insert_tar(path)?;
        self.push_layer(&info, created_by);
        Ok(info)
    }

    /// Append a layer tar streamed from `reader`
    pub fn add_layer_reader(&mut self, reader: impl Read, created_by: Option<&str>) -> PackResult<BlobInfo> {
        self.ensure_mutable()?;
        let info = self.store.insert_reader(reader)?;
        self.push_layer(&info, created_by);
        Ok(info)
    }

    fn push_layer(&mut self, info: &BlobInfo, created_by: Option<&str>) {
        let layer = Layer {
            diff_id: info.diff_id.clone(),
            digest: Some(info.digest.clone()),
            size: Some(info.size),
            origin: LayerOrigin::Store,
        };
        self.known.insert(layer.diff_id.clone(), layer.clone());
        self.layers.push(layer);
        if !self.config.history.is_empty() || self.layers.len() == 1 {
            self.config.history.push(History {
                created_by: created_by.map(str::to_string),
                ..History::default()
            });
        }
        self.sync_rootfs();
    }

    /// Whether a layer with `diff_id` is already part of the image
    pub fn has_layer(&self, diff_id: &str) -> bool {
        self.layers.iter().any(|l| l.diff_id == diff_id)
    }

    /// Append a layer that already exists in the store or a known source
    pub fn reuse_layer(&mut self, diff_id: &str) -> PackResult<()> {
        self.ensure_mutable()?;
        let layer = match self.known.get(diff_id) {
            Some(layer) => layer.clone(),
            None => {
                let info = self
                    .store
                    .lookup(diff_id)
                    .ok_or_else(|| PackError::LayerNotFound(diff_id.to_string()))?;
                Layer {
                    diff_id: info.diff_id,
                    digest: Some(info.digest),
                    size: Some(info.size),
                    origin: LayerOrigin::Store,
                }
            }
        };
        self.known.insert(layer.diff_id.clone(), layer.clone());
        self.layers.push(layer);
        if !self.config.history.is_empty() {
            self.config.history.push(History::default());
        }
        self.sync_rootfs();
        Ok(())
    }

    /// Copy one layer of this image into the blob store
    pub async fn ensure_layer(&self, diff_id: &str) -> PackResult<BlobInfo> {
        let layer = self
            .known
            .get(diff_id)
            .cloned()
            .ok_or_else(|| PackError::LayerNotFound(diff_id.to_string()))?;
        self.materialize(&[layer]).await?;
        self.store
            .lookup(diff_id)
            .ok_or_else(|| PackError::LayerNotFound(diff_id.to_string()))
    }

    /// Uncompressed tar stream of one layer of this image
    pub async fn get_layer(&self, diff_id: &str) -> PackResult<Box<dyn Read + Send>> {
        self.ensure_layer(diff_id).await?;
        self.store.open_layer(diff_id)
    }

    /// Top layer of the run image this app image was built on, per the lifecycle label
    pub fn run_image_top_layer(&self) -> Option<String> {
        let raw = self.label(labels::LIFECYCLE_METADATA)?;
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        value["runImage"]["topLayer"].as_str().map(str::to_string)
    }

    /// Replace layers `[0..=old_top]` with the layers of `new_base`
    pub fn rebase(&mut self, old_top: &str, new_base: &Image) -> PackResult<()> {
        self.ensure_mutable()?;

        if let Some(recorded) = self.run_image_top_layer() {
            if recorded != old_top {
                return Err(PackError::RebaseMismatch {
                    expected: old_top.to_string(),
                    actual: recorded,
                });
            }
        }
        let index = self
            .layers
            .iter()
            .position(|l| l.diff_id == old_top)
            .ok_or_else(|| PackError::RebaseMismatch {
                expected: old_top.to_string(),
                actual: "no such layer in image".to_string(),
            })?;

        let app_layers = self.layers.split_off(index + 1);
        let history = if self.config.history.len() == index + 1 + app_layers.len()
            && new_base.config.history.len() == new_base.layers.len()
        {
            let mut history = new_base.config.history.clone();
            history.extend(self.config.history.split_off(index + 1));
            history
        } else {
            Vec::new()
        };

        debug!(
            "Rebasing {}: {} base layers -> {}, keeping {} app layers",
            self.name,
            index + 1,
            new_base.layers.len(),
            app_layers.len()
        );

        let mut layers = new_base.layers.clone();
        layers.extend(app_layers);
        for (diff_id, layer) in &new_base.known {
            self.known
                .entry(diff_id.clone())
                .or_insert_with(|| layer.clone());
        }
        self.sources.merge(&new_base.sources);
        self.config.history = history;
        self.config.os = new_base.config.os.clone();
        self.config.architecture = new_base.config.architecture.clone();
        self.config.variant = new_base.config.variant.clone();
        self.config.os_version = new_base.config.os_version.clone();
        self.layers = layers;
        self.sync_rootfs();
        Ok(())
    }

    /// Persist the image under its name; returns the image ID or digest
    pub async fn save(&mut self) -> PackResult<String> {
        self.save_as(&[]).await
    }

    /// Persist the image under its name plus `additional` tags
    pub async fn save_as(&mut self, additional: &[ImageRef]) -> PackResult<String> {
        self.ensure_mutable()?;
        self.sync_rootfs();

        let layers = self.layers.clone();
        self.materialize(&layers).await?;

        let config_bytes = self.config.to_bytes()?;
        let identifier = match &self.backend {
            Backend::Local(runtime) => {
                let mut tags = vec![self.name.to_string()];
                tags.extend(additional.iter().map(ImageRef::to_string));
                local::save(runtime, &self.store, config_bytes, self.layers.clone(), tags).await?
            }
            Backend::Remote(client) => {
                let mut layers = Vec::with_capacity(self.layers.len());
                for layer in &self.layers {
                    let info = self
                        .store
                        .lookup(&layer.diff_id)
                        .ok_or_else(|| PackError::LayerNotFound(layer.diff_id.clone()))?;
                    layers.push((self.store.read_compressed(&info.digest)?, LAYER_MEDIA_TYPE.to_string()));
                }
                let digest = client
                    .push_image(&self.name, layers.clone(), config_bytes.clone())
                    .await?;
                for tag in additional {
                    client
                        .push_image(tag, layers.clone(), config_bytes.clone())
                        .await?;
                }
                digest
            }
            Backend::Layout(root) => {
                let mut names: Vec<String> = self.name.tag().map(str::to_string).into_iter().collect();
                names.extend(additional.iter().filter_map(|t| t.tag().map(str::to_string)));
                layout::save(root, &self.store, &config_bytes, &self.layers, &names)?
            }
        };

        debug!("Saved {} to {} as {}", self.name, self.backend.kind(), identifier);
        self.identifier = Some(identifier.clone());
        self.found = true;
        self.saved = true;
        Ok(identifier)
    }

    /// Allow mutation again after a save
    pub fn reopen(&mut self) {
        self.saved = false;
    }

    /// Remove the image from its backend
    pub async fn delete(&mut self) -> PackResult<()> {
        match &self.backend {
            Backend::Local(runtime) => runtime.image_remove(&self.name.to_string()).await?,
            Backend::Remote(_) => {
                return Err(PackError::Unsupported("deleting images from a registry".to_string()))
            }
            Backend::Layout(root) => {
                if root.exists() {
                    std::fs::remove_dir_all(root)
                        .map_err(|e| PackError::io(format!("removing {}", root.display()), e))?;
                }
            }
        }
        self.found = false;
        self.identifier = None;
        Ok(())
    }

    /// Copy the content of `layers` into the blob store
    async fn materialize(&self, layers: &[Layer]) -> PackResult<()> {
        let mut from_daemon: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for layer in layers {
            if self.store.contains(&layer.diff_id) {
                continue;
            }
            match &layer.origin {
                LayerOrigin::Store => return Err(PackError::LayerNotFound(layer.diff_id.clone())),
                LayerOrigin::Daemon { image } => from_daemon
                    .entry(image.clone())
                    .or_default()
                    .push(layer.diff_id.clone()),
                LayerOrigin::Registry {
                    reference,
                    media_type,
                } => self.pull_layer(reference, layer, media_type).await?,
                LayerOrigin::Layout { root } => layout::materialize(&self.store, root, &[layer.clone()])?,
            }
        }

        if from_daemon.is_empty() {
            return Ok(());
        }
        let runtime = self.sources.runtime.as_ref().ok_or_else(|| {
            PackError::Internal("daemon layers requested without a container runtime".to_string())
        })?;
        for (image, diff_ids) in from_daemon {
            local::materialize(runtime, &self.store, &image, &diff_ids).await?;
        }
        Ok(())
    }

    async fn pull_layer(&self, reference: &ImageRef, layer: &Layer, media_type: &str) -> PackResult<()> {
        let client = self.sources.registry.as_ref().ok_or_else(|| {
            PackError::Internal("registry layers requested without a registry client".to_string())
        })?;
        let digest = layer
            .digest
            .clone()
            .ok_or_else(|| PackError::LayerNotFound(layer.diff_id.clone()))?;

        let temp = TempDir::new().map_err(|e| PackError::io("creating temp dir", e))?;
        let path = temp.path().join("blob");
        let location = BlobLocation {
            digest: digest.clone(),
            size: layer.size.unwrap_or_default(),
            media_type: media_type.to_string(),
        };
        client.pull_blob_to(reference, &location, &path).await?;

        let info = if media_type.ends_with("gzip") {
            self.store.insert_compressed(&path, Some(&digest))?
        } else if media_type.ends_with(".tar") || media_type.ends_with("tar") {
            let file = std::fs::File::open(&path)
                .map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
            let (actual, _) = blob::sha256_reader(&mut std::io::BufReader::new(file))
                .map_err(|e| PackError::io(format!("hashing {}", path.display()), e))?;
            if actual != digest {
                return Err(PackError::BlobCorrupt {
                    expected: digest,
                    actual,
                });
            }
            self.store.insert_tar(&path)?
        } else {
            return Err(PackError::Unsupported(format!("layer media type {}", media_type)));
        };

        if info.diff_id != layer.diff_id {
            return Err(PackError::BlobCorrupt {
                expected: layer.diff_id.clone(),
                actual: info.diff_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::LayerWriter;
    use crate::orchestration::testing::FakeRuntime;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn layer_tar(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        writer.add_file(&format!("/files/{}", name), contents, 0o644).unwrap();
        let path = dir.join(format!("{}.tar", name));
        std::fs::write(&path, writer.finish().unwrap()).unwrap();
        path
    }

    fn setup() -> (TempDir, Arc<BlobStore>, Arc<FakeRuntime>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BlobStore::open(dir.path().join("store")).unwrap());
        (dir, store, Arc::new(FakeRuntime::new()))
    }

    fn local(runtime: &Arc<FakeRuntime>) -> Backend {
        let runtime: Arc<dyn ContainerRuntime> = runtime.clone();
        Backend::Local(runtime)
    }

    #[tokio::test]
    async fn missing_image_opens_empty() {
        let (_dir, store, runtime) = setup();
        let image = Image::open(ImageRef::parse("app").unwrap(), local(&runtime), store)
            .await
            .unwrap();
        assert!(!image.exists());
        assert!(image.layers().is_empty());
        assert_eq!(image.platform(), "linux/amd64");
    }

    #[tokio::test]
    async fn local_save_round_trips_in_order() {
        let (dir, store, runtime) = setup();
        let name = ImageRef::parse("local/hello:1").unwrap();
        let mut image = Image::new(name.clone(), local(&runtime), Arc::clone(&store), "linux", "amd64");

        let first = image.add_layer(&layer_tar(dir.path(), "a", b"a")).unwrap();
        let second = image.add_layer(&layer_tar(dir.path(), "b", b"b")).unwrap();
        image.set_label("io.buildpacks.stack.id", "stack").unwrap();
        image.set_created(Utc.timestamp_opt(1_700_000_000, 0).unwrap()).unwrap();
        let id = image.save().await.unwrap();

        let reopened = Image::open(name, local(&runtime), store).await.unwrap();
        assert!(reopened.exists());
        assert_eq!(reopened.identifier(), Some(id.as_str()));
        assert_eq!(reopened.diff_ids(), vec![first.diff_id, second.diff_id]);
        assert_eq!(reopened.label("io.buildpacks.stack.id"), Some("stack"));
        assert_eq!(reopened.created(), Some("2023-11-14T22:13:20Z"));
    }

    #[tokio::test]
    async fn saved_images_are_frozen_until_reopened() {
        let (dir, store, runtime) = setup();
        let mut image = Image::new(ImageRef::parse("x").unwrap(), local(&runtime), store, "linux", "amd64");
        image.add_layer(&layer_tar(dir.path(), "a", b"a")).unwrap();
        image.save().await.unwrap();

        assert!(matches!(image.set_label("k", "v"), Err(PackError::AlreadySaved(_))));
        assert!(matches!(image.save().await, Err(PackError::AlreadySaved(_))));
        image.reopen();
        image.set_label("k", "v").unwrap();
    }

    #[tokio::test]
    async fn daemon_layers_materialize_lazily() {
        let (dir, store, runtime) = setup();
        let name = ImageRef::parse("base:1").unwrap();
        let mut base = Image::new(name.clone(), local(&runtime), Arc::clone(&store), "linux", "amd64");
        let info = base.add_layer(&layer_tar(dir.path(), "base", b"base")).unwrap();
        base.save().await.unwrap();

        // A fresh store has none of the content; it must come back out of the daemon.
        let fresh = Arc::new(BlobStore::open(dir.path().join("fresh")).unwrap());
        let reopened = Image::open(name, local(&runtime), Arc::clone(&fresh)).await.unwrap();
        let mut contents = Vec::new();
        reopened
            .get_layer(&info.diff_id)
            .await
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(crate::image::blob::sha256_digest(&contents), info.diff_id);
        assert!(fresh.contains(&info.diff_id));
    }

    #[tokio::test]
    async fn rebase_swaps_base_layers() {
        let (dir, store, runtime) = setup();
        let backend = local(&runtime);
        let mut old_base = Image::new(ImageRef::parse("run:old").unwrap(), backend.clone(), Arc::clone(&store), "linux", "amd64");
        let old_top = old_base.add_layer(&layer_tar(dir.path(), "old", b"old")).unwrap();

        let mut app = Image::from_base(ImageRef::parse("app").unwrap(), backend.clone(), &old_base);
        let app_layer = app.add_layer(&layer_tar(dir.path(), "app", b"app")).unwrap();
        app.set_label(
            labels::LIFECYCLE_METADATA,
            &format!(r#"{{"runImage":{{"topLayer":"{}"}}}}"#, old_top.diff_id),
        )
        .unwrap();

        let mut new_base = Image::new(ImageRef::parse("run:new").unwrap(), backend, Arc::clone(&store), "linux", "arm64");
        let n1 = new_base.add_layer(&layer_tar(dir.path(), "n1", b"n1")).unwrap();
        let n2 = new_base.add_layer(&layer_tar(dir.path(), "n2", b"n2")).unwrap();

        app.rebase(&old_top.diff_id, &new_base).unwrap();
        assert_eq!(app.diff_ids(), vec![n1.diff_id, n2.diff_id.clone(), app_layer.diff_id]);
        assert_eq!(app.architecture(), "arm64");

        let err = app.rebase(&n2.diff_id, &new_base).unwrap_err();
        assert!(matches!(err, PackError::RebaseMismatch { .. }));
    }

    #[tokio::test]
    async fn reuse_requires_known_layer() {
        let (dir, store, runtime) = setup();
        let mut image = Image::new(ImageRef::parse("x").unwrap(), local(&runtime), Arc::clone(&store), "linux", "amd64");
        assert!(matches!(
            image.reuse_layer("sha256:missing"),
            Err(PackError::LayerNotFound(_))
        ));

        let info = store.insert_tar(&layer_tar(dir.path(), "cached", b"c")).unwrap();
        image.reuse_layer(&info.diff_id).unwrap();
        assert_eq!(image.top_layer(), Some(info.diff_id.as_str()));
    }

    #[tokio::test]
    async fn layout_backend_round_trip() {
        let (dir, store, _runtime) = setup();
        let root = dir.path().join("layout");
        let name = ImageRef::parse("app:v1").unwrap();
        let mut image = Image::new(name.clone(), Backend::Layout(root.clone()), Arc::clone(&store), "linux", "amd64");
        let info = image.add_layer(&layer_tar(dir.path(), "a", b"a")).unwrap();
        let digest = image.save().await.unwrap();

        let reopened = Image::open(name, Backend::Layout(root.clone()), store).await.unwrap();
        assert_eq!(reopened.identifier(), Some(digest.as_str()));
        assert_eq!(reopened.diff_ids(), vec![info.diff_id]);

        let mut reopened = reopened;
        reopened.delete().await.unwrap();
        assert!(!root.exists());
    }
}
