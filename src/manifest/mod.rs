//! Manifest lists (multi-platform image indexes)
//!
//! Lists are edited locally with `create`, `add`, `annotate` and `rm`, then
//! published with `push`. Child images are always read from a registry: an
//! index can only reference manifests a registry already holds.

pub mod index;

pub use index::{ImageIndex, IndexEntry, IndexFormat, IndexStore, Platform};

use crate::client::Client;
use crate::error::{PackError, PackResult};
use crate::image::remote::{DOCKER_LIST_MEDIA_TYPE, INDEX_MEDIA_TYPE, MANIFEST_MEDIA_TYPE};
use crate::image::{ImageRef, RegistryClient};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Where child manifests are read from and indexes pushed to
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Describe the image `reference` points at as an index entry
    async fn describe(&self, reference: &ImageRef) -> PackResult<IndexEntry>;

    /// The index `reference` points at; `None` when absent
    async fn fetch_index(&self, reference: &ImageRef) -> PackResult<Option<ImageIndex>>;

    /// Push `index`; returns its digest or location
    async fn push(&self, reference: &ImageRef, index: &ImageIndex) -> PackResult<String>;
}

fn media_type_of(bytes: &[u8]) -> PackResult<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    Ok(value
        .get("mediaType")
        .and_then(|m| m.as_str())
        .unwrap_or(MANIFEST_MEDIA_TYPE)
        .to_string())
}

fn is_index(media_type: &str) -> bool {
    media_type == INDEX_MEDIA_TYPE || media_type == DOCKER_LIST_MEDIA_TYPE
}

#[async_trait]
impl ManifestSource for RegistryClient {
    async fn describe(&self, reference: &ImageRef) -> PackResult<IndexEntry> {
        let (bytes, digest) = self
            .fetch_raw_manifest(reference)
            .await?
            .ok_or_else(|| PackError::ImageNotFound(reference.to_string()))?;
        let media_type = media_type_of(&bytes)?;
        if is_index(&media_type) {
            return Err(PackError::invalid(format!(
                "{} is a manifest list; add its platform images instead",
                reference
            )));
        }
        let image = self
            .fetch_image(reference)
            .await?
            .ok_or_else(|| PackError::ImageNotFound(reference.to_string()))?;
        Ok(IndexEntry {
            media_type,
            digest,
            size: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
            platform: Some(Platform {
                os: image.config.os,
                architecture: image.config.architecture,
                variant: image.config.variant,
                os_version: image.config.os_version,
                ..Default::default()
            }),
            annotations: BTreeMap::new(),
        })
    }

    async fn fetch_index(&self, reference: &ImageRef) -> PackResult<Option<ImageIndex>> {
        let Some((bytes, _)) = self.fetch_raw_manifest(reference).await? else {
            return Ok(None);
        };
        if !is_index(&media_type_of(&bytes)?) {
            return Err(PackError::invalid(format!("{} is an image, not a manifest list", reference)));
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn push(&self, reference: &ImageRef, index: &ImageIndex) -> PackResult<String> {
        self.push_index(reference, serde_json::to_value(index)?).await
    }
}

/// Platform overrides and annotations for one entry
#[derive(Debug, Clone, Default)]
pub struct AnnotateOptions {
    pub os: Option<String>,
    pub architecture: Option<String>,
    pub variant: Option<String>,
    pub annotations: BTreeMap<String, String>,
}

/// Manifest list operations over a local store and a registry
pub struct ManifestManager {
    store: IndexStore,
    source: Arc<dyn ManifestSource>,
}

impl ManifestManager {
    pub fn new(store: IndexStore, source: Arc<dyn ManifestSource>) -> Self {
        Self { store, source }
    }

    /// Create a local list from `images`; with `publish` push it right away
    pub async fn create(
        &self,
        name: &str,
        images: &[String],
        format: IndexFormat,
        publish: bool,
    ) -> PackResult<ImageRef> {
        let name = ImageRef::parse(name)?;
        if self.store.exists(&name) {
            return Err(PackError::invalid(format!(
                "manifest list {} already exists; use `pack manifest add` to extend it",
                name
            )));
        }
        let references = images
            .iter()
            .map(|i| ImageRef::parse(i))
            .collect::<PackResult<Vec<_>>>()?;
        let entries = try_join_all(references.iter().map(|r| self.source.describe(r))).await?;

        let mut index = ImageIndex::new(format);
        for entry in entries {
            index.upsert(entry);
        }
        self.store.save(&name, &index)?;
        info!("Created manifest list {} with {} images", name, index.manifests.len());

        if publish {
            self.push(&name.to_string(), true).await?;
        }
        Ok(name)
    }

    /// Add `image` to the list, replacing an entry with the same digest
    pub async fn add(&self, name: &str, image: &str) -> PackResult<()> {
        let name = ImageRef::parse(name)?;
        let mut index = self.store.load(&name)?;
        let entry = self.source.describe(&ImageRef::parse(image)?).await?;
        debug!("Adding {} ({}) to {}", image, entry.digest, name);
        index.upsert(entry);
        self.store.save(&name, &index)?;
        info!("Added {} to manifest list {}", image, name);
        Ok(())
    }

    /// Override the platform and annotations of `image`'s entry
    pub async fn annotate(&self, name: &str, image: &str, opts: &AnnotateOptions) -> PackResult<()> {
        let name = ImageRef::parse(name)?;
        let mut index = self.store.load(&name)?;
        let digest = self.digest_of(image).await?;
        let entry = index
            .find_mut(&digest)
            .ok_or_else(|| PackError::ImageNotFound(format!("{} in manifest list {}", image, name)))?;

        let platform = entry.platform.get_or_insert_with(Platform::default);
        if let Some(os) = &opts.os {
            platform.os = os.clone();
        }
        if let Some(arch) = &opts.architecture {
            platform.architecture = arch.clone();
        }
        if let Some(variant) = &opts.variant {
            platform.variant = Some(variant.clone()).filter(|v| !v.is_empty());
        }
        entry
            .annotations
            .extend(opts.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.store.save(&name, &index)
    }

    /// Remove `images` from the list
    pub async fn remove_images(&self, name: &str, images: &[String]) -> PackResult<()> {
        let name = ImageRef::parse(name)?;
        let mut index = self.store.load(&name)?;
        for image in images {
            let digest = self.digest_of(image).await?;
            if !index.remove(&digest) {
                return Err(PackError::ImageNotFound(format!("{} in manifest list {}", image, name)));
            }
        }
        self.store.save(&name, &index)
    }

    /// Delete local lists
    pub fn delete(&self, names: &[String]) -> PackResult<()> {
        for name in names {
            self.store.delete(&ImageRef::parse(name)?)?;
            info!("Deleted manifest list {}", name);
        }
        Ok(())
    }

    /// Push the list; `purge` deletes the local copy afterwards
    pub async fn push(&self, name: &str, purge: bool) -> PackResult<String> {
        let name = ImageRef::parse(name)?;
        let index = self.store.load(&name)?;
        if index.manifests.is_empty() {
            return Err(PackError::invalid(format!("manifest list {} has no images", name)));
        }
        let pushed = self.source.push(&name, &index).await?;
        info!("Pushed manifest list {}", name);
        if purge {
            self.store.delete(&name)?;
        }
        Ok(pushed)
    }

    /// The local list, else the one in the registry
    pub async fn inspect(&self, name: &str) -> PackResult<ImageIndex> {
        let name = ImageRef::parse(name)?;
        if self.store.exists(&name) {
            return self.store.load(&name);
        }
        self.source
            .fetch_index(&name)
            .await?
            .ok_or_else(|| PackError::ImageNotFound(name.to_string()))
    }

    /// Whether a local list called `name` exists
    pub fn exists(&self, name: &str) -> PackResult<bool> {
        Ok(self.store.exists(&ImageRef::parse(name)?))
    }

    async fn digest_of(&self, image: &str) -> PackResult<String> {
        let reference = ImageRef::parse(image)?;
        match reference.digest() {
            Some(digest) => Ok(digest.to_string()),
            None => Ok(self.source.describe(&reference).await?.digest),
        }
    }
}

impl Client {
    /// Manifest list operations backed by `$PACK_HOME/manifests` and the registry
    pub fn manifests(&self) -> ManifestManager {
        let source: Arc<dyn ManifestSource> = Arc::clone(self.fetcher().registry()) as Arc<dyn ManifestSource>;
        ManifestManager::new(IndexStore::new(self.paths().manifests_dir()), source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Registry stand-in keyed by the reference string
    #[derive(Default)]
    struct FakeSource {
        images: BTreeMap<String, IndexEntry>,
        pushed: Mutex<Vec<(String, ImageIndex)>>,
    }

    impl FakeSource {
        fn with(mut self, reference: &str, digest: &str, arch: &str) -> Self {
            self.images.insert(
                ImageRef::parse(reference).unwrap().to_string(),
                IndexEntry {
                    media_type: MANIFEST_MEDIA_TYPE.to_string(),
                    digest: digest.to_string(),
                    size: 512,
                    platform: Some(Platform {
                        os: "linux".into(),
                        architecture: arch.into(),
                        ..Default::default()
                    }),
                    annotations: BTreeMap::new(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl ManifestSource for FakeSource {
        async fn describe(&self, reference: &ImageRef) -> PackResult<IndexEntry> {
            self.images
                .get(&reference.to_string())
                .cloned()
                .ok_or_else(|| PackError::ImageNotFound(reference.to_string()))
        }

        async fn fetch_index(&self, reference: &ImageRef) -> PackResult<Option<ImageIndex>> {
            Ok(self
                .pushed
                .lock()
                .unwrap()
                .iter()
                .find(|(name, _)| *name == reference.to_string())
                .map(|(_, index)| index.clone()))
        }

        async fn push(&self, reference: &ImageRef, index: &ImageIndex) -> PackResult<String> {
            self.pushed
                .lock()
                .unwrap()
                .push((reference.to_string(), index.clone()));
            Ok("sha256:index".to_string())
        }
    }

    fn manager(temp: &TempDir) -> (ManifestManager, Arc<FakeSource>) {
        let source = Arc::new(
            FakeSource::default()
                .with("a/app:amd64", "sha256:amd", "amd64")
                .with("a/app:arm64", "sha256:arm", "arm64")
                .with("a/app:ppc", "sha256:ppc", "ppc64le"),
        );
        let manager = ManifestManager::new(IndexStore::new(temp.path().join("manifests")), source.clone());
        (manager, source)
    }

    fn images(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn create_then_push_references_every_child() {
        let temp = TempDir::new().unwrap();
        let (manager, source) = manager(&temp);

        manager
            .create("idx/app:multi", &images(&["a/app:amd64", "a/app:arm64"]), IndexFormat::Oci, false)
            .await
            .unwrap();
        assert!(manager.exists("idx/app:multi").unwrap());

        let digest = manager.push("idx/app:multi", false).await.unwrap();
        assert_eq!(digest, "sha256:index");
        let pushed = source.pushed.lock().unwrap();
        let (name, index) = &pushed[0];
        assert_eq!(name, "docker.io/idx/app:multi");
        let platforms: Vec<String> = index
            .manifests
            .iter()
            .map(|m| format!("{}@{}", m.platform.as_ref().unwrap(), m.digest))
            .collect();
        assert_eq!(platforms, ["linux/amd64@sha256:amd", "linux/arm64@sha256:arm"]);
    }

    #[tokio::test]
    async fn create_refuses_existing_list() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);
        manager
            .create("idx/app:multi", &images(&["a/app:amd64"]), IndexFormat::Oci, false)
            .await
            .unwrap();
        assert!(manager
            .create("idx/app:multi", &images(&["a/app:arm64"]), IndexFormat::Oci, false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn add_annotate_and_remove() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);
        manager
            .create("idx/app:multi", &images(&["a/app:amd64"]), IndexFormat::Docker, false)
            .await
            .unwrap();
        manager.add("idx/app:multi", "a/app:arm64").await.unwrap();

        let opts = AnnotateOptions {
            variant: Some("v8".into()),
            annotations: BTreeMap::from([("org.example.team".to_string(), "web".to_string())]),
            ..Default::default()
        };
        manager.annotate("idx/app:multi", "a/app:arm64", &opts).await.unwrap();

        let index = manager.inspect("idx/app:multi").await.unwrap();
        assert_eq!(index.media_type, DOCKER_LIST_MEDIA_TYPE);
        let arm = &index.manifests[1];
        assert_eq!(arm.platform.as_ref().unwrap().to_string(), "linux/arm64/v8");
        assert_eq!(arm.annotations["org.example.team"], "web");

        manager
            .remove_images("idx/app:multi", &images(&["a/app:amd64"]))
            .await
            .unwrap();
        let index = manager.inspect("idx/app:multi").await.unwrap();
        assert_eq!(index.manifests.len(), 1);
        assert!(manager
            .remove_images("idx/app:multi", &images(&["a/app:ppc"]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn push_with_purge_deletes_local_copy() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);
        manager
            .create("idx/app:multi", &images(&["a/app:amd64"]), IndexFormat::Oci, true)
            .await
            .unwrap();
        assert!(!manager.exists("idx/app:multi").unwrap());
        // falls through to the registry copy
        let index = manager.inspect("idx/app:multi").await.unwrap();
        assert_eq!(index.manifests[0].digest, "sha256:amd");
    }

    #[tokio::test]
    async fn missing_children_and_lists_are_not_found() {
        let temp = TempDir::new().unwrap();
        let (manager, _) = manager(&temp);
        assert!(matches!(
            manager
                .create("idx/app:multi", &images(&["a/app:missing"]), IndexFormat::Oci, false)
                .await,
            Err(PackError::ImageNotFound(_))
        ));
        assert!(matches!(manager.inspect("idx/none").await, Err(PackError::ImageNotFound(_))));
        assert!(manager.delete(&images(&["idx/none"])).is_err());
    }
}
