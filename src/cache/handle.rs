//! Cache handles backing the build and launch caches
//!
//! Volumes are named after the app image so repeated builds of the same
//! image find their cache again: `pack-<purpose>-<hash>`, where `hash` is
//! the first 12 hex characters of sha256 over the normalized reference.

use crate::cache::options::{CacheFormat, CacheInfo, CacheKind};
use crate::error::{PackError, PackResult};
use crate::image::ImageRef;
use crate::orchestration::{ContainerRuntime, Mount};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Volume label keys
pub mod labels {
    /// Marks a volume as created by pack
    pub const PACK_VOLUME: &str = "io.buildpacks.pack.volume";
    /// Purpose (`build`, `launch`, `layers`, `app`)
    pub const PURPOSE: &str = "io.buildpacks.pack.volume.purpose";
    /// App image the volume belongs to
    pub const IMAGE: &str = "io.buildpacks.pack.volume.image";
    /// Creation timestamp (RFC3339)
    pub const CREATED_AT: &str = "io.buildpacks.pack.volume.created_at";
}

/// `pack-<purpose>-<sha256(reference)[..12]>`
pub fn volume_name(purpose: &str, image: &ImageRef) -> String {
    let digest = hex::encode(Sha256::digest(image.to_string().as_bytes()));
    format!("pack-{}-{}", purpose, &digest[..12])
}

/// Labels attached to every volume pack creates
pub fn volume_labels(purpose: &str, image: &ImageRef) -> HashMap<String, String> {
    HashMap::from([
        (labels::PACK_VOLUME.to_string(), "true".to_string()),
        (labels::PURPOSE.to_string(), purpose.to_string()),
        (labels::IMAGE.to_string(), image.to_string()),
        (labels::CREATED_AT.to_string(), Utc::now().to_rfc3339()),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHandle {
    /// Named volume in the container runtime
    Volume { name: String, purpose: String, image: ImageRef },
    /// Host directory
    Bind { path: PathBuf },
    /// Registry image, written by the exporter
    Image { reference: ImageRef },
}

impl CacheHandle {
    /// Resolve the handle for one cache of the build of `image`
    pub fn resolve(kind: CacheKind, info: &CacheInfo, image: &ImageRef) -> PackResult<Self> {
        match info.format {
            CacheFormat::Volume => {
                let name = if info.source.is_empty() {
                    volume_name(kind.as_str(), image)
                } else {
                    info.source.clone()
                };
                Ok(Self::Volume {
                    name,
                    purpose: kind.as_str().to_string(),
                    image: image.clone(),
                })
            }
            CacheFormat::Bind => Ok(Self::Bind {
                path: PathBuf::from(&info.source),
            }),
            CacheFormat::Image => {
                if kind == CacheKind::Launch {
                    return Err(PackError::invalid("image format is only supported for the build cache"));
                }
                Ok(Self::Image {
                    reference: ImageRef::parse(&info.source)?,
                })
            }
        }
    }

    /// Short description, e.g. `volume`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Volume { .. } => "volume",
            Self::Bind { .. } => "bind",
            Self::Image { .. } => "image",
        }
    }

    /// Volume name, bind path or image reference
    pub fn name(&self) -> String {
        match self {
            Self::Volume { name, .. } => name.clone(),
            Self::Bind { path } => path.display().to_string(),
            Self::Image { reference } => reference.to_string(),
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }

    /// Mount at `target`; images are not mounted
    pub fn mount(&self, target: &str) -> Option<Mount> {
        match self {
            Self::Volume { name, .. } => Some(Mount::volume(name.clone(), target)),
            Self::Bind { path } => Some(Mount::bind(path.clone(), target)),
            Self::Image { .. } => None,
        }
    }

    /// Make sure the backing storage exists
    pub async fn ensure(&self, runtime: &dyn ContainerRuntime) -> PackResult<()> {
        match self {
            Self::Volume { name, purpose, image } => {
                if !runtime.volume_exists(name).await? {
                    debug!("Creating cache volume {}", name);
                    runtime.volume_create(name, &volume_labels(purpose, image)).await?;
                }
                Ok(())
            }
            Self::Bind { path } => tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| PackError::io(format!("creating cache directory {}", path.display()), e)),
            Self::Image { .. } => Ok(()),
        }
    }

    /// Delete cached content; missing storage is not an error
    pub async fn clear(&self, runtime: &dyn ContainerRuntime) -> PackResult<()> {
        match self {
            Self::Volume { name, .. } => runtime.volume_remove(name).await,
            Self::Bind { path } => match tokio::fs::remove_dir_all(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(PackError::io(format!("clearing cache directory {}", path.display()), e)),
            },
            Self::Image { reference } => runtime.image_remove(&reference.to_string()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::testing::FakeRuntime;
    use tempfile::TempDir;

    fn image(s: &str) -> ImageRef {
        ImageRef::parse(s).unwrap()
    }

    #[test]
    fn volume_names_follow_normalized_reference() {
        let a = volume_name("build", &image("my/repo"));
        let b = volume_name("build", &image("index.docker.io/my/repo:latest"));
        let c = volume_name("build", &image("my/repo:other"));
        let d = volume_name("build", &image("registry.example.com/my/repo"));

        assert!(a.starts_with("pack-build-"));
        assert_eq!(a.len(), "pack-build-".len() + 12);
        // implied registry and tag resolve to the same volume
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(
            volume_name("launch", &image("my/repo"))["pack-launch-".len()..],
            a["pack-build-".len()..]
        );
    }

    #[test]
    fn named_volume_is_kept() {
        let info = CacheInfo {
            format: CacheFormat::Volume,
            source: "test-volume-name".into(),
        };
        let handle = CacheHandle::resolve(CacheKind::Build, &info, &image("my/repo")).unwrap();
        assert_eq!(handle.name(), "test-volume-name");
        assert_eq!(handle.kind(), "volume");
    }

    #[tokio::test]
    async fn volume_lifecycle() {
        let runtime = FakeRuntime::new();
        let handle = CacheHandle::resolve(CacheKind::Build, &CacheInfo::default(), &image("app")).unwrap();

        handle.ensure(&runtime).await.unwrap();
        assert!(runtime.volume_exists(&handle.name()).await.unwrap());
        handle.clear(&runtime).await.unwrap();
        assert!(!runtime.volume_exists(&handle.name()).await.unwrap());
        // clearing twice is fine
        handle.clear(&runtime).await.unwrap();
    }

    #[tokio::test]
    async fn bind_cache_created_and_cleared() {
        let tmp = TempDir::new().unwrap();
        let info = CacheInfo {
            format: CacheFormat::Bind,
            source: tmp.path().join("c/build-cache").display().to_string(),
        };
        let handle = CacheHandle::resolve(CacheKind::Build, &info, &image("app")).unwrap();
        let runtime = FakeRuntime::new();

        handle.ensure(&runtime).await.unwrap();
        assert!(tmp.path().join("c/build-cache").is_dir());
        assert!(matches!(handle.mount("/cache"), Some(Mount::Bind { .. })));
        handle.clear(&runtime).await.unwrap();
        assert!(!tmp.path().join("c/build-cache").exists());
    }

    #[test]
    fn image_cache_is_not_mounted() {
        let info = CacheInfo {
            format: CacheFormat::Image,
            source: "registry.example.com/app-cache".into(),
        };
        let handle = CacheHandle::resolve(CacheKind::Build, &info, &image("app")).unwrap();
        assert!(handle.is_image());
        assert!(handle.mount("/cache").is_none());
        assert!(CacheHandle::resolve(CacheKind::Launch, &info, &image("app")).is_err());
    }
}
