//! Fetch builder, run, lifecycle and package images honouring the pull policy

use crate::error::{PackError, PackResult};
use crate::image::pull_policy::{PullPolicy, PullState};
use crate::image::{Backend, BlobStore, Image, ImageRef, RegistryClient};
use crate::orchestration::ContainerRuntime;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// How a single image should be fetched
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Fetch into (and open from) the daemon; otherwise read the registry directly
    pub daemon: bool,
    pub pull_policy: PullPolicy,
    /// `os/arch[/variant]` to request when pulling
    pub platform: Option<String>,
}

impl FetchOptions {
    pub fn daemon(pull_policy: PullPolicy) -> Self {
        Self {
            daemon: true,
            pull_policy,
            platform: None,
        }
    }

    pub fn registry() -> Self {
        Self::default()
    }

    pub fn with_platform(mut self, platform: Option<String>) -> Self {
        self.platform = platform;
        self
    }
}

/// Opens images from the daemon or registry, pulling as the policy requires
pub struct Fetcher {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<RegistryClient>,
    store: Arc<BlobStore>,
    state_path: PathBuf,
    state_lock: Mutex<()>,
}

impl Fetcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<RegistryClient>,
        store: Arc<BlobStore>,
        state_path: PathBuf,
    ) -> Self {
        Self {
            runtime,
            registry,
            store,
            state_path,
            state_lock: Mutex::new(()),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn registry(&self) -> &Arc<RegistryClient> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }

    pub fn local_backend(&self) -> Backend {
        Backend::Local(Arc::clone(&self.runtime))
    }

    pub fn remote_backend(&self) -> Backend {
        Backend::Remote(Arc::clone(&self.registry))
    }

    /// Open `name`, failing with `ImageNotFound` if it cannot be found under the policy
    pub async fn fetch(&self, name: &str, options: &FetchOptions) -> PackResult<Image> {
        let reference = ImageRef::parse(name)?;
        if !options.daemon {
            debug!("Reading {} from registry", reference);
            return Image::open_existing(reference, self.remote_backend(), Arc::clone(&self.store)).await;
        }

        let local = Image::open(reference.clone(), self.local_backend(), Arc::clone(&self.store)).await?;
        let now = Utc::now();
        let last_pull = match local.identifier() {
            Some(id) => self.load_state().await?.last_pull(id),
            None => None,
        };

        if !options
            .pull_policy
            .needs_pull(local.exists(), last_pull, now)
        {
            if local.exists() {
                debug!("Using local {} (pull policy {})", reference, options.pull_policy);
                return Ok(local);
            }
            return Err(PackError::ImageNotFound(format!(
                "{} (not present locally and pull policy is {})",
                reference, options.pull_policy
            )));
        }

        info!("Pulling image {}", reference);
        self.runtime
            .image_pull(&reference.to_string(), options.platform.as_deref())
            .await?;

        let pulled = Image::open_existing(reference, self.local_backend(), Arc::clone(&self.store)).await?;
        if let Some(id) = pulled.identifier() {
            self.record_pull(id, &options.pull_policy).await?;
        }
        Ok(pulled)
    }

    /// Whether `name` exists in the daemon (`daemon`) or the registry
    pub async fn exists(&self, name: &str, daemon: bool) -> PackResult<bool> {
        let reference = ImageRef::parse(name)?;
        if daemon {
            Ok(self
                .runtime
                .image_inspect(&reference.to_string())
                .await?
                .is_some())
        } else {
            Ok(self.registry.manifest_digest(&reference).await?.is_some())
        }
    }

    async fn load_state(&self) -> PackResult<PullState> {
        let _guard = self.state_lock.lock().await;
        PullState::load(&self.state_path)
    }

    async fn record_pull(&self, image_id: &str, policy: &PullPolicy) -> PackResult<()> {
        if !matches!(policy, PullPolicy::Interval(_)) {
            return Ok(());
        }
        let _guard = self.state_lock.lock().await;
        let now = Utc::now();
        let mut state = PullState::load(&self.state_path)?;
        state.record_pull(image_id, policy, now);
        state.prune(now)?;
        state.save(&self.state_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creds::Keychain;
    use crate::orchestration::testing::FakeRuntime;
    use tempfile::TempDir;

    fn fetcher(runtime: Arc<FakeRuntime>, dir: &TempDir) -> Fetcher {
        let store = Arc::new(BlobStore::open(dir.path().join("blobs")).unwrap());
        let registry = Arc::new(RegistryClient::new(Arc::new(Keychain::new())));
        Fetcher::new(runtime, registry, store, dir.path().join("image.json"))
    }

    fn builder_inspect() -> crate::orchestration::ImageInspect {
        FakeRuntime::inspect_with_labels("sha256:builder", &[("io.buildpacks.stack.id", "io.buildpacks.stacks.jammy")])
    }

    #[tokio::test]
    async fn never_uses_local_image_only() {
        let dir = TempDir::new().unwrap();
        let name = ImageRef::parse("cnbs/builder").unwrap().to_string();
        let runtime = Arc::new(FakeRuntime::new().with_image(&name, builder_inspect()));
        let fetcher = fetcher(Arc::clone(&runtime), &dir);

        let image = fetcher
            .fetch("cnbs/builder", &FetchOptions::daemon(PullPolicy::Never))
            .await
            .unwrap();
        assert_eq!(image.label("io.buildpacks.stack.id"), Some("io.buildpacks.stacks.jammy"));
        assert!(runtime.lock().pulls.is_empty());

        let err = fetcher
            .fetch("cnbs/other", &FetchOptions::daemon(PullPolicy::Never))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PackError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn always_pulls() {
        let dir = TempDir::new().unwrap();
        let name = ImageRef::parse("cnbs/builder").unwrap().to_string();
        let runtime = Arc::new(FakeRuntime::new().with_remote_image(&name, builder_inspect()));
        let fetcher = fetcher(Arc::clone(&runtime), &dir);

        let image = fetcher
            .fetch("cnbs/builder", &FetchOptions::daemon(PullPolicy::Always))
            .await
            .unwrap();
        assert!(image.exists());
        assert_eq!(runtime.lock().pulls, vec![name]);
    }

    #[tokio::test]
    async fn interval_records_pull_time() {
        let dir = TempDir::new().unwrap();
        let name = ImageRef::parse("cnbs/builder").unwrap().to_string();
        let runtime = Arc::new(FakeRuntime::new().with_remote_image(&name, builder_inspect()));
        let fetcher = fetcher(Arc::clone(&runtime), &dir);
        let policy: PullPolicy = "hourly".parse().unwrap();

        fetcher
            .fetch("cnbs/builder", &FetchOptions::daemon(policy))
            .await
            .unwrap();
        fetcher
            .fetch("cnbs/builder", &FetchOptions::daemon(policy))
            .await
            .unwrap();

        // Second fetch is within the interval and served locally.
        assert_eq!(runtime.lock().pulls.len(), 1);
        let state = PullState::load(&dir.path().join("image.json")).unwrap();
        assert!(state.last_pull("sha256:builder").is_some());
        assert_eq!(state.interval.pulling_interval, "hourly");
    }

    #[tokio::test]
    async fn if_not_present_pulls_missing_images() {
        let dir = TempDir::new().unwrap();
        let name = ImageRef::parse("cnbs/run").unwrap().to_string();
        let runtime = Arc::new(FakeRuntime::new().with_remote_image(&name, builder_inspect()));
        let fetcher = fetcher(Arc::clone(&runtime), &dir);

        let options = FetchOptions::daemon(PullPolicy::IfNotPresent);
        fetcher.fetch("cnbs/run", &options).await.unwrap();
        fetcher.fetch("cnbs/run", &options).await.unwrap();
        assert_eq!(runtime.lock().pulls.len(), 1);
        assert!(fetcher.exists("cnbs/run", true).await.unwrap());
    }
}
