//! The library entry point
//!
//! A [`Client`] owns the shared pieces every operation needs: the container
//! runtime, the registry keychain, the image fetcher with its blob store,
//! the buildpack downloader and the per-image build locks. Operations live
//! next to their modules (`build`, `builder`, `package`, `rebase`,
//! `inspect`, `manifest`) as `impl Client` blocks.

use crate::buildpack::registry::{IndexKind, RegistryIndex};
use crate::buildpack::{Downloader, ModuleResolver};
use crate::config::{Config, ConfigManager};
use crate::creds::Keychain;
use crate::error::{PackError, PackResult};
use crate::image::{BlobStore, FetchOptions, Fetcher, PullPolicy, RegistryClient};
use crate::lifecycle::{BuildObserver, Interrupt, KeyedLock, LockMode, LogObserver};
use crate::orchestration::{create_runtime, ContainerRuntime};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub struct Client {
    config: Config,
    home: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
    keychain: Arc<Keychain>,
    fetcher: Arc<Fetcher>,
    downloader: Downloader,
    locks: KeyedLock,
    lock_mode: LockMode,
    interrupt: Interrupt,
    observers: Vec<Arc<dyn BuildObserver>>,
}

impl Client {
    /// Client for the configured environment; `docker_host` overrides `DOCKER_HOST`
    pub async fn new(manager: &ConfigManager, config: Config, docker_host: Option<&str>) -> PackResult<Self> {
        let runtime = create_runtime(docker_host).await?;
        let keychain = Arc::new(Keychain::from_environment()?);
        Self::from_parts(config, manager.dir(), runtime, keychain)
    }

    /// Client over explicit parts; state lives under `home`
    pub fn from_parts(
        config: Config,
        home: PathBuf,
        runtime: Arc<dyn ContainerRuntime>,
        keychain: Arc<Keychain>,
    ) -> PackResult<Self> {
        let paths = ConfigManager::with_path(home.join("config.toml"));
        let store = Arc::new(BlobStore::open(paths.blobs_dir())?);
        let registry = Arc::new(RegistryClient::new(Arc::clone(&keychain)));
        let fetcher = Arc::new(Fetcher::new(
            Arc::clone(&runtime),
            registry,
            store,
            paths.image_state_path(),
        ));
        debug!("Client state under {}", home.display());

        Ok(Self {
            config,
            downloader: Downloader::new(paths.download_cache_dir()),
            home,
            runtime,
            keychain,
            fetcher,
            locks: KeyedLock::new(),
            lock_mode: LockMode::default(),
            interrupt: Interrupt::new(),
            observers: vec![Arc::new(LogObserver)],
        })
    }

    /// Cancellation shared with the signal listener
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn keychain(&self) -> &Arc<Keychain> {
        &self.keychain
    }

    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    pub(crate) fn paths(&self) -> ConfigManager {
        ConfigManager::with_path(self.home.join("config.toml"))
    }

    pub(crate) fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub(crate) fn locks(&self) -> &KeyedLock {
        &self.locks
    }

    pub(crate) fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    pub(crate) fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub(crate) fn observers(&self) -> Vec<Arc<dyn BuildObserver>> {
        self.observers.clone()
    }

    /// Host directory holding OCI layouts for `--layout` builds
    pub(crate) fn layout_repo_dir(&self) -> PathBuf {
        match self.config.layout_repository_dir.as_deref().filter(|d| !d.is_empty()) {
            // relative settings live under the pack home
            Some(dir) => self.home.join(dir),
            None => self.home.join("layout-repo"),
        }
    }

    /// Pull policy from config when the caller did not choose one
    pub fn default_pull_policy(&self) -> PackResult<PullPolicy> {
        match self.config.pull_policy.as_deref() {
            Some(policy) => policy.parse(),
            None => Ok(PullPolicy::default()),
        }
    }

    /// The named buildpack registry, the default one, or the official index
    pub fn registry_index(&self, name: Option<&str>) -> PackResult<RegistryIndex> {
        let cache_root = self.paths().download_cache_dir();
        let name = name
            .filter(|n| !n.is_empty())
            .or(self.config.default_registry_name.as_deref());
        match name {
            None => Ok(RegistryIndex::official(&cache_root)),
            Some(name) => match self.config.registry(name) {
                Some(registry) => Ok(RegistryIndex::new(
                    &registry.name,
                    registry.kind.parse::<IndexKind>()?,
                    &registry.url,
                    &cache_root,
                )),
                None if name == crate::buildpack::registry::DEFAULT_REGISTRY_NAME => {
                    Ok(RegistryIndex::official(&cache_root))
                }
                None => Err(PackError::invalid(format!("registry '{}' is not configured", name))),
            },
        }
    }

    /// Resolver for buildpack locators relative to `base_dir`
    pub(crate) fn resolver(&self, base_dir: &Path, fetch: FetchOptions) -> PackResult<ModuleResolver<'_>> {
        Ok(ModuleResolver::new(&self.fetcher, &self.downloader, base_dir)
            .with_registry(self.registry_index(None)?)
            .with_fetch_options(fetch))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::orchestration::testing::FakeRuntime;
    use tempfile::TempDir;

    /// A client over a fake runtime with state in `temp`
    pub(crate) fn client(temp: &Path, config: Config) -> (Client, Arc<FakeRuntime>) {
        let runtime = Arc::new(FakeRuntime::new());
        let client = Client::from_parts(
            config,
            temp.join("pack-home"),
            runtime.clone(),
            Arc::new(Keychain::new()),
        )
        .unwrap();
        (client, runtime)
    }

    #[test]
    fn registry_index_selection() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            registries: vec![RegistryConfig {
                name: "corp".into(),
                kind: "git".into(),
                url: "https://git.example.com/index".into(),
            }],
            ..Default::default()
        };
        let (client, _) = client(temp.path(), config);

        assert_eq!(client.registry_index(None).unwrap().name, "official");
        let corp = client.registry_index(Some("corp")).unwrap();
        assert_eq!(corp.kind, IndexKind::Git);
        assert!(corp.cache_dir().starts_with(temp.path().join("pack-home/download-cache")));
        assert!(client.registry_index(Some("missing")).is_err());
    }

    #[test]
    fn pull_policy_from_config() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            pull_policy: Some("if-not-present".into()),
            ..Default::default()
        };
        let (client, _) = client(temp.path(), config);
        assert_eq!(client.default_pull_policy().unwrap(), PullPolicy::IfNotPresent);
    }
}
