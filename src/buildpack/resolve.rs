//! Locator resolution and module graph ordering

use crate::archive;
use crate::buildpack::blob::BuildModule;
use crate::buildpack::descriptor::{ModuleInfo, ModuleKind, ModuleRef};
use crate::buildpack::downloader::Downloader;
use crate::buildpack::locator::{compare_versions, Locator};
use crate::buildpack::package::{extract_modules, is_layout_archive, PackageContents};
use crate::buildpack::registry::RegistryIndex;
use crate::error::{PackError, PackResult};
use crate::image::{Backend, FetchOptions, Fetcher, Image, ImageRef};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// The outcome of resolving one locator
#[derive(Debug, Clone)]
pub enum Resolved {
    /// `from=builder`: keep the builder's own order
    FromBuilder,
    /// A module plus every module it brought along
    Modules(PackageContents),
}

/// Resolves locators against disk, URLs, images, a registry index and a builder
pub struct ModuleResolver<'a> {
    fetcher: &'a Fetcher,
    downloader: &'a Downloader,
    registry: Option<RegistryIndex>,
    fetch_options: FetchOptions,
    base_dir: PathBuf,
    builder_modules: Vec<BuildModule>,
}

impl<'a> ModuleResolver<'a> {
    pub fn new(fetcher: &'a Fetcher, downloader: &'a Downloader, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            downloader,
            registry: None,
            fetch_options: FetchOptions::default(),
            base_dir: base_dir.into(),
            builder_modules: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: RegistryIndex) -> Self {
        self.registry = Some(registry);
        self
    }

    /// How package images are fetched (daemon + pull policy, or registry)
    pub fn with_fetch_options(mut self, options: FetchOptions) -> Self {
        self.fetch_options = options;
        self
    }

    /// Modules already inside the builder, for `urn:cnb:builder:` and bare ids
    pub fn with_builder_modules(mut self, modules: Vec<BuildModule>) -> Self {
        self.builder_modules = modules;
        self
    }

    fn builder_infos(&self) -> Vec<ModuleInfo> {
        self.builder_modules.iter().map(|m| m.info().clone()).collect()
    }

    pub async fn resolve(&self, kind: ModuleKind, locator: &str) -> PackResult<Resolved> {
        let classified = Locator::classify(locator, &self.builder_infos(), &self.base_dir)?;
        debug!("Resolving {} {} as {:?}", kind, locator, classified);

        let contents = match classified {
            Locator::FromBuilder => return Ok(Resolved::FromBuilder),
            Locator::Builder { id, version } => {
                let main = self
                    .builder_modules
                    .iter()
                    .find(|m| m.info().id == id && m.info().version == version)
                    .cloned()
                    .ok_or_else(|| PackError::BuildpackNotFound(format!("{}@{}", id, version)))?;
                PackageContents {
                    main,
                    dependencies: Vec::new(),
                }
            }
            Locator::Path(path) => self.from_file(kind, &path).await?,
            Locator::Uri(uri) => {
                let path = self.downloader.download(&uri).await?;
                self.from_file(kind, &path).await?
            }
            Locator::Package(name) => self.from_image(kind, &name).await?,
            Locator::Registry {
                namespace,
                name,
                version,
            } => {
                let registry = self.registry.as_ref().ok_or_else(|| {
                    PackError::invalid(format!("no buildpack registry configured to resolve {}", locator))
                })?;
                let entry = registry
                    .locate(&namespace, &name, version.as_deref())
                    .await?;
                debug!("Registry {} maps {} to {}", registry.name, locator, entry.addr);
                self.from_image(kind, &entry.addr).await?
            }
        };
        Ok(Resolved::Modules(contents))
    }

    async fn from_file(&self, kind: ModuleKind, path: &Path) -> PackResult<PackageContents> {
        if path.is_file() && is_layout_archive(path)? {
            let temp = TempDir::new().map_err(|e| PackError::io("creating temp dir", e))?;
            let source = path.to_path_buf();
            let root = temp.path().to_path_buf();
            tokio::task::spawn_blocking(move || archive::extract(archive::open_tar(&source)?, &root, 0))
                .await
                .map_err(|e| PackError::Internal(e.to_string()))??;

            let name = ImageRef::parse("pack.local/package:latest")?;
            let image = Image::open_existing(
                name,
                Backend::Layout(temp.path().to_path_buf()),
                Arc::clone(self.fetcher.store()),
            )
            .await?;
            // Layers are copied into the store before the layout is removed.
            return extract_modules(&image, kind).await;
        }

        let store = Arc::clone(self.fetcher.store());
        let path = path.to_path_buf();
        let main = tokio::task::spawn_blocking(move || -> PackResult<BuildModule> {
            let module = BuildModule::from_path(kind, &path)?;
            let info = module.write_layer(&store)?;
            Ok(BuildModule::from_layer(module.descriptor, info.diff_id))
        })
        .await
        .map_err(|e| PackError::Internal(e.to_string()))??;
        Ok(PackageContents {
            main,
            dependencies: Vec::new(),
        })
    }

    async fn from_image(&self, kind: ModuleKind, name: &str) -> PackResult<PackageContents> {
        let image = self.fetcher.fetch(name, &self.fetch_options).await?;
        extract_modules(&image, kind).await
    }

    /// Resolve every locator and return the combined, de-duplicated module set
    ///
    /// `from=builder` entries are skipped; callers handle the builder order.
    pub async fn resolve_all(&self, kind: ModuleKind, locators: &[String]) -> PackResult<ResolvedSet> {
        let mut set = ResolvedSet::default();
        for locator in locators {
            match self.resolve(kind, locator).await? {
                Resolved::FromBuilder => set.from_builder = true,
                Resolved::Modules(contents) => {
                    set.top_level.push(contents.main.info().clone());
                    for module in contents.all() {
                        set.insert(module.clone());
                    }
                }
            }
        }
        Ok(set)
    }
}

/// Modules gathered from several locators
#[derive(Debug, Clone, Default)]
pub struct ResolvedSet {
    /// The module each locator named, in locator order
    pub top_level: Vec<ModuleInfo>,
    /// Every module, keyed by `id@version`
    pub modules: BTreeMap<String, BuildModule>,
    /// Whether a `from=builder` locator was present
    pub from_builder: bool,
}

impl ResolvedSet {
    pub fn insert(&mut self, module: BuildModule) {
        self.modules
            .entry(module.info().full_name())
            .or_insert(module);
    }

    pub fn into_modules(self) -> Vec<BuildModule> {
        self.modules.into_values().collect()
    }
}

/// Find the module an order entry refers to; an empty version picks the highest
pub fn find_module<'m>(modules: &'m [BuildModule], reference: &ModuleRef) -> Option<&'m BuildModule> {
    modules
        .iter()
        .filter(|m| {
            m.info().id == reference.id && (reference.version.is_empty() || m.info().version == reference.version)
        })
        .max_by(|a, b| compare_versions(&a.info().version, &b.info().version))
}

/// Order modules so every meta buildpack comes after the modules in its order
///
/// Fails with `Cycle` when a meta buildpack (transitively) contains itself and
/// `BuildpackNotFound` when an order entry has no matching module.
pub fn sort_modules(modules: &[BuildModule]) -> PackResult<Vec<BuildModule>> {
    fn visit(
        index: usize,
        modules: &[BuildModule],
        done: &mut HashSet<usize>,
        path: &mut Vec<usize>,
        sorted: &mut Vec<BuildModule>,
    ) -> PackResult<()> {
        if done.contains(&index) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|i| *i == index) {
            let mut names: Vec<String> = path[start..]
                .iter()
                .map(|i| modules[*i].info().full_name())
                .collect();
            names.push(modules[index].info().full_name());
            return Err(PackError::Cycle(names.join(" -> ")));
        }

        path.push(index);
        let module = &modules[index];
        for group in &module.descriptor.order {
            for reference in &group.group {
                let child = find_module(modules, reference).ok_or_else(|| {
                    PackError::BuildpackNotFound(format!(
                        "{} (referenced by {})",
                        reference.full_name(),
                        module.info().full_name()
                    ))
                })?;
                let child_index = modules
                    .iter()
                    .position(|m| std::ptr::eq(m, child))
                    .ok_or_else(|| PackError::Internal("module index lookup failed".to_string()))?;
                visit(child_index, modules, done, path, sorted)?;
            }
        }
        path.pop();

        done.insert(index);
        sorted.push(module.clone());
        Ok(())
    }

    let mut done = HashSet::new();
    let mut sorted = Vec::with_capacity(modules.len());
    for index in 0..modules.len() {
        visit(index, modules, &mut done, &mut Vec::new(), &mut sorted)?;
    }
    Ok(sorted)
}
