//! Builder images: `builder.toml`, label metadata, lifecycle releases and assembly
//!
//! [`Client::create_builder`] turns a parsed [`BuilderConfig`] into a builder
//! image; [`Client::inspect_builder`] decodes one for display.

pub mod assembler;
pub mod config;
pub mod lifecycle;
pub mod metadata;

pub use assembler::BuilderAssembler;
pub use config::BuilderConfig;
pub use lifecycle::LifecycleArchive;
pub use metadata::{Builder, BuilderMetadata, LifecycleMetadata, RunImageMetadata};

use crate::build::run_image::user_mirrors;
use crate::buildpack::{Group, ModuleInfo, ModuleKind, ModuleResolver, Order, Resolved};
use crate::client::Client;
use crate::error::{PackError, PackResult};
use crate::image::{FetchOptions, ImageRef, PullPolicy};
use crate::trust::TrustSet;
use config::ModuleConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CreateBuilderOptions {
    /// Name of the builder image to produce
    pub name: String,
    pub config: BuilderConfig,
    /// Push to the registry instead of loading into the daemon
    pub publish: bool,
    pub pull_policy: PullPolicy,
    /// Buildpack registry for `id@version` locators
    pub registry: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl CreateBuilderOptions {
    pub fn new(name: impl Into<String>, config: BuilderConfig) -> Self {
        Self {
            name: name.into(),
            config,
            publish: false,
            pull_policy: PullPolicy::default(),
            registry: None,
            labels: BTreeMap::new(),
        }
    }
}

/// Run image as shown by `builder inspect`
#[derive(Debug, Clone, Serialize)]
pub struct RunImageInfo {
    pub name: String,
    /// Whether the mirror came from the user's config
    pub user_configured: bool,
}

/// Decoded builder, ready for display
#[derive(Debug, Clone, Serialize)]
pub struct BuilderInfo {
    pub name: String,
    pub description: String,
    pub stack_id: String,
    pub mixins: Vec<String>,
    pub run_images: Vec<RunImageInfo>,
    pub lifecycle_version: String,
    pub platform_apis: Vec<String>,
    pub buildpack_apis: Vec<String>,
    pub buildpacks: Vec<ModuleInfo>,
    pub extensions: Vec<ModuleInfo>,
    pub order: Order,
    pub order_extensions: Order,
    pub created_by: String,
    pub trusted: bool,
    pub default: bool,
}

impl Client {
    /// Create a builder image from `opts.config`
    pub async fn create_builder(&self, opts: CreateBuilderOptions) -> PackResult<ImageRef> {
        self.interrupt()
            .cancellable("create builder", self.assemble_builder(opts))
            .await
    }

    async fn assemble_builder(&self, opts: CreateBuilderOptions) -> PackResult<ImageRef> {
        let name = ImageRef::parse(&opts.name)?;
        if opts.publish {
            self.keychain().require_for_publish(&name).await?;
        }
        let config = &opts.config;
        let fetch = if opts.publish {
            FetchOptions::registry()
        } else {
            FetchOptions::daemon(opts.pull_policy)
        };
        let platform = config
            .targets
            .first()
            .filter(|t| !t.os.is_empty() && !t.arch.is_empty())
            .map(|t| format!("{}/{}", t.os, t.arch));

        info!("Creating builder {} from build image {}", name, config.build_image());
        let build_image = self
            .fetcher()
            .fetch(config.build_image(), &fetch.clone().with_platform(platform))
            .await?;
        let backend = if opts.publish {
            self.fetcher().remote_backend()
        } else {
            self.fetcher().local_backend()
        };
        let mut assembler = BuilderAssembler::new(name.clone(), backend, &build_image)?;
        assembler.set_description(config.description.clone());
        if let Some(stack) = config.stack.as_ref().filter(|s| !s.id.is_empty()) {
            assembler.set_stack_id(stack.id.clone());
        }

        let run_images: Vec<RunImageMetadata> = config
            .run_images()
            .into_iter()
            .map(|r| RunImageMetadata {
                image: r.image,
                mirrors: r.mirrors,
            })
            .collect();
        for run in &run_images {
            match self.fetcher().exists(&run.image, !opts.publish).await {
                Ok(true) => {}
                Ok(false) => warn!("Run image {} is not accessible", run.image),
                Err(e) => warn!("Could not check run image {}: {}", run.image, e),
            }
        }
        assembler.set_run_images(run_images);

        let lifecycle = self
            .lifecycle_archive(&config.lifecycle, build_image.architecture())
            .await?;
        assembler.set_lifecycle(lifecycle);

        let base_dir = std::env::current_dir().map_err(|e| PackError::io("reading working directory", e))?;
        let resolver = ModuleResolver::new(self.fetcher(), self.downloader(), &base_dir)
            .with_registry(self.registry_index(opts.registry.as_deref())?)
            .with_fetch_options(fetch);
        for (kind, modules) in [
            (ModuleKind::Buildpack, &config.buildpacks),
            (ModuleKind::Extension, &config.extensions),
        ] {
            for module in modules {
                add_configured_module(&resolver, &mut assembler, kind, module).await?;
            }
        }

        assembler.set_order(ModuleKind::Buildpack, config.order.clone());
        if !config.order_extensions.is_empty() {
            assembler.set_order(ModuleKind::Extension, config.order_extensions.clone());
        }
        assembler.set_build_env(
            config
                .build
                .env
                .iter()
                .map(|e| (e.name.clone(), e.value.clone()))
                .collect(),
        );

        let mut image = assembler.assemble().await?;
        for (key, value) in &opts.labels {
            image.set_label(key, value)?;
        }
        let id = image.save().await?;
        info!("Successfully created builder image {} ({})", name, id);
        Ok(name)
    }

    /// Lifecycle release from `uri`, a pinned version or the default version
    async fn lifecycle_archive(&self, release: &config::LifecycleConfig, arch: &str) -> PackResult<LifecycleArchive> {
        let uri = if !release.uri.is_empty() {
            release.uri.clone()
        } else {
            let version = if release.version.is_empty() {
                lifecycle::DEFAULT_LIFECYCLE_VERSION
            } else {
                release.version.as_str()
            };
            lifecycle::download_url(version, arch)
        };
        debug!("Using lifecycle from {}", uri);
        let path = self.downloader().download(&uri).await?;
        tokio::task::spawn_blocking(move || LifecycleArchive::open(&path))
            .await
            .map_err(|e| PackError::Internal(e.to_string()))?
    }

    /// Decode the builder `name`; `None` when it does not exist there
    pub async fn inspect_builder(&self, name: &str, daemon: bool) -> PackResult<Option<BuilderInfo>> {
        self.interrupt()
            .cancellable("inspect", self.decode_builder(name, daemon))
            .await
    }

    async fn decode_builder(&self, name: &str, daemon: bool) -> PackResult<Option<BuilderInfo>> {
        let fetch = if daemon {
            FetchOptions::daemon(PullPolicy::Never)
        } else {
            FetchOptions::registry()
        };
        let image = match self.fetcher().fetch(name, &fetch).await {
            Ok(image) => image,
            Err(PackError::ImageNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let builder = Builder::from_image(image)?;
        let lifecycle = builder.lifecycle();

        let mut run_images = Vec::new();
        for run in builder.run_images() {
            for mirror in user_mirrors(&run.image, self.config(), &BTreeMap::new()) {
                run_images.push(RunImageInfo {
                    name: mirror,
                    user_configured: true,
                });
            }
            run_images.push(RunImageInfo {
                name: run.image.clone(),
                user_configured: false,
            });
            run_images.extend(run.mirrors.iter().map(|m| RunImageInfo {
                name: m.clone(),
                user_configured: false,
            }));
        }

        let created_by = &builder.metadata().created_by;
        Ok(Some(BuilderInfo {
            name: name.to_string(),
            description: builder.description().to_string(),
            stack_id: builder.stack_id().to_string(),
            mixins: builder.mixins().to_vec(),
            run_images,
            lifecycle_version: lifecycle.version.clone(),
            platform_apis: lifecycle.platform_apis(),
            buildpack_apis: lifecycle.buildpack_apis(),
            buildpacks: builder.metadata().buildpacks.clone(),
            extensions: builder.metadata().extensions.clone(),
            order: builder.order().clone(),
            order_extensions: builder.order_extensions().clone(),
            created_by: format!("{} {}", created_by.name, created_by.version).trim().to_string(),
            trusted: TrustSet::from_config(self.config())?.is_trusted(name),
            default: self.config().default_builder_image.as_deref() == Some(name),
        }))
    }
}

/// Resolve one `[[buildpacks]]`/`[[extensions]]` entry and add what it brings
async fn add_configured_module(
    resolver: &ModuleResolver<'_>,
    assembler: &mut BuilderAssembler,
    kind: ModuleKind,
    module: &ModuleConfig,
) -> PackResult<()> {
    let contents = match resolver.resolve(kind, module.locator()).await? {
        Resolved::Modules(contents) => contents,
        Resolved::FromBuilder => {
            return Err(PackError::invalid(format!(
                "{} is not a valid {} location for a new builder",
                module.locator(),
                kind
            )))
        }
    };
    let main = contents.main.info();
    if !module.id.is_empty() && module.id != main.id {
        return Err(PackError::invalid(format!(
            "{} from {} has id '{}' which does not match '{}' from the builder config",
            kind,
            module.locator(),
            main.id,
            module.id
        )));
    }
    if !module.version.is_empty() && module.version != main.version {
        return Err(PackError::invalid(format!(
            "{} from {} has version '{}' which does not match '{}' from the builder config",
            kind,
            module.locator(),
            main.version,
            module.version
        )));
    }
    for module in contents.all() {
        assembler.add_module(module.clone());
    }
    Ok(())
}

/// Groups rendered as `id@version` lists, one line per group
pub fn render_order(order: &Order) -> Vec<String> {
    order
        .iter()
        .map(|Group { group }| {
            group
                .iter()
                .map(|entry| {
                    let mut rendered = entry.full_name();
                    if entry.optional {
                        rendered.push_str(" (optional)");
                    }
                    rendered
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect()
}
