//! The build orchestrator
//!
//! [`Client::build`] validates options, picks the builder, run image and
//! lifecycle image, optionally assembles an ephemeral builder carrying the
//! requested buildpacks and env, and hands a [`LifecyclePlan`] to the
//! executor. Builds of the same app image are serialized by a per-image lock.

pub mod env;
pub mod options;
pub mod run_image;

pub use options::BuildOptions;

use crate::builder::assembler::BuilderAssembler;
use crate::builder::lifecycle::{lifecycle_image, DEFAULT_LIFECYCLE_VERSION};
use crate::builder::metadata::{Builder, LifecycleApis};
use crate::buildpack::{Group, ModuleKind, ModuleRef, ModuleResolver, Order, Resolved};
use crate::cache::{volume_name, CacheHandle, CacheKind};
use crate::client::Client;
use crate::error::{PackError, PackResult};
use crate::image::{labels, Backend, FetchOptions, Image, ImageRef};
use crate::lifecycle::phase::proxy_env_from_host;
use crate::lifecycle::{negotiate, BuildState, LifecycleExecutor, LifecyclePlan, StateTracker};
use crate::trust::TrustSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What `prepare` produced: the plan plus anything to clean up afterwards
struct Prepared {
    plan: LifecyclePlan,
    app_path: PathBuf,
    ephemeral: Option<ImageRef>,
}

impl Client {
    /// Build `opts.image` from source
    pub async fn build(&self, opts: BuildOptions) -> PackResult<ImageRef> {
        opts.validate(self.config())?;
        let image = ImageRef::parse(&opts.image)?;
        let _guard = self.locks().acquire(&image.to_string(), self.lock_mode()).await?;

        if opts.publish {
            // Fail before any container runs when the push cannot be authorized.
            self.keychain().require_for_publish(&image).await?;
        }

        // nothing is tagged and no container exists until prepare returns
        let prepared = self
            .interrupt()
            .cancellable("prepare", self.prepare_build(&opts, image))
            .await?;
        let result = self.run_build(&prepared).await;

        if let Some(ephemeral) = &prepared.ephemeral {
            debug!("Removing ephemeral builder {}", ephemeral);
            if let Err(e) = self.runtime().image_remove(&ephemeral.to_string()).await {
                warn!("Failed to remove ephemeral builder {}: {}", ephemeral, e);
            }
        }
        result
    }

    async fn run_build(&self, prepared: &Prepared) -> PackResult<ImageRef> {
        let plan = &prepared.plan;
        let tracker = Arc::new(StateTracker::new(plan.api, self.observers()));
        let executor = LifecycleExecutor::new(
            Arc::clone(self.runtime()),
            Arc::clone(self.keychain()),
            self.interrupt().clone(),
            Arc::clone(&tracker),
        );

        executor.run(plan, &prepared.app_path).await?;

        tracker.enter(BuildState::Tag);
        if let Err(e) = self.finalize(plan).await {
            tracker.fail(e.kind());
            return Err(e);
        }
        if let Err(e) = executor.cleanup(plan).await {
            warn!("Failed to remove build volumes: {}", e);
        }
        tracker.enter(BuildState::Done);
        info!("Successfully built image {}", plan.image);
        Ok(plan.image.clone())
    }

    /// Confirm the exported image landed where it was sent
    async fn finalize(&self, plan: &LifecyclePlan) -> PackResult<()> {
        if let Some(dir) = plan.layout_image_dir() {
            if !dir.join("index.json").is_file() {
                return Err(PackError::ImageNotFound(format!(
                    "{} (no OCI layout at {})",
                    plan.image,
                    dir.display()
                )));
            }
            info!("Exported {} to {}", plan.image, dir.display());
            return Ok(());
        }
        if plan.publish {
            return match self.fetcher().registry().manifest_digest(&plan.image).await? {
                Some(digest) => {
                    info!("Published {}@{}", plan.image, digest);
                    Ok(())
                }
                None => Err(PackError::ImageNotFound(plan.image.to_string())),
            };
        }
        match self.runtime().image_inspect(&plan.image.to_string()).await? {
            Some(inspect) => {
                debug!("Exported {} as {}", plan.image, inspect.id);
                Ok(())
            }
            None => Err(PackError::ImageNotFound(plan.image.to_string())),
        }
    }

    async fn prepare_build(&self, opts: &BuildOptions, image: ImageRef) -> PackResult<Prepared> {
        let app_path = app_path(opts.app_path.as_deref())?;
        let daemon_fetch = FetchOptions::daemon(opts.pull_policy);

        let builder_name = opts
            .builder
            .clone()
            .filter(|b| !b.is_empty())
            .or_else(|| self.config().default_builder_image.clone())
            .ok_or_else(|| {
                PackError::invalid("no builder given; pass --builder or run `pack config default-builder <builder>`")
            })?;
        let builder = Builder::from_image(self.fetcher().fetch(&builder_name, &daemon_fetch).await?)?;
        let platform = Some(builder.image().platform());

        let trusted = opts.trust_builder || TrustSet::from_config(self.config())?.is_trusted(&builder_name);
        if trusted {
            debug!("Builder {} is trusted", builder_name);
        }

        let build_env = env::merge_env(&opts.env_files, &opts.env)?;

        let run_image = run_image::resolve_run_image(
            opts.run_image.as_deref(),
            &image,
            &builder.run_images(),
            self.config(),
            &opts.additional_mirrors,
        )?;
        let run_fetch = if opts.publish {
            FetchOptions::registry()
        } else {
            daemon_fetch.clone()
        };
        let run = self
            .fetcher()
            .fetch(&run_image, &run_fetch.with_platform(platform.clone()))
            .await?;
        check_stack(&builder, &run)?;
        info!("Using run image {}", run_image);

        let layout_repo = if opts.layout {
            let repo = self.layout_repo_dir();
            seed_layout(&repo, &run).await?;
            Some(repo)
        } else {
            None
        };

        let use_creator = trusted && opts.extensions.is_empty();
        let lifecycle_image_name = opts
            .lifecycle_image
            .clone()
            .or_else(|| self.config().lifecycle_image.clone());
        let custom_lifecycle = lifecycle_image_name.is_some();
        let lifecycle_image_name = lifecycle_image_name.unwrap_or_else(|| {
            let version = builder.lifecycle().version.as_str();
            lifecycle_image(if version.is_empty() { DEFAULT_LIFECYCLE_VERSION } else { version })
        });

        let mut lifecycle_apis = Vec::new();
        if !use_creator {
            let lifecycle = self
                .fetcher()
                .fetch(&lifecycle_image_name, &daemon_fetch.clone().with_platform(platform.clone()))
                .await?;
            if custom_lifecycle {
                lifecycle_apis = image_platform_apis(&lifecycle)?;
            }
        }
        let api = negotiate(&builder.lifecycle().platform_apis(), &lifecycle_apis)?;
        debug!("Negotiated platform API {}", api);

        let ephemeral = self
            .ephemeral_builder(&builder, opts, build_env, &app_path, daemon_fetch.clone())
            .await?;
        let builder_image = match &ephemeral {
            Some(name) => name.to_string(),
            None => builder.image().name().to_string(),
        };

        let cache = opts.cache_options();
        let previous_image = opts
            .previous_image
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(ImageRef::parse)
            .transpose()?;

        let plan = LifecyclePlan {
            api,
            builder_image,
            lifecycle_image: lifecycle_image_name,
            uid: options::user_id("uid", opts.uid)?.unwrap_or(builder.uid()),
            gid: options::user_id("gid", opts.gid)?.unwrap_or(builder.gid()),
            os: builder.os().to_string(),
            additional_tags: opts.additional_tags.clone(),
            run_image,
            run_images: builder.run_images(),
            previous_image,
            layers_volume: volume_name("layers", &image),
            app_volume: volume_name("app", &image),
            app_dir: opts.workspace.clone().unwrap_or_default(),
            build_cache: CacheHandle::resolve(CacheKind::Build, cache.get(CacheKind::Build), &image)?,
            launch_cache: CacheHandle::resolve(CacheKind::Launch, cache.get(CacheKind::Launch), &image)?,
            volumes: opts.mounts()?,
            publish: opts.publish,
            layout_repo,
            clear_cache: opts.clear_cache,
            use_creator,
            verbose: opts.verbose,
            gid_override: options::user_id("gid", opts.gid)?,
            default_process: opts.default_process.clone(),
            creation_time: opts.creation_time()?,
            project_metadata: project_metadata(&app_path).await,
            network: opts.network.clone(),
            mac_address: opts.mac_address.clone(),
            docker_socket: self.docker_socket(opts.docker_host.as_deref()),
            env: proxy_env_from_host(),
            sbom_destination: opts.sbom_destination_dir.clone(),
            report_destination: opts.report_destination_dir.clone(),
            image,
        };

        Ok(Prepared {
            plan,
            app_path,
            ephemeral,
        })
    }

    /// Socket the exporter talks to when exporting to the daemon
    fn docker_socket(&self, docker_host: Option<&str>) -> String {
        match docker_host {
            Some(host) if !host.is_empty() && host != "inherit" => {
                host.strip_prefix("unix://").unwrap_or(host).to_string()
            }
            _ => self.runtime().daemon_socket(),
        }
    }

    /// Assemble a throwaway builder when the build customizes modules or env
    async fn ephemeral_builder(
        &self,
        builder: &Builder,
        opts: &BuildOptions,
        build_env: BTreeMap<String, String>,
        app_path: &Path,
        fetch: FetchOptions,
    ) -> PackResult<Option<ImageRef>> {
        let customized = !opts.buildpacks.is_empty()
            || !opts.extensions.is_empty()
            || !opts.pre_buildpacks.is_empty()
            || !opts.post_buildpacks.is_empty()
            || !build_env.is_empty();
        if !customized {
            return Ok(None);
        }

        let name = ImageRef::parse(&format!("pack.local/builder/{}:latest", Uuid::new_v4().simple()))?;
        info!("Creating ephemeral builder {}", name);
        let base_dir = if app_path.is_dir() {
            app_path.to_path_buf()
        } else {
            std::env::current_dir().map_err(|e| PackError::io("reading working directory", e))?
        };
        let mut builder_modules = builder.modules(ModuleKind::Buildpack);
        builder_modules.extend(builder.modules(ModuleKind::Extension));
        let resolver = self.resolver(&base_dir, fetch)?.with_builder_modules(builder_modules);

        let mut assembler = BuilderAssembler::extend(name.clone(), self.fetcher().local_backend(), builder);

        let mut order = builder.order().clone();
        if !opts.buildpacks.is_empty() {
            let (before, after, from_builder) =
                resolve_refs(&resolver, &mut assembler, builder, ModuleKind::Buildpack, &opts.buildpacks).await?;
            order = if from_builder {
                builder
                    .order()
                    .iter()
                    .map(|g| Group {
                        group: before.iter().chain(&g.group).chain(&after).cloned().collect(),
                    })
                    .collect()
            } else {
                vec![Group { group: before }]
            };
        }

        let (pre, _, pre_from_builder) =
            resolve_refs(&resolver, &mut assembler, builder, ModuleKind::Buildpack, &opts.pre_buildpacks).await?;
        let (post, _, post_from_builder) =
            resolve_refs(&resolver, &mut assembler, builder, ModuleKind::Buildpack, &opts.post_buildpacks).await?;
        if pre_from_builder || post_from_builder {
            return Err(PackError::invalid("from=builder cannot be used with pre- or post-buildpacks"));
        }
        if !pre.is_empty() || !post.is_empty() {
            order = order
                .into_iter()
                .map(|g| Group {
                    group: pre.iter().chain(&g.group).chain(&post).cloned().collect(),
                })
                .collect();
        }
        assembler.set_order(ModuleKind::Buildpack, order);

        if !opts.extensions.is_empty() {
            let (extensions, _, _) =
                resolve_refs(&resolver, &mut assembler, builder, ModuleKind::Extension, &opts.extensions).await?;
            let order: Order = vec![Group { group: extensions }];
            assembler.set_order(ModuleKind::Extension, order);
        }

        assembler.set_build_env(build_env);
        let mut image = assembler.assemble().await?;
        image.save().await?;
        Ok(Some(name))
    }
}

/// Resolve locators into order entries, adding new modules to `assembler`
///
/// Entries before a `from=builder` locator land in the first list, entries
/// after it in the second.
async fn resolve_refs(
    resolver: &ModuleResolver<'_>,
    assembler: &mut BuilderAssembler,
    builder: &Builder,
    kind: ModuleKind,
    locators: &[String],
) -> PackResult<(Vec<ModuleRef>, Vec<ModuleRef>, bool)> {
    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut from_builder = false;
    for locator in locators {
        match resolver.resolve(kind, locator).await? {
            Resolved::FromBuilder => {
                if from_builder {
                    return Err(PackError::invalid("from=builder can only be given once"));
                }
                from_builder = true;
            }
            Resolved::Modules(contents) => {
                for module in contents.all() {
                    let info = module.info();
                    if !builder.layers(module.kind()).contains(&info.id, &info.version) {
                        assembler.add_module(module.clone());
                    }
                }
                let entry = ModuleRef::from(contents.main.info());
                if from_builder {
                    after.push(entry);
                } else {
                    before.push(entry);
                }
            }
        }
    }
    Ok((before, after, from_builder))
}

/// Source path, defaulting to the working directory
fn app_path(path: Option<&Path>) -> PackResult<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().map_err(|e| PackError::io("reading working directory", e))?,
    };
    if !path.exists() {
        return Err(PackError::PathNotFound(path));
    }
    path.canonicalize()
        .map_err(|e| PackError::io(format!("resolving app path {}", path.display()), e))
}

/// Builder and run image must agree on the stack when both declare one
fn check_stack(builder: &Builder, run: &Image) -> PackResult<()> {
    let run_stack = run.label(labels::STACK_ID).unwrap_or_default();
    if !builder.stack_id().is_empty() && !run_stack.is_empty() && builder.stack_id() != run_stack {
        return Err(PackError::invalid(format!(
            "run image {} has stack {} but builder uses stack {}",
            run.name(),
            run_stack,
            builder.stack_id()
        )));
    }
    Ok(())
}

/// Copy the run image into the layout repository, where the exporter looks for it
async fn seed_layout(repo: &Path, run: &Image) -> PackResult<()> {
    let dir = repo.join(run.name().layout_path());
    if dir.join("index.json").is_file() {
        debug!("Run image layout {} already present", dir.display());
        return Ok(());
    }
    info!("Writing run image {} to {}", run.name(), dir.display());
    let mut copy = Image::from_base(run.name().clone(), Backend::Layout(dir), run);
    copy.save().await?;
    Ok(())
}

/// Platform APIs advertised by a lifecycle image
fn image_platform_apis(image: &Image) -> PackResult<Vec<String>> {
    match image.label(labels::LIFECYCLE_APIS) {
        Some(raw) => {
            let apis: LifecycleApis = serde_json::from_str(raw)?;
            Ok(apis.platform.all())
        }
        None => Ok(Vec::new()),
    }
}

#[derive(Serialize)]
struct ProjectMetadata {
    source: ProjectSource,
}

#[derive(Serialize)]
struct ProjectSource {
    #[serde(rename = "type")]
    kind: String,
    version: SourceVersion,
    metadata: SourceMetadata,
}

#[derive(Serialize)]
struct SourceVersion {
    commit: String,
}

#[derive(Serialize)]
struct SourceMetadata {
    repository: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    refs: Vec<String>,
}

/// `project-metadata.toml` describing the git checkout at `app_path`, if any
async fn project_metadata(app_path: &Path) -> String {
    if !app_path.is_dir() {
        return String::new();
    }
    let Some(commit) = git(app_path, &["rev-parse", "HEAD"]).await else {
        return String::new();
    };
    let repository = git(app_path, &["config", "--get", "remote.origin.url"])
        .await
        .unwrap_or_default();
    let refs = git(app_path, &["tag", "--points-at", "HEAD"])
        .await
        .map(|tags| tags.lines().map(str::to_string).collect())
        .unwrap_or_default();

    let metadata = ProjectMetadata {
        source: ProjectSource {
            kind: "git".to_string(),
            version: SourceVersion { commit },
            metadata: SourceMetadata { repository, refs },
        },
    };
    match toml::to_string(&metadata) {
        Ok(rendered) => rendered,
        Err(e) => {
            debug!("Skipping project metadata: {}", e);
            String::new()
        }
    }
}

async fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::assembler::tests::saved_builder_in;
    use crate::client::tests::client;
    use crate::config::Config;
    use crate::image::PullPolicy;
    use crate::lifecycle::RecordingObserver;
    use crate::orchestration::testing::FakeRuntime;
    use crate::lifecycle::phase::LAYOUT_DIR;
    use crate::lifecycle::Interrupt;
    use std::time::Duration;
    use crate::orchestration::{ContainerRuntime, Mount};
    use tempfile::TempDir;

    const BUILDER: &str = "example/builder:latest";
    const APP_IMAGE: &str = "docker.io/local/hello:1";

    /// A client whose fake daemon holds the builder, the run image and the exported app
    async fn harness(temp: &Path, config: Config) -> (Client, Arc<FakeRuntime>, Arc<RecordingObserver>) {
        let (client, runtime) = client(temp, config);
        let observer = Arc::new(RecordingObserver::default());
        let client = client.with_observer(observer.clone());
        saved_builder_in(temp, Arc::clone(client.fetcher().store()), client.fetcher().local_backend()).await;
        {
            let mut state = runtime.lock();
            state.images.insert(
                "docker.io/example/run:jammy".into(),
                FakeRuntime::inspect_with_labels("sha256:run", &[(labels::STACK_ID, "io.buildpacks.stacks.jammy")]),
            );
            state.images.insert(
                "docker.io/buildpacksio/lifecycle:0.20.5".into(),
                FakeRuntime::inspect_with_labels("sha256:lifecycle", &[]),
            );
            state
                .images
                .insert(APP_IMAGE.into(), FakeRuntime::inspect_with_labels("sha256:app", &[]));
        }
        (client, runtime, observer)
    }

    fn options(temp: &Path) -> BuildOptions {
        let app = temp.join("hello-node");
        std::fs::create_dir_all(&app).unwrap();
        std::fs::write(app.join("package.json"), "{}").unwrap();
        BuildOptions {
            app_path: Some(app),
            builder: Some(BUILDER.into()),
            pull_policy: PullPolicy::IfNotPresent,
            ..BuildOptions::new("local/hello:1")
        }
    }

    #[tokio::test]
    async fn trusted_build_runs_one_creator_container() {
        let temp = TempDir::new().unwrap();
        let (client, runtime, observer) = harness(temp.path(), Config::default()).await;
        let mut opts = options(temp.path());
        opts.trust_builder = true;

        let built = client.build(opts).await.unwrap();
        assert_eq!(built.to_string(), APP_IMAGE);

        let state = runtime.lock();
        assert_eq!(state.containers.len(), 1);
        let spec = &state.containers[0].1;
        assert_eq!(spec.image, "docker.io/example/builder:latest");
        assert_eq!(spec.cmd[0], "/cnb/lifecycle/creator");
        assert!(spec.cmd.contains(&"example/run:jammy".to_string()));

        let layers = volume_name("layers", &built);
        assert!(!state.volumes.contains_key(&layers));
        assert!(state.volumes.contains_key(&volume_name("build", &built)));
        drop(state);

        let states = observer.states();
        assert_eq!(states.first(), Some(&BuildState::Init));
        assert_eq!(&states[states.len() - 2..], &[BuildState::Tag, BuildState::Done]);
    }

    #[tokio::test]
    async fn untrusted_build_runs_each_phase_in_api_order() {
        let temp = TempDir::new().unwrap();
        let (client, runtime, _) = harness(temp.path(), Config::default()).await;

        client.build(options(temp.path())).await.unwrap();

        let state = runtime.lock();
        let phases: Vec<&str> = state
            .containers
            .iter()
            .map(|(_, spec)| spec.cmd[0].trim_start_matches("/cnb/lifecycle/"))
            .collect();
        assert_eq!(phases, ["analyzer", "detector", "restorer", "builder", "exporter"]);
        let analyzer = &state.containers[0].1;
        assert_eq!(analyzer.image, "docker.io/buildpacksio/lifecycle:0.20.5");
    }

    #[tokio::test]
    async fn publish_without_credentials_runs_nothing() {
        let temp = TempDir::new().unwrap();
        let (client, runtime, _) = harness(temp.path(), Config::default()).await;
        let mut opts = options(temp.path());
        opts.image = "private.example.com/x:1".into();
        opts.publish = true;
        opts.pull_policy = PullPolicy::Always;

        let err = client.build(opts).await.unwrap_err();
        assert!(matches!(err, PackError::AuthRequired { .. }));
        assert!(runtime.lock().containers.is_empty());
    }

    #[tokio::test]
    async fn build_env_uses_ephemeral_builder_and_removes_it() {
        let temp = TempDir::new().unwrap();
        let (client, runtime, _) = harness(temp.path(), Config::default()).await;
        let mut opts = options(temp.path());
        opts.trust_builder = true;
        opts.env.insert("BP_NODE_VERSION".into(), "22".into());

        client.build(opts).await.unwrap();

        let state = runtime.lock();
        let creator_image = state.containers[0].1.image.clone();
        assert!(creator_image.starts_with("pack.local/builder/"), "{}", creator_image);
        assert!(state.removed_images.contains(&creator_image));
    }

    #[tokio::test]
    async fn layout_build_writes_into_the_layout_repo() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("layouts");
        let config = Config {
            experimental: true,
            layout_repository_dir: Some(repo.display().to_string()),
            ..Default::default()
        };
        let (client, runtime, _) = harness(temp.path(), config).await;
        let mut run = Image::new(
            ImageRef::parse("example/run:jammy").unwrap(),
            client.fetcher().local_backend(),
            Arc::clone(client.fetcher().store()),
            "linux",
            "amd64",
        );
        run.set_label(labels::STACK_ID, "io.buildpacks.stacks.jammy").unwrap();
        run.save().await.unwrap();

        let mut opts = options(temp.path());
        opts.trust_builder = true;
        opts.layout = true;

        // the creator ran but left nothing in the layout
        let err = client.build(opts.clone()).await.unwrap_err();
        assert!(matches!(err, PackError::ImageNotFound(_)), "{:?}", err);
        assert!(repo.join("index.docker.io/example/run/jammy/index.json").is_file());
        {
            let state = runtime.lock();
            let creator = &state.containers[0].1;
            assert!(creator.mounts.contains(&Mount::bind(&repo, LAYOUT_DIR)));
            assert!(!creator.cmd.contains(&"-daemon".to_string()));
        }

        let app_layout = repo.join("index.docker.io/local/hello/1");
        std::fs::create_dir_all(&app_layout).unwrap();
        std::fs::write(app_layout.join("index.json"), "{}").unwrap();
        assert_eq!(client.build(opts).await.unwrap().to_string(), APP_IMAGE);
    }

    #[tokio::test]
    async fn interrupt_during_builder_pull_cancels_before_any_container() {
        let temp = TempDir::new().unwrap();
        let (client, runtime, observer) = harness(temp.path(), Config::default()).await;
        let interrupt = Interrupt::with_grace(Duration::from_millis(10));
        let client = client.with_interrupt(interrupt.clone());
        runtime.lock().hang_pulls = true;
        let mut opts = options(temp.path());
        opts.pull_policy = PullPolicy::Always;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            interrupt.escalate();
        });
        let err = tokio::time::timeout(Duration::from_secs(5), client.build(opts))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PackError::Cancelled { ref phase } if phase == "prepare"), "{:?}", err);

        let state = runtime.lock();
        assert_eq!(state.pulls, vec!["docker.io/example/builder:latest".to_string()]);
        assert!(state.containers.is_empty());
        assert!(state.tags.is_empty());
        assert!(observer.states().is_empty());
    }

    #[tokio::test]
    async fn missing_builder_is_invalid() {
        let temp = TempDir::new().unwrap();
        let (client, _, _) = harness(temp.path(), Config::default()).await;
        let mut opts = options(temp.path());
        opts.builder = None;
        assert!(matches!(client.build(opts).await, Err(PackError::InvalidOptions(_))));
    }

    #[tokio::test]
    async fn stack_mismatch_is_rejected() {
        let temp = TempDir::new().unwrap();
        let (client, runtime, _) = harness(temp.path(), Config::default()).await;
        runtime.lock().images.insert(
            "docker.io/other/run:1".into(),
            FakeRuntime::inspect_with_labels("sha256:other", &[(labels::STACK_ID, "io.buildpacks.stacks.other")]),
        );
        let mut opts = options(temp.path());
        opts.run_image = Some("other/run:1".into());
        let err = client.build(opts).await.unwrap_err();
        assert!(err.to_string().contains("io.buildpacks.stacks.other"));
        assert!(runtime.lock().containers.is_empty());
    }

    #[tokio::test]
    async fn docker_host_overrides_socket() {
        let temp = TempDir::new().unwrap();
        let (client, runtime) = client(temp.path(), Config::default());
        assert_eq!(client.docker_socket(Some("unix:///run/podman.sock")), "/run/podman.sock");
        assert_eq!(client.docker_socket(Some("inherit")), runtime.daemon_socket());
        assert_eq!(client.docker_socket(None), runtime.daemon_socket());
    }

    #[tokio::test]
    async fn project_metadata_is_empty_outside_git() {
        let temp = TempDir::new().unwrap();
        assert_eq!(project_metadata(temp.path()).await, "");
    }
}
