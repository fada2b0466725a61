//! Phase container specs
//!
//! [`PhaseFactory::make_phase`] turns a [`LifecyclePlan`] into the
//! container that runs one lifecycle binary: image, command line, user,
//! mounts, env and network. Flags follow the lifecycle's platform
//! contract for the negotiated platform API.

use crate::builder::assembler::{LAYERS_DIR, WORKSPACE_DIR};
use crate::builder::lifecycle::LIFECYCLE_DIR;
use crate::builder::metadata::{run_toml, stack_toml, RunImageMetadata, ENV_GID, ENV_UID};
use crate::cache::CacheHandle;
use crate::creds::REGISTRY_AUTH_ENV;
use crate::error::{PackError, PackResult};
use crate::image::ImageRef;
use crate::lifecycle::platform::ApiVersion;
use crate::orchestration::{ContainerSpec, Mount};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CACHE_DIR: &str = "/cache";
pub const LAUNCH_CACHE_DIR: &str = "/launch-cache";
pub const LAYOUT_DIR: &str = "/layout-repo";
pub const PROJECT_METADATA_PATH: &str = "/layers/project-metadata.toml";
pub const STACK_TOML_PATH: &str = "/layers/stack.toml";
pub const RUN_TOML_PATH: &str = "/layers/run.toml";
pub const SBOM_DIR: &str = "/layers/sbom";
pub const REPORT_PATH: &str = "/layers/report.toml";

pub const DEFAULT_PROCESS_TYPE: &str = "web";
pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";
pub const PLATFORM_API_ENV: &str = "CNB_PLATFORM_API";

const PROXY_VARS: &[&str] = &["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY"];

/// Container labels on every phase container
const PHASE_LABEL: &str = "author";

/// Proxy settings from the host, in both spellings
pub fn proxy_env_from_host() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for var in PROXY_VARS {
        let value = std::env::var(var)
            .ok()
            .or_else(|| std::env::var(var.to_lowercase()).ok());
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            env.insert(var.to_string(), value.clone());
            env.insert(var.to_lowercase(), value);
        }
    }
    env
}

/// Everything the phases of one build need to know
#[derive(Debug, Clone)]
pub struct LifecyclePlan {
    pub api: ApiVersion,
    pub builder_image: String,
    pub lifecycle_image: String,
    pub uid: u32,
    pub gid: u32,
    pub os: String,

    pub image: ImageRef,
    pub additional_tags: Vec<String>,
    pub run_image: String,
    pub run_images: Vec<RunImageMetadata>,
    pub previous_image: Option<ImageRef>,

    pub layers_volume: String,
    pub app_volume: String,
    pub app_dir: String,
    pub build_cache: CacheHandle,
    pub launch_cache: CacheHandle,
    pub volumes: Vec<Mount>,

    pub publish: bool,
    /// Host directory mounted at [`LAYOUT_DIR`] when exporting to an OCI layout
    pub layout_repo: Option<PathBuf>,
    pub clear_cache: bool,
    pub use_creator: bool,
    pub verbose: bool,

    pub gid_override: Option<u32>,
    pub default_process: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub project_metadata: String,
    pub network: Option<String>,
    pub mac_address: Option<String>,
    pub docker_socket: String,
    pub env: BTreeMap<String, String>,
    pub sbom_destination: Option<PathBuf>,
    pub report_destination: Option<PathBuf>,
}

impl LifecyclePlan {
    pub fn app_dir(&self) -> &str {
        if self.app_dir.is_empty() {
            WORKSPACE_DIR
        } else {
            &self.app_dir
        }
    }

    /// Default process type, forcing `web` where the platform API requires one
    pub fn process_type(&self) -> Option<String> {
        match &self.default_process {
            Some(p) if !p.is_empty() => Some(p.clone()),
            _ if self.api.at_least(0, 4) && self.api.less_than(0, 6) => {
                Some(DEFAULT_PROCESS_TYPE.to_string())
            }
            _ => None,
        }
    }

    /// Registries the analyzer and exporter talk to when publishing
    pub fn registry_images(&self) -> Vec<String> {
        let mut images = vec![self.image.to_string()];
        if !self.run_image.is_empty() {
            images.push(self.run_image.clone());
        }
        if let CacheHandle::Image { reference } = &self.build_cache {
            images.push(reference.to_string());
        }
        if let Some(previous) = &self.previous_image {
            images.push(previous.to_string());
        }
        images
    }

    pub fn layout(&self) -> bool {
        self.layout_repo.is_some()
    }

    /// Host directory the exporter writes the app image layout to
    pub fn layout_image_dir(&self) -> Option<PathBuf> {
        self.layout_repo
            .as_ref()
            .map(|repo| repo.join(self.image.layout_path()))
    }

    fn exports_to_daemon(&self) -> bool {
        !self.publish && !self.layout()
    }

    fn check_previous_image(&self) -> PackResult<()> {
        if let Some(previous) = &self.previous_image {
            if self.publish && !previous.same_registry(&self.image) {
                return Err(PackError::invalid(format!(
                    "when --publish is used, <previous-image> must be in the same image registry as <image> \
                     (image registry = {}, previous-image registry = {})",
                    self.image.registry(),
                    previous.registry()
                )));
            }
        }
        Ok(())
    }
}

/// A file written into the phase container before it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFile {
    pub path: String,
    pub contents: Vec<u8>,
}

/// One phase container, before creation
#[derive(Debug, Clone)]
pub struct PhaseSpec {
    pub name: String,
    pub image: String,
    pub flags: Vec<String>,
    pub args: Vec<String>,
    pub user: Option<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub network: Option<String>,
    pub mac_address: Option<String>,
    /// Written before start
    pub files: Vec<PhaseFile>,
    /// Copy the app source into the app dir before start
    pub copy_app: bool,
    /// Container path to host path, copied after a successful run
    pub copy_out: Vec<(String, PathBuf)>,
    /// Images whose registries need credentials in the envelope
    pub registry_images: Vec<String>,
}

impl PhaseSpec {
    fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            flags: Vec::new(),
            args: Vec::new(),
            user: None,
            env: BTreeMap::new(),
            mounts: Vec::new(),
            network: None,
            mac_address: None,
            files: Vec::new(),
            copy_app: false,
            copy_out: Vec::new(),
            registry_images: Vec::new(),
        }
    }

    /// `/cnb/lifecycle/<name>` followed by flags then args
    pub fn cmd(&self) -> Vec<String> {
        let mut cmd = vec![format!("{}/{}", LIFECYCLE_DIR, self.name)];
        cmd.extend(self.flags.iter().cloned());
        cmd.extend(self.args.iter().cloned());
        cmd
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.cmd().iter().any(|a| a == flag)
    }

    /// Value following `flag`, if present
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        let cmd = self.cmd();
        cmd.iter()
            .position(|a| a == flag)
            .and_then(|i| cmd.get(i + 1).cloned())
    }

    pub fn flag(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.flags.push(flag.to_string());
        self.flags.push(value.into());
        self
    }

    pub fn switch(mut self, flag: &str) -> Self {
        self.flags.push(flag.to_string());
        self
    }

    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        if !self.mounts.iter().any(|m| m.target() == mount.target()) {
            self.mounts.push(mount);
        }
        self
    }

    pub fn with_root(mut self) -> Self {
        self.user = Some("root".to_string());
        self
    }

    /// Root user plus the daemon socket bind
    pub fn with_daemon_access(self, socket: &str) -> Self {
        self.with_root().with_mount(Mount::bind(socket, socket))
    }

    /// Credentials for every registry the phase touches
    pub fn with_registry_access(self, envelope: impl Into<String>) -> Self {
        self.with_env(REGISTRY_AUTH_ENV, envelope)
    }

    fn with_file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push(PhaseFile {
            path: path.to_string(),
            contents: contents.into(),
        });
        self
    }

    fn with_layout(self, repo: &Path) -> Self {
        self.with_mount(Mount::bind(repo, LAYOUT_DIR))
            .with_env("CNB_USE_LAYOUT", "true")
            .with_env("CNB_LAYOUT_DIR", LAYOUT_DIR)
            .with_env("CNB_EXPERIMENTAL_MODE", "warn")
    }

    fn with_cache_mount(self, cache: &CacheHandle, target: &str) -> Self {
        match cache.mount(target) {
            Some(mount) => self.with_mount(mount),
            None => self,
        }
    }

    /// Container creation spec
    pub fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            image: self.image.clone(),
            entrypoint: Some(String::new()),
            cmd: self.cmd(),
            user: self.user.clone(),
            env: self.env.clone(),
            mounts: self.mounts.clone(),
            network: self.network.clone(),
            mac_address: self.mac_address.clone(),
            working_dir: None,
            labels: BTreeMap::from([(PHASE_LABEL.to_string(), "pack".to_string())]),
            security_opt: Vec::new(),
        }
    }
}

/// Creates phase specs for one build
pub struct PhaseFactory<'a> {
    plan: &'a LifecyclePlan,
}

impl<'a> PhaseFactory<'a> {
    pub fn new(plan: &'a LifecyclePlan) -> Self {
        Self { plan }
    }

    /// Spec for the lifecycle binary `name`
    pub fn make_phase(&self, name: &str) -> PackResult<PhaseSpec> {
        match name {
            "creator" => self.creator(),
            "detector" => Ok(self.detector()),
            "analyzer" => self.analyzer(),
            "restorer" => Ok(self.restorer()),
            "builder" => Ok(self.builder()),
            "exporter" => self.exporter(),
            other => Err(PackError::Internal(format!("unknown lifecycle phase '{}'", other))),
        }
    }

    /// Settings common to every phase
    fn base(&self, name: &str, image: &str) -> PhaseSpec {
        let plan = self.plan;
        let mut spec = PhaseSpec::new(name, image);
        if plan.verbose {
            spec.flags.extend(["-log-level".to_string(), "debug".to_string()]);
        }
        spec.network = plan.network.clone();
        spec.mac_address = plan.mac_address.clone();
        spec.env.extend(plan.env.clone());
        spec = spec
            .with_env(PLATFORM_API_ENV, plan.api.to_string())
            .with_mount(Mount::volume(&plan.layers_volume, LAYERS_DIR))
            .with_mount(Mount::volume(&plan.app_volume, plan.app_dir()));
        if let Some(repo) = &plan.layout_repo {
            spec = spec.with_layout(repo);
        }
        spec
    }

    /// Untrusted analyze/restore/export run in the lifecycle image as root
    fn privileged(&self, name: &str) -> PhaseSpec {
        let plan = self.plan;
        self.base(name, &plan.lifecycle_image)
            .with_env(ENV_UID, plan.uid.to_string())
            .with_env(ENV_GID, plan.gid.to_string())
            .with_root()
    }

    fn with_user_volumes(&self, mut spec: PhaseSpec) -> PhaseSpec {
        for mount in &self.plan.volumes {
            spec = spec.with_mount(mount.clone());
        }
        spec
    }

    fn with_epoch(&self, spec: PhaseSpec) -> PhaseSpec {
        match self.plan.creation_time {
            Some(time) if self.plan.api.at_least(0, 9) => {
                spec.with_env(SOURCE_DATE_EPOCH_ENV, time.timestamp().to_string())
            }
            _ => spec,
        }
    }

    fn with_gid(&self, spec: PhaseSpec) -> PhaseSpec {
        match self.plan.gid_override {
            Some(gid) => spec.flag("-gid", gid.to_string()),
            None => spec,
        }
    }

    fn with_outputs(&self, mut spec: PhaseSpec) -> PhaseSpec {
        if let Some(dest) = &self.plan.sbom_destination {
            spec.copy_out.push((SBOM_DIR.to_string(), dest.clone()));
        }
        if let Some(dest) = &self.plan.report_destination {
            spec.copy_out.push((REPORT_PATH.to_string(), dest.clone()));
        }
        spec
    }

    fn with_export_target(&self, spec: PhaseSpec) -> PhaseSpec {
        let plan = self.plan;
        if plan.exports_to_daemon() {
            let spec = spec
                .with_daemon_access(&plan.docker_socket)
                .switch("-daemon")
                .flag("-launch-cache", LAUNCH_CACHE_DIR);
            spec.with_cache_mount(&plan.launch_cache, LAUNCH_CACHE_DIR)
        } else {
            let mut spec = spec.with_root();
            spec.registry_images = plan.registry_images();
            spec
        }
    }

    fn with_project_metadata(&self, spec: PhaseSpec) -> PhaseSpec {
        spec.with_file(PROJECT_METADATA_PATH, self.plan.project_metadata.as_bytes())
    }

    fn with_stack_files(&self, spec: PhaseSpec, both: bool) -> PackResult<PhaseSpec> {
        let plan = self.plan;
        let mut spec = spec;
        if both || plan.api.less_than(0, 12) {
            spec = spec.with_file(STACK_TOML_PATH, stack_toml(&plan.run_images)?);
        }
        if both || plan.api.at_least(0, 12) {
            spec = spec.with_file(RUN_TOML_PATH, run_toml(&plan.run_images)?);
        }
        Ok(spec)
    }

    /// All phases in one container in the builder image
    fn creator(&self) -> PackResult<PhaseSpec> {
        let plan = self.plan;
        plan.check_previous_image()?;

        let mut spec = self
            .base("creator", &plan.builder_image)
            .flag("-app", plan.app_dir())
            .flag("-cache-dir", CACHE_DIR)
            .flag("-run-image", &plan.run_image);
        for tag in &plan.additional_tags {
            spec = spec.flag("-tag", tag);
        }
        if plan.clear_cache {
            spec = spec.switch("-skip-restore");
        }
        spec = self.with_gid(spec);
        if let Some(previous) = &plan.previous_image {
            spec = spec.flag("-previous-image", previous.to_string());
        }
        if let Some(process) = plan.process_type() {
            spec = spec.flag("-process-type", process);
        }
        spec = match &plan.build_cache {
            CacheHandle::Image { reference } => spec.flag("-cache-image", reference.to_string()),
            cache => spec.with_cache_mount(cache, CACHE_DIR),
        };
        spec = self.with_user_volumes(spec);
        spec = self.with_epoch(spec);
        spec = self.with_project_metadata(spec);
        spec = self.with_outputs(spec);
        spec.copy_app = true;
        spec.args.push(plan.image.to_string());
        Ok(self.with_export_target(spec))
    }

    fn detector(&self) -> PhaseSpec {
        let plan = self.plan;
        let mut spec = self
            .base("detector", &plan.builder_image)
            .flag("-app", plan.app_dir());
        spec = self.with_user_volumes(spec);
        spec.copy_app = true;
        spec
    }

    fn analyzer(&self) -> PackResult<PhaseSpec> {
        let plan = self.plan;
        plan.check_previous_image()?;
        let legacy = plan.api.less_than(0, 7);

        let mut spec = self.privileged("analyzer");
        if plan.clear_cache {
            if legacy || plan.api.at_least(0, 9) {
                spec = spec.switch("-skip-layers");
            }
        } else {
            match &plan.build_cache {
                CacheHandle::Image { reference } => {
                    spec = spec.flag("-cache-image", reference.to_string());
                }
                cache if legacy => {
                    spec = spec.flag("-cache-dir", CACHE_DIR).with_cache_mount(cache, CACHE_DIR);
                }
                _ => {}
            }
        }
        spec = self.with_gid(spec);

        let mut image = plan.image.to_string();
        if let Some(previous) = &plan.previous_image {
            if legacy {
                image = previous.to_string();
            } else {
                spec = spec.flag("-previous-image", previous.to_string());
            }
        }

        if !legacy {
            for tag in &plan.additional_tags {
                spec = spec.flag("-tag", tag);
            }
            if !plan.run_image.is_empty() {
                spec = spec.flag("-run-image", &plan.run_image);
            }
            spec = if plan.api.less_than(0, 12) {
                spec.flag("-stack", STACK_TOML_PATH)
            } else {
                spec.flag("-run", RUN_TOML_PATH)
            };
            spec = self.with_stack_files(spec, false)?;
        }

        if plan.exports_to_daemon() {
            spec = spec.with_daemon_access(&plan.docker_socket).switch("-daemon");
            if plan.api.at_least(0, 9) {
                spec = spec
                    .flag("-launch-cache", LAUNCH_CACHE_DIR)
                    .with_cache_mount(&plan.launch_cache, LAUNCH_CACHE_DIR);
            }
        } else {
            spec.registry_images = plan.registry_images();
        }
        spec.args.push(image);
        Ok(spec)
    }

    fn restorer(&self) -> PhaseSpec {
        let plan = self.plan;
        let mut spec = self.privileged("restorer");
        if plan.clear_cache {
            spec = spec.switch("-skip-layers");
        }
        match &plan.build_cache {
            CacheHandle::Image { reference } => {
                spec = spec.flag("-cache-image", reference.to_string());
                spec.registry_images.push(reference.to_string());
            }
            cache => {
                spec = spec.flag("-cache-dir", CACHE_DIR).with_cache_mount(cache, CACHE_DIR);
            }
        }
        spec = self.with_gid(spec);
        if plan.api.at_least(0, 12) && plan.exports_to_daemon() {
            spec = spec.with_daemon_access(&plan.docker_socket).switch("-daemon");
        }
        if plan.layout() && plan.api.at_least(0, 12) {
            spec = self.with_user_volumes(spec);
        }
        spec
    }

    fn builder(&self) -> PhaseSpec {
        let plan = self.plan;
        let spec = self
            .base("builder", &plan.builder_image)
            .flag("-app", plan.app_dir());
        self.with_user_volumes(spec)
    }

    fn exporter(&self) -> PackResult<PhaseSpec> {
        let plan = self.plan;
        let mut spec = self
            .privileged("exporter")
            .flag("-app", plan.app_dir())
            .flag("-cache-dir", CACHE_DIR);
        spec = if plan.api.less_than(0, 12) {
            spec.flag("-stack", STACK_TOML_PATH)
        } else {
            spec.flag("-run", RUN_TOML_PATH)
        };
        if plan.api.less_than(0, 7) {
            spec = spec.flag("-run-image", &plan.run_image);
        }
        if let Some(process) = plan.process_type() {
            spec = spec.flag("-process-type", process);
        }
        spec = self.with_gid(spec);
        spec = match &plan.build_cache {
            CacheHandle::Image { reference } => spec.flag("-cache-image", reference.to_string()),
            cache => spec.with_cache_mount(cache, CACHE_DIR),
        };
        spec = self.with_epoch(spec);
        // stack.toml and run.toml both exist so any lifecycle finds its file
        spec = self.with_stack_files(spec, true)?;
        spec = self.with_project_metadata(spec);
        spec = self.with_outputs(spec);
        if plan.layout() && plan.api.at_least(0, 12) {
            spec = self.with_user_volumes(spec);
        }
        spec.args.push(plan.image.to_string());
        spec.args.extend(plan.additional_tags.iter().cloned());
        Ok(self.with_export_target(spec))
    }
}
