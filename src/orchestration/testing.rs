//! In-memory container runtime for tests
//!
//! Records every call, scripts phase exit codes and output, and keeps
//! loaded docker-archives so local images round-trip without a daemon.

use crate::error::{PackError, PackResult};
use crate::image::blob::sha256_digest;
use crate::image::local::extract_archive;
use crate::orchestration::container::{ContainerSpec, ImageInspect, InspectRootFs, VolumeInfo};
use crate::orchestration::runtime::ContainerRuntime;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// What a scripted container does when started
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub exit_code: i64,
    pub output: Vec<String>,
    /// Never exit; used to exercise cancellation
    pub hang: bool,
}

impl ScriptedRun {
    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: code,
            output: Vec::new(),
            hang: false,
        }
    }

    pub fn with_output(mut self, lines: &[&str]) -> Self {
        self.output = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn hang() -> Self {
        Self {
            exit_code: 0,
            output: Vec::new(),
            hang: true,
        }
    }
}

#[derive(Default)]
pub struct FakeState {
    pub images: HashMap<String, ImageInspect>,
    pub archives: HashMap<String, Vec<u8>>,
    pub volumes: BTreeMap<String, HashMap<String, String>>,
    pub containers: Vec<(String, ContainerSpec)>,
    pub started: Vec<String>,
    pub removed: Vec<String>,
    pub copied_in: Vec<(String, Vec<String>)>,
    pub copied_out: Vec<(String, String)>,
    pub stopped: Vec<String>,
    pub killed: Vec<String>,
    pub pulls: Vec<String>,
    pub pushes: Vec<String>,
    pub tags: Vec<(String, String)>,
    pub removed_images: Vec<String>,
    pub runs: VecDeque<ScriptedRun>,
    /// Tar written by `copy_from_container`, keyed by container path
    pub files: HashMap<String, Vec<u8>>,
    /// Images that `image_pull` makes available
    pub registry: HashMap<String, ImageInspect>,
    /// `image_pull` never completes
    pub hang_pulls: bool,
}

/// Fake runtime; all state is behind one mutex
#[derive(Default)]
pub struct FakeRuntime {
    pub state: Mutex<FakeState>,
    pub os: String,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            os: "linux".to_string(),
        }
    }

    pub fn with_image(self, name: &str, inspect: ImageInspect) -> Self {
        self.lock().images.insert(name.to_string(), inspect);
        self
    }

    pub fn with_remote_image(self, name: &str, inspect: ImageInspect) -> Self {
        self.lock().registry.insert(name.to_string(), inspect);
        self
    }

    pub fn script(&self, run: ScriptedRun) {
        self.lock().runs.push_back(run);
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Inspect output for an image carrying `labels`
    pub fn inspect_with_labels(id: &str, labels: &[(&str, &str)]) -> ImageInspect {
        let mut inspect = ImageInspect {
            id: id.to_string(),
            os: "linux".to_string(),
            architecture: "amd64".to_string(),
            ..Default::default()
        };
        let mut settings = crate::image::config::ContainerSettings::default();
        for (k, v) in labels {
            settings.labels.insert(k.to_string(), v.to_string());
        }
        inspect.config = Some(settings);
        inspect.root_fs = Some(InspectRootFs {
            layers: Some(vec![format!("sha256:{}-layer", id.trim_start_matches("sha256:"))]),
        });
        inspect
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn is_available(&self) -> PackResult<bool> {
        Ok(true)
    }

    async fn daemon_os(&self) -> PackResult<String> {
        Ok(self.os.clone())
    }

    fn daemon_socket(&self) -> String {
        "/var/run/docker.sock".to_string()
    }

    async fn image_inspect(&self, image: &str) -> PackResult<Option<ImageInspect>> {
        Ok(self.lock().images.get(image).cloned())
    }

    async fn image_pull(&self, image: &str, _platform: Option<&str>) -> PackResult<()> {
        let hang = {
            let mut state = self.lock();
            state.pulls.push(image.to_string());
            state.hang_pulls
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.lock();
        match state.registry.get(image).cloned() {
            Some(inspect) => {
                state.images.insert(image.to_string(), inspect);
                Ok(())
            }
            None => Err(PackError::ImageNotFound(image.to_string())),
        }
    }

    async fn image_push(&self, image: &str) -> PackResult<()> {
        self.lock().pushes.push(image.to_string());
        Ok(())
    }

    async fn image_tag(&self, source: &str, target: &str) -> PackResult<()> {
        let mut state = self.lock();
        let inspect = state
            .images
            .get(source)
            .cloned()
            .ok_or_else(|| PackError::ImageNotFound(source.to_string()))?;
        state.images.insert(target.to_string(), inspect);
        state.tags.push((source.to_string(), target.to_string()));
        Ok(())
    }

    async fn image_remove(&self, image: &str) -> PackResult<()> {
        let mut state = self.lock();
        state.images.remove(image);
        state.removed_images.push(image.to_string());
        Ok(())
    }

    async fn image_save(&self, image: &str, dest: &Path) -> PackResult<()> {
        let bytes = {
            let state = self.lock();
            let id = state
                .images
                .get(image)
                .map(|i| i.id.clone())
                .unwrap_or_else(|| image.to_string());
            state
                .archives
                .get(&id)
                .cloned()
                .ok_or_else(|| PackError::ImageNotFound(image.to_string()))?
        };
        std::fs::write(dest, bytes).map_err(|e| PackError::io("writing fake archive", e))
    }

    async fn image_load(&self, archive: &Path) -> PackResult<()> {
        let bytes = std::fs::read(archive).map_err(|e| PackError::io("reading fake archive", e))?;
        let extracted = extract_archive(archive)?;
        let config = extracted.config()?;
        let id = sha256_digest(&extracted.config_bytes);
        let tags = extracted.manifest.repo_tags.clone().unwrap_or_default();

        let inspect = ImageInspect {
            id: id.clone(),
            repo_tags: Some(tags.clone()),
            created: config.created.clone(),
            os: config.os.clone(),
            architecture: config.architecture.clone(),
            variant: config.variant.clone(),
            config: Some(config.config.clone()),
            root_fs: Some(InspectRootFs {
                layers: Some(config.rootfs.diff_ids.clone()),
            }),
            ..Default::default()
        };

        let mut state = self.lock();
        state.archives.insert(id.clone(), bytes);
        state.images.insert(id, inspect.clone());
        for tag in tags {
            state.images.insert(tag, inspect.clone());
        }
        Ok(())
    }

    async fn volume_create(&self, name: &str, labels: &HashMap<String, String>) -> PackResult<()> {
        self.lock()
            .volumes
            .entry(name.to_string())
            .or_insert_with(|| labels.clone());
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> PackResult<bool> {
        Ok(self.lock().volumes.contains_key(name))
    }

    async fn volume_remove(&self, name: &str) -> PackResult<()> {
        self.lock().volumes.remove(name);
        Ok(())
    }

    async fn volume_list(&self, prefix: &str) -> PackResult<Vec<VolumeInfo>> {
        Ok(self
            .lock()
            .volumes
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, labels)| VolumeInfo {
                name: name.clone(),
                labels: labels.clone(),
            })
            .collect())
    }

    async fn container_create(&self, spec: &ContainerSpec) -> PackResult<String> {
        let mut state = self.lock();
        for mount in &spec.mounts {
            if let crate::orchestration::Mount::Volume { name, .. } = mount {
                state.volumes.entry(name.clone()).or_default();
            }
        }
        let id = format!("container-{}", state.containers.len() + 1);
        state.containers.push((id.clone(), spec.clone()));
        Ok(id)
    }

    async fn copy_to_container(&self, container_id: &str, archive: &Path) -> PackResult<()> {
        let entries = crate::archive::list_entries(crate::archive::open_tar(archive)?)?;
        self.lock()
            .copied_in
            .push((container_id.to_string(), entries));
        Ok(())
    }

    async fn copy_from_container(&self, container_id: &str, path: &str, dest: &Path) -> PackResult<()> {
        let bytes = {
            let mut state = self.lock();
            state
                .copied_out
                .push((container_id.to_string(), path.to_string()));
            state.files.get(path).cloned()
        };
        match bytes {
            Some(bytes) => {
                std::fs::write(dest, bytes).map_err(|e| PackError::io("writing fake copy", e))
            }
            None => Err(PackError::command_exec("cp", format!("no such path {}", path))),
        }
    }

    async fn start_wait(
        &self,
        container_id: &str,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> PackResult<i64> {
        let run = {
            let mut state = self.lock();
            state.started.push(container_id.to_string());
            state.runs.pop_front().unwrap_or_else(|| ScriptedRun::exit(0))
        };
        for line in &run.output {
            on_output(line.clone());
        }
        if run.hang {
            std::future::pending::<()>().await;
        }
        Ok(run.exit_code)
    }

    async fn stop(&self, container_id: &str, _grace: Duration) -> PackResult<()> {
        self.lock().stopped.push(container_id.to_string());
        Ok(())
    }

    async fn kill(&self, container_id: &str) -> PackResult<()> {
        self.lock().killed.push(container_id.to_string());
        Ok(())
    }

    async fn container_remove(&self, container_id: &str) -> PackResult<()> {
        self.lock().removed.push(container_id.to_string());
        Ok(())
    }

    fn runtime_name(&self) -> &'static str {
        "Fake"
    }
}

