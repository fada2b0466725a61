//! The per-build lifecycle state machine
//!
//! `Init` prepares volumes and caches, then each phase container runs to
//! completion before the next one is created. With a trusted builder a
//! single creator container replaces the five phases. The layers and app
//! volumes are kept when a build fails or is cancelled; the caller deletes
//! them with [`LifecycleExecutor::cleanup`] once the image is tagged.

use crate::archive::{self, ModeRule};
use crate::cache::volume_labels;
use crate::creds::{lifecycle_envelope, Keychain};
use crate::error::{ErrorKind, PackError, PackResult};
use crate::image::ImageRef;
use crate::lifecycle::interrupt::{Interrupt, InterruptLevel};
use crate::lifecycle::phase::{LifecyclePlan, PhaseFactory, PhaseSpec};
use crate::lifecycle::platform::ApiVersion;
use crate::lifecycle::state::{BuildState, StateTracker};
use crate::orchestration::{ContainerRuntime, OutputTail};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Map a nonzero phase exit code to the phase it belongs to and an error
///
/// Creator codes carry the failing phase in their tens digit.
pub fn classify_exit(binary: &str, api: ApiVersion, code: i64, output: String) -> (Option<BuildState>, PackError) {
    let no_group = |code: i64| code == 6 || code == 100 || (code == 20 && api.at_least(0, 6));
    let phase = match binary {
        "detector" => Some(BuildState::Detect),
        "analyzer" => Some(BuildState::Analyze),
        "restorer" => Some(BuildState::Restore),
        "builder" => Some(BuildState::Build),
        "exporter" => Some(BuildState::Export),
        _ => match code {
            20 | 21 => Some(BuildState::Detect),
            30..=39 => Some(BuildState::Analyze),
            40..=49 => Some(BuildState::Restore),
            50..=59 => Some(BuildState::Build),
            60..=69 => Some(BuildState::Export),
            _ => None,
        },
    };

    let error = match &phase {
        Some(BuildState::Detect) if no_group(code) => PackError::NoMatchingGroup { code },
        Some(state) => PackError::PhaseFailed {
            phase: state.to_string(),
            code,
            output,
        },
        None => PackError::PhaseFailed {
            phase: binary.to_string(),
            code,
            output,
        },
    };
    (phase, error)
}

pub struct LifecycleExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    keychain: Arc<Keychain>,
    interrupt: Interrupt,
    tracker: Arc<StateTracker>,
}

impl LifecycleExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        keychain: Arc<Keychain>,
        interrupt: Interrupt,
        tracker: Arc<StateTracker>,
    ) -> Self {
        Self {
            runtime,
            keychain,
            interrupt,
            tracker,
        }
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Run every phase for `plan` against the source at `app_path`
    pub async fn run(&self, plan: &LifecyclePlan, app_path: &Path) -> PackResult<()> {
        self.tracker.enter(BuildState::Init);
        let result = self.execute(plan, app_path).await;
        if let Err(e) = &result {
            // no-op when a phase already recorded its failure
            self.tracker.fail(e.kind());
        }
        result
    }

    /// Delete the per-build volumes; caches are left alone
    pub async fn cleanup(&self, plan: &LifecyclePlan) -> PackResult<()> {
        for volume in [&plan.layers_volume, &plan.app_volume] {
            debug!("Removing volume {}", volume);
            self.runtime.volume_remove(volume).await?;
        }
        Ok(())
    }

    async fn execute(&self, plan: &LifecyclePlan, app_path: &Path) -> PackResult<()> {
        self.prepare(plan).await?;
        let factory = PhaseFactory::new(plan);

        if plan.use_creator {
            self.check_cancelled("init")?;
            let spec = factory.make_phase("creator")?;
            self.run_phase(plan, app_path, spec, true).await?;
            self.tracker.complete_phases();
            return Ok(());
        }

        for state in self.tracker.phases().to_vec() {
            self.check_cancelled(&self.tracker.current().to_string())?;
            self.tracker.enter(state.clone());

            if state == BuildState::Restore && plan.clear_cache && plan.api.less_than(0, 10) {
                info!("Skipping 'restore' due to clearing cache");
                continue;
            }
            let binary = state
                .binary()
                .ok_or_else(|| PackError::Internal(format!("no lifecycle binary for state {}", state)))?;
            let spec = factory.make_phase(binary)?;
            self.run_phase(plan, app_path, spec, false).await?;
        }
        Ok(())
    }

    async fn prepare(&self, plan: &LifecyclePlan) -> PackResult<()> {
        if plan.clear_cache {
            plan.build_cache.clear(self.runtime.as_ref()).await?;
            debug!("Build cache {} cleared", plan.build_cache.name());
        }
        plan.build_cache.ensure(self.runtime.as_ref()).await?;
        if !plan.publish && !plan.layout() {
            plan.launch_cache.ensure(self.runtime.as_ref()).await?;
        }

        for (volume, purpose) in [(&plan.layers_volume, "layers"), (&plan.app_volume, "app")] {
            if !self.runtime.volume_exists(volume).await? {
                self.runtime
                    .volume_create(volume, &volume_labels(purpose, &plan.image))
                    .await?;
            } else {
                debug!("Reusing {} volume {}", purpose, volume);
            }
        }
        Ok(())
    }

    fn check_cancelled(&self, phase: &str) -> PackResult<()> {
        if self.interrupt.is_cancelled() {
            self.tracker.fail_in(phase, ErrorKind::Cancelled);
            return Err(PackError::Cancelled {
                phase: phase.to_string(),
            });
        }
        Ok(())
    }

    async fn run_phase(
        &self,
        plan: &LifecyclePlan,
        app_path: &Path,
        mut spec: PhaseSpec,
        follow_banners: bool,
    ) -> PackResult<()> {
        if !spec.registry_images.is_empty() {
            let registries = spec
                .registry_images
                .iter()
                .map(|image| ImageRef::parse(image).map(|r| r.registry().to_string()))
                .collect::<PackResult<Vec<_>>>()?;
            let envelope = lifecycle_envelope(&self.keychain, registries.iter().map(String::as_str)).await?;
            spec = spec.with_registry_access(envelope);
        }

        debug!("Creating {} container from {}", spec.name, spec.image);
        let id = self.runtime.container_create(&spec.container_spec()).await?;
        let result = self.drive(plan, app_path, &spec, &id, follow_banners).await;

        if self.interrupt.level() < InterruptLevel::Abandon {
            if let Err(e) = self.runtime.container_remove(&id).await {
                warn!("Failed to remove {} container {}: {}", spec.name, id, e);
            }
        }
        result
    }

    async fn drive(
        &self,
        plan: &LifecyclePlan,
        app_path: &Path,
        spec: &PhaseSpec,
        id: &str,
        follow_banners: bool,
    ) -> PackResult<()> {
        let staging = tempfile::TempDir::new().map_err(|e| PackError::io("creating staging directory", e))?;
        self.copy_in(plan, app_path, spec, id, staging.path()).await?;

        let lines = Arc::new(Mutex::new(OutputTail::default()));
        let on_output = {
            let tracker = Arc::clone(&self.tracker);
            let lines = Arc::clone(&lines);
            let phase = spec.name.clone();
            move |line: String| {
                info!("[{}] {}", phase, line);
                tracker.output(&phase, &line, follow_banners);
                if let Ok(mut lines) = lines.lock() {
                    lines.push(line);
                }
            }
        };

        let wait = self.runtime.start_wait(id, &on_output);
        tokio::pin!(wait);
        let code = tokio::select! {
            code = &mut wait => code?,
            _ = self.interrupt.stopped() => {
                let phase = self.tracker.current().to_string();
                self.halt(id).await;
                self.tracker.fail_in(&phase, ErrorKind::Cancelled);
                return Err(PackError::Cancelled { phase });
            }
        };

        if code != 0 {
            let output = lines.lock().map(|l| l.render()).unwrap_or_default();
            let (state, error) = classify_exit(&spec.name, plan.api, code, output);
            let phase = state.unwrap_or_else(|| self.tracker.current()).to_string();
            self.tracker.fail_in(&phase, error.kind());
            return Err(error);
        }

        self.copy_out(spec, id, staging.path()).await
    }

    /// Stop within the grace period, escalating to kill on a second interrupt
    async fn halt(&self, id: &str) {
        info!("Stopping container {}", id);
        tokio::select! {
            res = self.runtime.stop(id, self.interrupt.grace()) => {
                if let Err(e) = res {
                    warn!("Failed to stop container {}: {}", id, e);
                }
            }
            _ = self.interrupt.killed() => {
                if let Err(e) = self.runtime.kill(id).await {
                    warn!("Failed to kill container {}: {}", id, e);
                }
            }
        }
    }

    async fn copy_in(
        &self,
        plan: &LifecyclePlan,
        app_path: &Path,
        spec: &PhaseSpec,
        id: &str,
        staging: &Path,
    ) -> PackResult<()> {
        let (uid, gid) = (u64::from(plan.uid), u64::from(plan.gid));

        if spec.copy_app {
            let tar = staging.join("app.tar");
            let (src, target, out) = (app_path.to_path_buf(), plan.app_dir().to_string(), tar.clone());
            tokio::task::spawn_blocking(move || {
                archive::write_source_tar(&src, &target, uid, gid, ModeRule::Source, &out)
            })
            .await
            .map_err(|e| PackError::Internal(format!("app archive task failed: {}", e)))??;
            self.runtime.copy_to_container(id, &tar).await?;
        }

        for (i, file) in spec.files.iter().enumerate() {
            let tar = staging.join(format!("file-{}.tar", i));
            archive::write_single_file_tar(&file.path, &file.contents, uid, gid, &tar)?;
            self.runtime.copy_to_container(id, &tar).await?;
        }
        Ok(())
    }

    async fn copy_out(&self, spec: &PhaseSpec, id: &str, staging: &Path) -> PackResult<()> {
        for (i, (path, dest)) in spec.copy_out.iter().enumerate() {
            let tar: PathBuf = staging.join(format!("out-{}.tar", i));
            self.runtime.copy_from_container(id, path, &tar).await?;
            let file = File::open(&tar).map_err(|e| PackError::io(format!("opening {}", tar.display()), e))?;
            archive::extract(file, dest, 0)?;
            info!("Copied {} to {}", path, dest.display());
        }
        Ok(())
    }
}
