//! Build states and the observers that watch them
//!
//! Each build walks `Init -> (Detect, Analyze, Restore, Build, Export) -> Tag -> Done`
//! or ends in `Failed`. Observers see every state exactly once. When all
//! phases share one creator container the phase states are driven by the
//! lifecycle's `===> PHASE` banners instead.

use crate::error::ErrorKind;
use crate::lifecycle::platform::ApiVersion;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    Init,
    Detect,
    Analyze,
    Restore,
    Build,
    Export,
    Tag,
    Done,
    Failed { phase: String, kind: ErrorKind },
}

impl BuildState {
    /// Phase states in execution order for `api`
    pub fn phases(api: ApiVersion) -> Vec<BuildState> {
        let mut phases = if api.less_than(0, 7) {
            vec![Self::Detect, Self::Analyze]
        } else {
            vec![Self::Analyze, Self::Detect]
        };
        phases.extend([Self::Restore, Self::Build, Self::Export]);
        phases
    }

    /// State announced by a lifecycle banner line such as `===> DETECTING`
    pub fn from_banner(line: &str) -> Option<Self> {
        let banner = line.trim().strip_prefix("===>")?.trim();
        match banner.split_whitespace().next()? {
            "DETECTING" => Some(Self::Detect),
            "ANALYZING" => Some(Self::Analyze),
            "RESTORING" => Some(Self::Restore),
            "BUILDING" => Some(Self::Build),
            "EXPORTING" => Some(Self::Export),
            _ => None,
        }
    }

    /// Lifecycle binary for a phase state
    pub fn binary(&self) -> Option<&'static str> {
        match self {
            Self::Detect => Some("detector"),
            Self::Analyze => Some("analyzer"),
            Self::Restore => Some("restorer"),
            Self::Build => Some("builder"),
            Self::Export => Some("exporter"),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Detect => write!(f, "detect"),
            Self::Analyze => write!(f, "analyze"),
            Self::Restore => write!(f, "restore"),
            Self::Build => write!(f, "build"),
            Self::Export => write!(f, "export"),
            Self::Tag => write!(f, "tag"),
            Self::Done => write!(f, "done"),
            Self::Failed { phase, kind } => write!(f, "failed in {} ({:?})", phase, kind),
        }
    }
}

/// Receives state transitions and phase output
pub trait BuildObserver: Send + Sync {
    fn on_state(&self, state: &BuildState);

    fn on_output(&self, _phase: &str, _line: &str) {}
}

/// Logs each transition through tracing
pub struct LogObserver;

impl BuildObserver for LogObserver {
    fn on_state(&self, state: &BuildState) {
        match state {
            BuildState::Detect => info!("===> DETECTING"),
            BuildState::Analyze => info!("===> ANALYZING"),
            BuildState::Restore => info!("===> RESTORING"),
            BuildState::Build => info!("===> BUILDING"),
            BuildState::Export => info!("===> EXPORTING"),
            other => tracing::debug!("Build state: {}", other),
        }
    }
}

/// Records states; handy for tests and the interactive view
#[derive(Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<BuildState>>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<BuildState> {
        self.states
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl BuildObserver for RecordingObserver {
    fn on_state(&self, state: &BuildState) {
        if let Ok(mut states) = self.states.lock() {
            states.push(state.clone());
        }
    }
}

struct Progress {
    current: BuildState,
    emitted: Vec<BuildState>,
}

/// Drives observers and guarantees each state is emitted once
pub struct StateTracker {
    phases: Vec<BuildState>,
    progress: Mutex<Progress>,
    observers: Vec<Arc<dyn BuildObserver>>,
}

impl StateTracker {
    pub fn new(api: ApiVersion, observers: Vec<Arc<dyn BuildObserver>>) -> Self {
        Self {
            phases: BuildState::phases(api),
            progress: Mutex::new(Progress {
                current: BuildState::Init,
                emitted: Vec::new(),
            }),
            observers,
        }
    }

    /// Phase states in execution order
    pub fn phases(&self) -> &[BuildState] {
        &self.phases
    }

    pub fn current(&self) -> BuildState {
        self.lock().current.clone()
    }

    /// Move to `state`; repeated transitions into an emitted state are ignored
    pub fn enter(&self, state: BuildState) {
        {
            let mut progress = self.lock();
            if progress.current.is_terminal() || progress.emitted.contains(&state) {
                return;
            }
            progress.emitted.push(state.clone());
            progress.current = state.clone();
        }
        for observer in &self.observers {
            observer.on_state(&state);
        }
    }

    /// Emit the phase states nobody announced, in execution order
    pub fn complete_phases(&self) {
        let missing: Vec<BuildState> = {
            let progress = self.lock();
            self.phases
                .iter()
                .filter(|p| !progress.emitted.contains(p))
                .cloned()
                .collect()
        };
        for state in missing {
            self.enter(state);
        }
    }

    /// Terminal failure in the current phase
    pub fn fail(&self, kind: ErrorKind) -> BuildState {
        let phase = self.current().to_string();
        self.fail_in(&phase, kind)
    }

    /// Terminal failure attributed to `phase`
    pub fn fail_in(&self, phase: &str, kind: ErrorKind) -> BuildState {
        let failed = BuildState::Failed {
            phase: phase.to_string(),
            kind,
        };
        self.enter(failed.clone());
        failed
    }

    /// Forward a line of phase output, advancing on creator banners
    pub fn output(&self, phase: &str, line: &str, follow_banners: bool) {
        if follow_banners {
            if let Some(state) = BuildState::from_banner(line) {
                self.enter(state);
            }
        }
        for observer in &self.observers {
            observer.on_output(phase, line);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(api: ApiVersion) -> (StateTracker, Arc<RecordingObserver>) {
        let recorder = Arc::new(RecordingObserver::default());
        let observer: Arc<dyn BuildObserver> = recorder.clone();
        (StateTracker::new(api, vec![observer]), recorder)
    }

    #[test]
    fn phase_order_depends_on_platform_api() {
        assert_eq!(
            BuildState::phases(ApiVersion::new(0, 6))[..2],
            [BuildState::Detect, BuildState::Analyze]
        );
        assert_eq!(
            BuildState::phases(ApiVersion::new(0, 7))[..2],
            [BuildState::Analyze, BuildState::Detect]
        );
    }

    #[test]
    fn banners_drive_states_once() {
        let (tracker, recorder) = tracker(ApiVersion::new(0, 13));
        tracker.enter(BuildState::Init);
        for line in ["===> ANALYZING", "===> DETECTING", "noise", "===> DETECTING", "===> BUILDING"] {
            tracker.output("creator", line, true);
        }
        tracker.complete_phases();
        tracker.enter(BuildState::Tag);
        tracker.enter(BuildState::Done);

        assert_eq!(
            recorder.states(),
            vec![
                BuildState::Init,
                BuildState::Analyze,
                BuildState::Detect,
                BuildState::Build,
                BuildState::Restore,
                BuildState::Export,
                BuildState::Tag,
                BuildState::Done,
            ]
        );
    }

    #[test]
    fn failure_is_terminal() {
        let (tracker, recorder) = tracker(ApiVersion::new(0, 13));
        tracker.enter(BuildState::Init);
        tracker.enter(BuildState::Analyze);
        let failed = tracker.fail(ErrorKind::PhaseFailed);
        tracker.enter(BuildState::Detect);

        assert_eq!(
            failed,
            BuildState::Failed {
                phase: "analyze".into(),
                kind: ErrorKind::PhaseFailed
            }
        );
        assert_eq!(recorder.states().len(), 3);
        assert_eq!(recorder.states().last(), Some(&failed));
    }

    #[test]
    fn banners_ignored_without_creator() {
        let (tracker, recorder) = tracker(ApiVersion::new(0, 13));
        tracker.output("builder", "===> EXPORTING", false);
        assert!(recorder.states().is_empty());
        assert_eq!(BuildState::from_banner("===> RESTORING"), Some(BuildState::Restore));
        assert_eq!(BuildState::from_banner("DETECTING"), None);
    }
}
