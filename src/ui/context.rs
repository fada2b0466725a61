//! Whether output goes to a person or to a log

use std::io::IsTerminal;

/// CI systems that set their own marker instead of `CI`
const CI_MARKERS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
    "TEKTON_PIPELINE_RUN",
];

#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
}

impl UiContext {
    /// Interactive only on a terminal outside CI
    pub fn detect() -> Self {
        Self {
            interactive: std::io::stdout().is_terminal()
                && !CI_MARKERS.iter().any(|var| std::env::var_os(var).is_some()),
        }
    }

    pub fn non_interactive() -> Self {
        Self { interactive: false }
    }

    pub fn with_color(self, enabled: bool) -> Self {
        if !enabled {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Spinners and progress bars
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}
