//! Spinners and the interactive build view

use super::context::UiContext;
use crate::lifecycle::{BuildObserver, BuildState};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(120);
const MAX_LINE: usize = 60;

/// One long-running step; a spinner in a terminal, a single line elsewhere
pub struct TaskSpinner {
    bar: Option<ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            bar: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
            );
            bar.set_message(message.to_string());
            bar.enable_steady_tick(TICK);
            self.bar = Some(bar);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        self.finish();
        if self.interactive {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        self.finish();
        if self.interactive {
            println!("{} {}", style("✗").red(), message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Build observer that draws one bar over the lifecycle phases
///
/// Phase output replaces the bar's message in a terminal. Without one,
/// only state changes are printed since the lines already reach the log.
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    pub fn new(ctx: &UiContext, image: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            // init, the phases, tag
            let bar = ProgressBar::new(7);
            bar.set_style(
                ProgressStyle::with_template(
                    "  {spinner:.cyan} {prefix:.bold} {bar:20.cyan/dim} {wide_msg:.dim} {elapsed:.dim}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("━╸─"),
            );
            bar.set_prefix(image.to_string());
            bar.enable_steady_tick(TICK);
            Some(bar)
        } else {
            println!("Building {}...", image);
            None
        };
        Self { bar }
    }
}

impl BuildObserver for BuildProgress {
    fn on_state(&self, state: &BuildState) {
        let Some(bar) = &self.bar else {
            if let BuildState::Failed { phase, .. } = state {
                println!("  {} {}", style("[FAIL]").red(), phase);
            } else if state.binary().is_some() {
                println!("  {} {}", style("[..]").dim(), state);
            }
            return;
        };
        match state {
            BuildState::Done => {
                bar.disable_steady_tick();
                bar.finish_and_clear();
            }
            BuildState::Failed { phase, .. } => {
                bar.abandon_with_message(format!("failed in {}", phase));
            }
            other => {
                bar.inc(1);
                bar.set_message(other.to_string());
            }
        }
    }

    fn on_output(&self, phase: &str, line: &str) {
        if let Some(bar) = &self.bar {
            let line = line.trim();
            if !line.is_empty() {
                bar.set_message(format!("[{}] {}", phase, truncate(line, MAX_LINE)));
            }
        }
    }
}

/// Cut at a char boundary and mark the cut with `...`
fn truncate(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let kept: String = line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn spinner_plain_mode() {
        let ctx = UiContext::non_interactive();
        let mut spinner = TaskSpinner::new(&ctx);
        spinner.start("Creating builder...");
        spinner.stop("Builder created");
    }

    #[test]
    fn build_progress_plain_mode_handles_every_state() {
        let progress = BuildProgress::new(&UiContext::non_interactive(), "app");
        for state in [BuildState::Init, BuildState::Detect, BuildState::Export, BuildState::Done] {
            progress.on_state(&state);
        }
        progress.on_state(&BuildState::Failed {
            phase: "build".into(),
            kind: ErrorKind::PhaseFailed,
        });
        progress.on_output("build", "npm install");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 8), "ééééé...");
    }
}
