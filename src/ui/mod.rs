//! Terminal output for the `pack` binary
//!
//! Styled with `console` in a terminal and plain `[OK]`/`[WARN]` prefixes
//! everywhere else, so CI logs stay greppable.
//!
//! ```rust,ignore
//! use pack::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Creating builder...");
//! spinner.stop("Builder created");
//! ui::key_value(&ctx, "Stack", "io.buildpacks.stacks.jammy");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{header, key_value, list, note, section, step_info, step_ok, step_warn, step_warn_hint, success};
pub use progress::{BuildProgress, TaskSpinner};
