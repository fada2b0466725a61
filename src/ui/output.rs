//! Line-oriented output helpers shared by every command

use super::context::UiContext;
use console::style;

/// Bold heading, e.g. the image name above an inspect report
pub fn header(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        println!("{}", style(title).cyan().bold());
    } else {
        println!("{}", title);
    }
}

/// Blank line plus a bold sub-heading
pub fn section(_ctx: &UiContext, title: &str) {
    println!();
    println!("{}", style(title).bold());
}

pub fn success(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        println!("{} {}", style("✓").green().bold(), style(message).bold());
    } else {
        println!("{} {}", style("[OK]").green(), message);
    }
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {}", style("✓").green(), message);
    } else {
        println!("  {} {}", style("[OK]").green(), message);
    }
}

pub fn step_warn(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {}", style("!").yellow(), message);
    } else {
        println!("  {} {}", style("[WARN]").yellow(), message);
    }
}

pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {} - {}", style("!").yellow(), message, style(hint).dim());
    } else {
        println!("  {} {} - {}", style("[WARN]").yellow(), message, hint);
    }
}

pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {}", style("›").cyan(), message);
    } else {
        println!("  {} {}", style("[INFO]").cyan(), message);
    }
}

/// Dimmed aside under the previous line
pub fn note(_ctx: &UiContext, message: &str) {
    println!("  {}", style(message).dim());
}

pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    let value = if value.is_empty() { "(none)" } else { value };
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}

/// Indented items, or `(none)` for an empty list
pub fn list<S: AsRef<str>>(_ctx: &UiContext, items: &[S]) {
    if items.is_empty() {
        println!("    (none)");
    }
    for item in items {
        println!("    {}", item.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_output_does_not_panic() {
        let ctx = UiContext::non_interactive();
        header(&ctx, "registry.example.com/app");
        success(&ctx, "Done");
        step_warn_hint(&ctx, "Builder is untrusted", "run pack config trusted-builders add");
        key_value(&ctx, "Stack", "");
        list::<&str>(&ctx, &[]);
    }
}
