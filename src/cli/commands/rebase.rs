//! Rebase command - move an app image onto a new run image

use crate::cli::args::RebaseArgs;
use crate::config::{Config, ConfigManager};
use crate::error::PackResult;
use crate::rebase::RebaseOptions;
use crate::ui::{self, UiContext};

pub async fn execute(args: RebaseArgs, manager: &ConfigManager, config: Config) -> PackResult<()> {
    let ctx = UiContext::detect();
    let opts = RebaseOptions {
        publish: args.publish,
        pull_policy: super::pull_policy(args.pull_policy.as_deref(), &config)?,
        run_image: args.run_image,
        ..RebaseOptions::new(&args.image)
    };
    let client = super::connect(manager, config, None).await?;

    let report = client.rebase(opts).await?;
    ui::success(&ctx, &format!("Rebased {} onto {}", report.image, report.run_image));
    ui::key_value(&ctx, "Identifier", &report.identifier);
    ui::key_value(&ctx, "Top layer", &report.top_layer);
    Ok(())
}
