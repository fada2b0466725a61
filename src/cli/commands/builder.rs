//! Builder command - create and inspect builder images

use crate::buildpack::ModuleInfo;
use crate::builder::{render_order, BuilderConfig, BuilderInfo, CreateBuilderOptions};
use crate::cli::args::{BuilderArgs, BuilderCommands, BuilderCreateArgs, BuilderInspectArgs, OutputFormat};
use crate::client::Client;
use crate::config::{Config, ConfigManager};
use crate::error::{PackError, PackResult};
use crate::ui::{self, TaskSpinner, UiContext};
use serde::Serialize;

/// Offered when no builder is given and none is configured
pub(crate) const SUGGESTED_BUILDERS: &[(&str, &str)] = &[
    ("paketobuildpacks/builder-jammy-base", "Java, Go, .NET, Node.js, Python, Ruby, PHP"),
    ("heroku/builder:24", "Go, Java, Node.js, PHP, Python, Ruby, Scala"),
    ("gcr.io/buildpacks/builder:google-22", "Go, Java, Node.js, Python, .NET"),
];

pub async fn execute(args: BuilderArgs, manager: &ConfigManager, config: Config) -> PackResult<()> {
    match args.command {
        BuilderCommands::Create(args) => create(args, manager, config).await,
        BuilderCommands::Inspect(args) => inspect(args, manager, config).await,
    }
}

async fn create(args: BuilderCreateArgs, manager: &ConfigManager, config: Config) -> PackResult<()> {
    let ctx = UiContext::detect();
    let (builder_config, warnings) = BuilderConfig::read(&args.config)?;
    for warning in &warnings {
        ui::step_warn(&ctx, warning);
    }

    let opts = CreateBuilderOptions {
        publish: args.publish,
        pull_policy: super::pull_policy(args.pull_policy.as_deref(), &config)?,
        registry: args.registry,
        labels: super::parse_pairs(&args.labels, "label")?,
        ..CreateBuilderOptions::new(&args.name, builder_config)
    };
    let client = super::connect(manager, config, None).await?;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Creating builder {}...", args.name));
    match client.create_builder(opts).await {
        Ok(image) => {
            spinner.stop(&format!("Successfully created builder image {}", image));
            ui::note(&ctx, &format!("Tip: run pack build <image> --builder {} to use it", image));
            Ok(())
        }
        Err(e) => {
            spinner.stop_error("Builder creation failed");
            Err(e)
        }
    }
}

#[derive(Serialize)]
struct InspectReport {
    builder_name: String,
    trusted: bool,
    default: bool,
    remote_info: Option<BuilderInfo>,
    local_info: Option<BuilderInfo>,
}

async fn inspect(args: BuilderInspectArgs, manager: &ConfigManager, config: Config) -> PackResult<()> {
    let ctx = UiContext::detect();
    let Some(name) = args.name.clone().or_else(|| config.default_builder_image.clone()) else {
        return Err(PackError::Soft(suggestions()));
    };
    let client = super::connect(manager, config, None).await?;

    let remote_info = if args.local { None } else { lookup(&client, &name, false).await? };
    let local_info = if args.remote { None } else { lookup(&client, &name, true).await? };
    let Some(any) = remote_info.as_ref().or(local_info.as_ref()) else {
        return Err(PackError::ImageNotFound(name));
    };

    let report = InspectReport {
        builder_name: name.clone(),
        trusted: any.trusted,
        default: any.default,
        remote_info,
        local_info,
    };
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Toml => print!("{}", toml::to_string_pretty(&report)?),
        OutputFormat::Human => {
            ui::header(&ctx, &format!("Inspecting builder: {}", name));
            ui::key_value(&ctx, "Trusted", if report.trusted { "Yes" } else { "No" });
            if report.default {
                ui::key_value(&ctx, "Default", "Yes");
            }
            if !args.local {
                ui::section(&ctx, "REMOTE:");
                render(&ctx, report.remote_info.as_ref());
            }
            if !args.remote {
                ui::section(&ctx, "LOCAL:");
                render(&ctx, report.local_info.as_ref());
            }
        }
    }
    Ok(())
}

/// Registry misses are reported as absent; other errors still fail
async fn lookup(client: &Client, name: &str, daemon: bool) -> PackResult<Option<BuilderInfo>> {
    match client.inspect_builder(name, daemon).await {
        Err(PackError::AuthRequired { .. } | PackError::Registry { .. }) if !daemon => Ok(None),
        other => other,
    }
}

fn render(ctx: &UiContext, info: Option<&BuilderInfo>) {
    let Some(info) = info else {
        ui::note(ctx, "(not present)");
        return;
    };
    ui::key_value(ctx, "Description", &info.description);
    ui::key_value(ctx, "Created By", &info.created_by);
    ui::key_value(ctx, "Stack ID", &info.stack_id);
    if !info.mixins.is_empty() {
        ui::key_value(ctx, "Mixins", &info.mixins.join(", "));
    }

    ui::key_value(ctx, "Run Images", "");
    let run_images: Vec<String> = info
        .run_images
        .iter()
        .map(|r| {
            if r.user_configured {
                format!("{} (user-configured)", r.name)
            } else {
                r.name.clone()
            }
        })
        .collect();
    ui::list(ctx, &run_images);

    ui::key_value(ctx, "Lifecycle Version", &info.lifecycle_version);
    ui::key_value(ctx, "Platform APIs", &info.platform_apis.join(", "));
    ui::key_value(ctx, "Buildpack APIs", &info.buildpack_apis.join(", "));

    ui::key_value(ctx, "Buildpacks", "");
    let buildpacks: Vec<String> = info
        .buildpacks
        .iter()
        .map(ModuleInfo::full_name)
        .collect();
    ui::list(ctx, &buildpacks);
    ui::key_value(ctx, "Detection Order", "");
    ui::list(ctx, &render_order(&info.order));

    if !info.extensions.is_empty() {
        let extensions: Vec<String> = info
            .extensions
            .iter()
            .map(ModuleInfo::full_name)
            .collect();
        ui::key_value(ctx, "Extensions", "");
        ui::list(ctx, &extensions);
        ui::key_value(ctx, "Detection Order (Extensions)", "");
        ui::list(ctx, &render_order(&info.order_extensions));
    }
}

/// The message shown when there is no builder to work with
pub(crate) fn suggestions() -> String {
    let mut message = String::from("Please select a default builder with:\n\n\tpack config default-builder <builder-image>\n\nSuggested builders:\n");
    for (name, description) in SUGGESTED_BUILDERS {
        message.push_str(&format!("\t{:<40} {}\n", name, description));
    }
    message
}
