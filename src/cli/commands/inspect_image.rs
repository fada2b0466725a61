//! Inspect-image command - what went into a built app image

use crate::cli::args::{InspectImageArgs, OutputFormat};
use crate::client::Client;
use crate::config::{Config, ConfigManager};
use crate::error::{PackError, PackResult};
use crate::inspect::ImageInfo;
use crate::ui::{self, UiContext};
use serde::Serialize;

#[derive(Serialize)]
struct InspectReport {
    image_name: String,
    remote_info: Option<ImageInfo>,
    local_info: Option<ImageInfo>,
}

pub async fn execute(args: InspectImageArgs, manager: &ConfigManager, config: Config) -> PackResult<()> {
    let ctx = UiContext::detect();
    let client = super::connect(manager, config, None).await?;

    let remote_info = if args.local { None } else { lookup(&client, &args.image, false).await? };
    let local_info = if args.remote { None } else { lookup(&client, &args.image, true).await? };
    if remote_info.is_none() && local_info.is_none() {
        return Err(PackError::ImageNotFound(args.image));
    }

    let report = InspectReport {
        image_name: args.image,
        remote_info,
        local_info,
    };
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Toml => print!("{}", toml::to_string_pretty(&report)?),
        OutputFormat::Human => {
            ui::header(&ctx, &format!("Inspecting image: {}", report.image_name));
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

async fn lookup(client: &Client, name: &str, daemon: bool) -> PackResult<Option<ImageInfo>> {
    match client.inspect_image(name, daemon).await {
        Err(PackError::AuthRequired { .. } | PackError::Registry { .. }) if !daemon => Ok(None),
        other => other,
    }
}

fn render(ctx: &UiContext, info: Option<&ImageInfo>) {
    let Some(info) = info else {
        ui::note(ctx, "(not present)");
        return;
    };
    ui::key_value(ctx, "Identifier", &info.identifier);
    ui::key_value(ctx, "Stack", &info.stack_id);
    ui::key_value(ctx, "Base Image Reference", &info.base.reference);
    ui::key_value(ctx, "Base Image Top Layer", &info.base.top_layer);

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

    if let Some(source) = &info.source {
        ui::key_value(ctx, "Source", &format!("{} {} {}", source.source_type, source.repository, source.commit));
    }

    ui::key_value(ctx, "Buildpacks", "");
    let buildpacks: Vec<String> = info
        .buildpacks
        .iter()
        .map(|b| format!("{}@{}", b.id, b.version))
        .collect();
    ui::list(ctx, &buildpacks);
    if !info.extensions.is_empty() {
        let extensions: Vec<String> = info
            .extensions
            .iter()
            .map(|e| format!("{}@{}", e.id, e.version))
            .collect();
        ui::key_value(ctx, "Extensions", "");
        ui::list(ctx, &extensions);
    }

    ui::key_value(ctx, "Processes", "");
    let processes: Vec<String> = info.processes.iter().map(process_line).collect();
    ui::list(ctx, &processes);
}

/// `web (default)  node server.js --port 8080  (/workspace)`
fn process_line(process: &crate::inspect::ProcessInfo) -> String {
    let mut line = process.process_type.clone();
    if process.default {
        line.push_str(" (default)");
    }
    let command: Vec<&str> = process
        .command
        .iter()
        .chain(process.args.iter())
        .map(String::as_str)
        .collect();
    line.push_str("  ");
    line.push_str(&command.join(" "));
    if !process.working_dir.is_empty() {
        line.push_str(&format!("  ({})", process.working_dir));
    }
    line
}
