//! pack - build OCI images from source with Cloud Native Buildpacks
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use pack::cli::commands;
use pack::cli::{Cli, Commands, LogFormat};
use pack::config::ConfigManager;
use pack::error::{PackError, PackResult};
use pack::ui::UiContext;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(PackError::Soft(message)) => {
            println!("{}", message);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} {}", style("ERROR:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> PackResult<()> {
    let cli = Cli::parse();
    UiContext::detect().with_color(!cli.no_color);

    let manager = ConfigManager::new();
    let config = manager.load().await?;

    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("pack=warn"),
        1 => EnvFilter::new("pack=info"),
        _ => EnvFilter::new("pack=debug"),
    });
    let json = match cli.log_format {
        Some(format) => format == LogFormat::Json,
        None => config.log_format == "json",
    };
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }

    let verbose = cli.verbose > 0;
    match cli.command {
        Commands::Build(args) => commands::build(args, &manager, config, verbose).await,
        Commands::Builder(args) => commands::builder(args, &manager, config).await,
        Commands::Buildpack(args) => commands::buildpack(args, &manager, config).await,
        Commands::Manifest(args) => commands::manifest(args, &manager).await,
        Commands::Rebase(args) => commands::rebase(args, &manager, config).await,
        Commands::InspectImage(args) => commands::inspect_image(args, &manager, config).await,
        Commands::Config(args) => commands::config(args, &manager, &config).await,
        Commands::TrustBuilder(args) => {
            tracing::warn!("`pack trust-builder` is deprecated; use `pack config trusted-builders add`");
            commands::config::trust_builder(&UiContext::detect(), &manager, &args.name).await
        }
        Commands::UntrustBuilder(args) => {
            tracing::warn!("`pack untrust-builder` is deprecated; use `pack config trusted-builders remove`");
            commands::config::untrust_builder(&UiContext::detect(), &manager, &args.name).await
        }
        Commands::Completion(args) => commands::completion(args),
    }
}
