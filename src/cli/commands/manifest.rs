//! Manifest command - multi-platform image indexes
//!
//! Needs only the registry and the local index store, so it runs without
//! a container daemon.

use crate::cli::args::{ManifestAnnotateArgs, ManifestArgs, ManifestCommands, ManifestCreateArgs};
use crate::config::ConfigManager;
use crate::creds::Keychain;
use crate::error::{PackError, PackResult};
use crate::image::RegistryClient;
use crate::lifecycle::Interrupt;
use crate::manifest::{AnnotateOptions, IndexFormat, IndexStore, ManifestManager, ManifestSource};
use crate::ui::{self, UiContext};
use std::sync::Arc;

pub async fn execute(args: ManifestArgs, manager: &ConfigManager) -> PackResult<()> {
    let ctx = UiContext::detect();
    let manifests = manifest_manager(manager)?;
    let interrupt = Interrupt::new();
    interrupt.listen_for_signals();
    interrupt
        .cancellable("manifest", run(&ctx, &manifests, args.command))
        .await
}

async fn run(ctx: &UiContext, manifests: &ManifestManager, command: ManifestCommands) -> PackResult<()> {
    match command {
        ManifestCommands::Create(args) => create(ctx, manifests, args).await,
        ManifestCommands::Add(args) => {
            manifests.add(&args.name, &args.image).await?;
            ui::step_ok(ctx, &format!("Added {} to {}", args.image, args.name));
            Ok(())
        }
        ManifestCommands::Annotate(args) => annotate(ctx, manifests, args).await,
        ManifestCommands::Push(args) => {
            let digest = manifests.push(&args.name, args.purge).await?;
            ui::success(ctx, &format!("Pushed {}@{}", args.name, digest));
            Ok(())
        }
        ManifestCommands::Rm(args) => {
            manifests.delete(&args.names)?;
            for name in &args.names {
                ui::step_ok(ctx, &format!("Deleted manifest list {}", name));
            }
            Ok(())
        }
        ManifestCommands::Remove(args) => {
            manifests.remove_images(&args.name, &args.images).await?;
            ui::step_ok(ctx, &format!("Removed {} image(s) from {}", args.images.len(), args.name));
            Ok(())
        }
        ManifestCommands::Inspect(args) => {
            let index = manifests.inspect(&args.name).await?;
            println!("{}", serde_json::to_string_pretty(&index)?);
            Ok(())
        }
        ManifestCommands::Exists(args) => {
            if manifests.exists(&args.name)? {
                ui::step_ok(ctx, &format!("{} exists", args.name));
                Ok(())
            } else {
                Err(PackError::ImageNotFound(format!("{} (no local manifest list)", args.name)))
            }
        }
    }
}

fn manifest_manager(manager: &ConfigManager) -> PackResult<ManifestManager> {
    let keychain = Arc::new(Keychain::from_environment()?);
    let source: Arc<dyn ManifestSource> = Arc::new(RegistryClient::new(keychain));
    Ok(ManifestManager::new(IndexStore::new(manager.manifests_dir()), source))
}

async fn create(ctx: &UiContext, manifests: &ManifestManager, args: ManifestCreateArgs) -> PackResult<()> {
    let format: IndexFormat = args.format.parse()?;
    let name = manifests
        .create(&args.name, &args.images, format, args.publish)
        .await?;
    if args.publish {
        ui::success(ctx, &format!("Created and pushed manifest list {}", name));
    } else {
        ui::success(ctx, &format!("Created manifest list {}", name));
        ui::note(ctx, &format!("Push it with: pack manifest push {}", name));
    }
    Ok(())
}

async fn annotate(ctx: &UiContext, manifests: &ManifestManager, args: ManifestAnnotateArgs) -> PackResult<()> {
    let opts = AnnotateOptions {
        annotations: super::parse_pairs(&args.annotations, "annotation")?,
        os: args.os,
        architecture: args.architecture,
        variant: args.variant,
    };
    manifests.annotate(&args.name, &args.image, &opts).await?;
    ui::step_ok(ctx, &format!("Annotated {} in {}", args.image, args.name));
    Ok(())
}
