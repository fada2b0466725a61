//! Buildpack command - package buildpacks for distribution

use crate::cli::args::{BuildpackArgs, BuildpackCommands, BuildpackPackageArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{PackError, PackResult};
use crate::package::{PackageConfig, PackageFormat, PackageOptions};
use crate::ui::{TaskSpinner, UiContext};
use std::path::Path;

pub async fn execute(args: BuildpackArgs, manager: &ConfigManager, config: Config) -> PackResult<()> {
    match args.command {
        BuildpackCommands::Package(args) => package(args, manager, config).await,
    }
}

async fn package(args: BuildpackPackageArgs, manager: &ConfigManager, config: Config) -> PackResult<()> {
    let ctx = UiContext::detect();
    let format: PackageFormat = args.format.parse()?;
    let package_config = PackageConfig::read(&args.config)?;
    let base_dir = config_dir(&args.config)?;

    let opts = PackageOptions {
        format,
        publish: args.publish,
        pull_policy: super::pull_policy(args.pull_policy.as_deref(), &config)?,
        registry: args.registry,
        labels: super::parse_pairs(&args.labels, "label")?,
        ..PackageOptions::new(&args.name, package_config, base_dir)
    };
    let client = super::connect(manager, config, None).await?;

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Packaging {}...", args.name));
    match client.package_buildpack(opts).await {
        Ok(output) => {
            let verb = if args.publish { "published" } else { "created" };
            spinner.stop(&format!("Successfully {} package {}", verb, output));
            Ok(())
        }
        Err(e) => {
            spinner.stop_error("Packaging failed");
            Err(e)
        }
    }
}

/// Absolute directory holding `package.toml`; relative URIs resolve against it
fn config_dir(config: &Path) -> PackResult<std::path::PathBuf> {
    let dir = match config.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    std::path::absolute(&dir).map_err(|e| PackError::io(format!("resolving {}", dir.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_is_absolute() {
        let dir = config_dir(Path::new("package.toml")).unwrap();
        assert!(dir.is_absolute());
        assert_eq!(
            config_dir(Path::new("/srv/bp/package.toml")).unwrap(),
            Path::new("/srv/bp")
        );
    }
}
