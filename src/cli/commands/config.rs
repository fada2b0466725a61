//! Config command - show or edit `config.toml`

use super::builder::suggestions;
use crate::buildpack::registry::{IndexKind, DEFAULT_REGISTRY_NAME};
use crate::cli::args::{
    ConfigArgs, ConfigCommands, RegistriesCommands, RunImageMirrorsCommands, ToggleArgs, TrustedBuildersCommands,
    ValueArgs,
};
use crate::config::{Config, ConfigManager, RegistryConfig};
use crate::error::{PackError, PackResult};
use crate::image::{ImageRef, PullPolicy};
use crate::trust::KNOWN_TRUSTED;
use crate::ui::{self, UiContext};

pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> PackResult<()> {
    let ctx = UiContext::detect();

    match args.command {
        None => show_config(config)?,
        Some(ConfigCommands::Path) => println!("{}", manager.path().display()),
        Some(ConfigCommands::TrustedBuilders(args)) => match args.command {
            Some(TrustedBuildersCommands::Add(name)) => trust_builder(&ctx, manager, &name.name).await?,
            Some(TrustedBuildersCommands::Remove(name)) => untrust_builder(&ctx, manager, &name.name).await?,
            Some(TrustedBuildersCommands::List) | None => list_trusted_builders(&ctx, config),
        },
        Some(ConfigCommands::RunImageMirrors(args)) => run_image_mirrors(&ctx, manager, config, args.command).await?,
        Some(ConfigCommands::PullPolicy(args)) => pull_policy(&ctx, manager, config, args).await?,
        Some(ConfigCommands::DefaultBuilder(args)) => default_builder(&ctx, manager, config, args).await?,
        Some(ConfigCommands::Experimental(args)) => experimental(&ctx, manager, config, args).await?,
        Some(ConfigCommands::Registries(args)) => registries(&ctx, manager, config, args.command).await?,
        Some(ConfigCommands::LifecycleImage(args)) => lifecycle_image(&ctx, manager, config, args).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> PackResult<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Shared by `config trusted-builders add` and the deprecated `trust-builder`
pub async fn trust_builder(ctx: &UiContext, manager: &ConfigManager, name: &str) -> PackResult<()> {
    ImageRef::parse(name.trim_end_matches("/*"))?;
    if KNOWN_TRUSTED.contains(&name) {
        ui::step_info(ctx, &format!("Builder {} is a known trusted builder", name));
        return Ok(());
    }
    if manager.add_trusted_builder(name).await? {
        ui::step_ok(ctx, &format!("Builder {} is now trusted", name));
    } else {
        ui::step_info(ctx, &format!("Builder {} is already trusted", name));
    }
    Ok(())
}

/// Shared by `config trusted-builders remove` and the deprecated `untrust-builder`
pub async fn untrust_builder(ctx: &UiContext, manager: &ConfigManager, name: &str) -> PackResult<()> {
    if manager.remove_trusted_builder(name).await? {
        ui::step_ok(ctx, &format!("Builder {} is no longer trusted", name));
        return Ok(());
    }
    if KNOWN_TRUSTED.contains(&name) {
        return Err(PackError::invalid(format!(
            "{} is a known trusted builder and cannot be untrusted",
            name
        )));
    }
    ui::step_info(ctx, &format!("Builder {} was not trusted", name));
    Ok(())
}

fn list_trusted_builders(ctx: &UiContext, config: &Config) {
    ui::header(ctx, "Trusted Builders:");
    let mut names: Vec<&str> = KNOWN_TRUSTED.to_vec();
    names.extend(config.trusted_builders.iter().map(|b| b.name.as_str()));
    names.sort_unstable();
    names.dedup();
    ui::list(ctx, &names);
}

async fn run_image_mirrors(
    ctx: &UiContext,
    manager: &ConfigManager,
    config: &Config,
    command: Option<RunImageMirrorsCommands>,
) -> PackResult<()> {
    match command {
        Some(RunImageMirrorsCommands::Add { image, mirrors }) => {
            for reference in std::iter::once(&image).chain(mirrors.iter()) {
                ImageRef::parse(reference)?;
            }
            manager.add_run_image_mirrors(&image, &mirrors).await?;
            for mirror in &mirrors {
                ui::step_ok(ctx, &format!("Run image {} mirrored at {}", image, mirror));
            }
        }
        Some(RunImageMirrorsCommands::Remove { image, mirrors }) => {
            if manager.remove_run_image_mirrors(&image, &mirrors).await? {
                ui::step_ok(ctx, &format!("Removed mirrors for {}", image));
            } else {
                ui::step_warn(ctx, &format!("No run image mirrors configured for {}", image));
            }
        }
        Some(RunImageMirrorsCommands::List { image }) => list_run_image_mirrors(ctx, config, image.as_deref()),
        None => list_run_image_mirrors(ctx, config, None),
    }
    Ok(())
}

fn list_run_image_mirrors(ctx: &UiContext, config: &Config, image: Option<&str>) {
    let image = image.filter(|i| !i.is_empty());
    ui::header(ctx, "Run Image Mirrors:");
    for entry in &config.run_images {
        if image.is_some_and(|i| i != entry.image) {
            continue;
        }
        ui::key_value(ctx, &entry.image, "");
        ui::list(ctx, &entry.mirrors);
    }
}

async fn pull_policy(ctx: &UiContext, manager: &ConfigManager, config: &Config, args: ValueArgs) -> PackResult<()> {
    if args.unset {
        manager.unset("pull-policy").await?;
        ui::step_ok(ctx, &format!("Pull policy reset to {}", PullPolicy::default()));
        return Ok(());
    }
    match args.value {
        Some(value) => {
            let policy: PullPolicy = value.parse()?;
            if config.pull_policy.as_deref() == Some(value.as_str()) {
                ui::step_info(ctx, &format!("Pull policy is already set to {}", value));
                return Ok(());
            }
            manager.set_string("pull-policy", &value).await?;
            ui::step_ok(ctx, &format!("Pull policy set to {}", policy));
        }
        None => {
            let current = match config.pull_policy.as_deref() {
                Some(raw) => raw.parse()?,
                None => PullPolicy::default(),
            };
            ui::key_value(ctx, "Pull policy", &current.to_string());
        }
    }
    Ok(())
}

async fn default_builder(ctx: &UiContext, manager: &ConfigManager, config: &Config, args: ValueArgs) -> PackResult<()> {
    if args.unset {
        if manager.unset("default-builder-image").await? {
            ui::step_ok(ctx, "Default builder unset");
        } else {
            ui::step_info(ctx, "No default builder was set");
        }
        return Ok(());
    }
    match args.value {
        Some(builder) => {
            ImageRef::parse(&builder)?;
            manager.set_string("default-builder-image", &builder).await?;
            ui::step_ok(ctx, &format!("Builder {} is now the default builder", builder));
        }
        None => match &config.default_builder_image {
            Some(builder) => ui::key_value(ctx, "Default builder", builder),
            None => return Err(PackError::Soft(suggestions())),
        },
    }
    Ok(())
}

async fn experimental(ctx: &UiContext, manager: &ConfigManager, config: &Config, args: ToggleArgs) -> PackResult<()> {
    match args.value {
        Some(enabled) => {
            manager.set_bool("experimental", enabled).await?;
            let state = if enabled { "enabled" } else { "disabled" };
            ui::step_ok(ctx, &format!("Experimental features {}", state));
        }
        None => ui::key_value(ctx, "Experimental", &config.experimental.to_string()),
    }
    Ok(())
}

async fn registries(
    ctx: &UiContext,
    manager: &ConfigManager,
    config: &Config,
    command: Option<RegistriesCommands>,
) -> PackResult<()> {
    match command {
        Some(RegistriesCommands::Add {
            name,
            url,
            kind,
            default,
        }) => {
            kind.parse::<IndexKind>()?;
            if name == DEFAULT_REGISTRY_NAME {
                return Err(PackError::invalid(format!("'{}' is a reserved registry name", name)));
            }
            let registry = RegistryConfig { name, kind, url };
            manager.add_registry(&registry, default).await?;
            ui::step_ok(ctx, &format!("Registry {} added", registry.name));
        }
        Some(RegistriesCommands::Remove { name }) => {
            if !manager.remove_registry(&name).await? {
                return Err(PackError::invalid(format!("registry '{}' is not configured", name)));
            }
            ui::step_ok(ctx, &format!("Registry {} removed", name));
        }
        Some(RegistriesCommands::Default { name: Some(name), .. }) => {
            if name != DEFAULT_REGISTRY_NAME && config.registry(&name).is_none() {
                return Err(PackError::invalid(format!("registry '{}' is not configured", name)));
            }
            manager.set_string("default-registry-name", &name).await?;
            ui::step_ok(ctx, &format!("Registry {} is now the default", name));
        }
        Some(RegistriesCommands::Default { unset: true, .. }) => {
            manager.unset("default-registry-name").await?;
            ui::step_ok(ctx, &format!("Default registry reset to {}", DEFAULT_REGISTRY_NAME));
        }
        Some(RegistriesCommands::Default { .. }) => {
            let name = config.default_registry_name.as_deref().unwrap_or(DEFAULT_REGISTRY_NAME);
            ui::key_value(ctx, "Default registry", name);
        }
        Some(RegistriesCommands::List) | None => {
            let default = config.default_registry_name.as_deref().unwrap_or(DEFAULT_REGISTRY_NAME);
            ui::header(ctx, "Registries:");
            let mut lines = vec![registry_line(DEFAULT_REGISTRY_NAME, "github", "(built in)", default)];
            lines.extend(
                config
                    .registries
                    .iter()
                    .map(|r| registry_line(&r.name, &r.kind, &r.url, default)),
            );
            ui::list(ctx, &lines);
        }
    }
    Ok(())
}

fn registry_line(name: &str, kind: &str, url: &str, default: &str) -> String {
    let marker = if name == default { "* " } else { "  " };
    format!("{}{:<20} {:<8} {}", marker, name, kind, url)
}

async fn lifecycle_image(ctx: &UiContext, manager: &ConfigManager, config: &Config, args: ValueArgs) -> PackResult<()> {
    if args.unset {
        manager.unset("lifecycle-image").await?;
        ui::step_ok(ctx, "Lifecycle image unset");
        return Ok(());
    }
    match args.value {
        Some(image) => {
            ImageRef::parse(&image)?;
            manager.set_string("lifecycle-image", &image).await?;
            ui::step_ok(ctx, &format!("Lifecycle image set to {}", image));
        }
        None => ui::key_value(
            ctx,
            "Lifecycle image",
            config.lifecycle_image.as_deref().unwrap_or_default(),
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> ConfigManager {
        ConfigManager::with_path(temp.path().join("config.toml"))
    }

    #[tokio::test]
    async fn trust_and_untrust_builder() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = UiContext::non_interactive();

        trust_builder(&ctx, &manager, "example.com/builder:base").await.unwrap();
        trust_builder(&ctx, &manager, "example.com/builder:base").await.unwrap();
        let config = manager.load().await.unwrap();
        assert_eq!(config.trusted_builders.len(), 1);

        untrust_builder(&ctx, &manager, "example.com/builder:base").await.unwrap();
        assert!(manager.load().await.unwrap().trusted_builders.is_empty());
    }

    #[tokio::test]
    async fn known_builders_are_not_written_and_cannot_be_untrusted() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = UiContext::non_interactive();

        trust_builder(&ctx, &manager, "heroku/*").await.unwrap();
        assert!(manager.load().await.unwrap().trusted_builders.is_empty());
        let err = untrust_builder(&ctx, &manager, "heroku/*").await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn pull_policy_is_validated_before_saving() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = UiContext::non_interactive();
        let config = Config::default();

        let bad = ValueArgs {
            value: Some("sometimes".into()),
            unset: false,
        };
        assert!(pull_policy(&ctx, &manager, &config, bad).await.is_err());
        assert!(!manager.path().exists());

        let good = ValueArgs {
            value: Some("if-not-present".into()),
            unset: false,
        };
        pull_policy(&ctx, &manager, &config, good).await.unwrap();
        assert_eq!(manager.load().await.unwrap().pull_policy.as_deref(), Some("if-not-present"));
    }

    #[tokio::test]
    async fn registries_add_default_and_remove() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let ctx = UiContext::non_interactive();

        let add = RegistriesCommands::Add {
            name: "corp".into(),
            url: "https://github.com/corp/registry".into(),
            kind: "git".into(),
            default: true,
        };
        registries(&ctx, &manager, &Config::default(), Some(add)).await.unwrap();
        let config = manager.load().await.unwrap();
        assert_eq!(config.default_registry_name.as_deref(), Some("corp"));
        assert_eq!(config.registry("corp").unwrap().kind, "git");

        let reserved = RegistriesCommands::Add {
            name: DEFAULT_REGISTRY_NAME.into(),
            url: "https://example.com".into(),
            kind: "github".into(),
            default: false,
        };
        assert!(registries(&ctx, &manager, &config, Some(reserved)).await.is_err());

        registries(&ctx, &manager, &config, Some(RegistriesCommands::Remove { name: "corp".into() }))
            .await
            .unwrap();
        let config = manager.load().await.unwrap();
        assert!(config.registries.is_empty());
        assert_eq!(config.default_registry_name, None);
    }

    #[tokio::test]
    async fn missing_default_builder_is_a_soft_error() {
        let temp = TempDir::new().unwrap();
        let args = ValueArgs {
            value: None,
            unset: false,
        };
        let err = default_builder(&UiContext::non_interactive(), &manager(&temp), &Config::default(), args)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 0);
    }
}
