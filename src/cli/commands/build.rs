//! Build command - run the lifecycle against app source

use crate::build::env::parse_env_var;
use crate::build::BuildOptions;
use crate::cache::CacheOptions;
use crate::cli::args::BuildArgs;
use crate::config::{Config, ConfigManager};
use crate::error::PackResult;
use crate::ui::{self, BuildProgress, UiContext};
use std::collections::BTreeMap;
use std::sync::Arc;

pub async fn execute(args: BuildArgs, manager: &ConfigManager, config: Config, verbose: bool) -> PackResult<()> {
    let ctx = UiContext::detect();
    let opts = options(args, &config, verbose)?;
    opts.validate(&config)?;

    let mut client = super::connect(manager, config, opts.docker_host.as_deref()).await?;
    if opts.interactive {
        client = client.with_observer(Arc::new(BuildProgress::new(&ctx, &opts.image)));
    }

    let image = client.build(opts).await?;
    ui::success(&ctx, &format!("Successfully built image {}", image));
    Ok(())
}

/// Flags into [`BuildOptions`]; relative cache bind paths resolve against the app dir
fn options(args: BuildArgs, config: &Config, verbose: bool) -> PackResult<BuildOptions> {
    let env: BTreeMap<String, String> = args
        .env
        .iter()
        .map(|item| parse_env_var(item))
        .collect::<PackResult<_>>()?;
    let cache = match &args.cache {
        Some(raw) => match &args.path {
            Some(path) => CacheOptions::parse_in(raw, path)?,
            None => CacheOptions::parse(raw)?,
        },
        None => CacheOptions::default(),
    };

    Ok(BuildOptions {
        pull_policy: super::pull_policy(args.pull_policy.as_deref(), config)?,
        image: args.image,
        app_path: args.path,
        builder: args.builder,
        run_image: args.run_image,
        env,
        env_files: args.env_files,
        buildpacks: args.buildpacks,
        extensions: args.extensions,
        pre_buildpacks: args.pre_buildpacks,
        post_buildpacks: args.post_buildpacks,
        clear_cache: args.clear_cache,
        cache_image: args.cache_image,
        cache,
        publish: args.publish,
        docker_host: args.docker_host,
        trust_builder: args.trust_builder,
        network: args.network,
        volumes: args.volumes,
        workspace: args.workspace,
        uid: args.uid,
        gid: args.gid,
        default_process: args.default_process,
        previous_image: args.previous_image,
        lifecycle_image: args.lifecycle_image,
        additional_tags: args.tags,
        sbom_destination_dir: args.sbom_output_dir,
        report_destination_dir: args.report_output_dir,
        creation_time: args.creation_time,
        mac_address: args.mac_address,
        interactive: args.interactive,
        layout: args.layout,
        verbose,
        ..BuildOptions::default()
    })
}
