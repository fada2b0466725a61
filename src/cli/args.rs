//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Build container images from source with Cloud Native Buildpacks
#[derive(Parser, Debug)]
#[command(name = "pack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Disable color output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Log line format; overrides `log-format` in config.toml
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an app image from source code
    Build(BuildArgs),

    /// Create and inspect builders
    Builder(BuilderArgs),

    /// Package buildpacks
    Buildpack(BuildpackArgs),

    /// Create and push manifest lists
    Manifest(ManifestArgs),

    /// Swap the run image of an app image without rebuilding it
    Rebase(RebaseArgs),

    /// Show information about a built app image
    #[command(alias = "inspect")]
    InspectImage(InspectImageArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Trust a builder (deprecated: use `config trusted-builders add`)
    #[command(hide = true)]
    TrustBuilder(TrustedBuilderName),

    /// Stop trusting a builder (deprecated: use `config trusted-builders remove`)
    #[command(hide = true)]
    UntrustBuilder(TrustedBuilderName),

    /// Print a shell completion script
    Completion(CompletionArgs),
}

#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Name of the app image to produce
    pub image: String,

    /// Path to the app directory or zip-formatted file
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Builder image
    #[arg(short = 'B', long, env = "PACK_BUILDER")]
    pub builder: Option<String>,

    /// Run image; defaults to the builder's run image
    #[arg(long, env = "PACK_RUN_IMAGE")]
    pub run_image: Option<String>,

    /// Build-time environment variable, KEY=VALUE or KEY to inherit
    #[arg(short, long = "env", value_name = "KEY[=VALUE]")]
    pub env: Vec<String>,

    /// File of KEY=VALUE lines
    #[arg(long = "env-file")]
    pub env_files: Vec<PathBuf>,

    /// Buildpack to use; repeatable (path, URL, docker://image, urn:cnb:registry:id@version, id@version)
    #[arg(short = 'b', long = "buildpack", value_delimiter = ',')]
    pub buildpacks: Vec<String>,

    /// Image extension to use; repeatable
    #[arg(long = "extension", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Buildpack to run before the builder's order
    #[arg(long = "pre-buildpack")]
    pub pre_buildpacks: Vec<String>,

    /// Buildpack to run after the builder's order
    #[arg(long = "post-buildpack")]
    pub post_buildpacks: Vec<String>,

    /// Clear the image's build cache before building
    #[arg(long)]
    pub clear_cache: bool,

    /// Cache build layers in this image; requires --publish
    #[arg(long)]
    pub cache_image: Option<String>,

    /// Cache options, e.g. "type=build;format=volume;name=my-cache"
    #[arg(long)]
    pub cache: Option<String>,

    /// Publish the app image to its registry
    #[arg(long)]
    pub publish: bool,

    /// Address of the docker daemon used by the lifecycle ("inherit" uses DOCKER_HOST)
    #[arg(long, env = "DOCKER_HOST")]
    pub docker_host: Option<String>,

    /// Trust the builder for this build
    #[arg(long)]
    pub trust_builder: bool,

    /// Network for the build containers
    #[arg(long)]
    pub network: Option<String>,

    /// Mount a host volume, <host>:<target>[:ro|rw]
    #[arg(long = "volume")]
    pub volumes: Vec<String>,

    /// Location of the app inside the build containers
    #[arg(long)]
    pub workspace: Option<String>,

    /// Override the UID of the build user
    #[arg(long)]
    pub uid: Option<i64>,

    /// Override the GID of the build user
    #[arg(long)]
    pub gid: Option<i64>,

    /// Default process type of the app image
    #[arg(short = 'D', long)]
    pub default_process: Option<String>,

    /// Reuse layers from this image instead of the app image
    #[arg(long)]
    pub previous_image: Option<String>,

    /// Lifecycle image for untrusted builds
    #[arg(long)]
    pub lifecycle_image: Option<String>,

    /// Additional tag for the app image; repeatable
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,

    /// Copy the SBoM layer out to this directory
    #[arg(long)]
    pub sbom_output_dir: Option<PathBuf>,

    /// Copy report.toml out to this directory
    #[arg(long)]
    pub report_output_dir: Option<PathBuf>,

    /// Image creation time, "now" or seconds since the epoch
    #[arg(long)]
    pub creation_time: Option<String>,

    /// MAC address of the build container
    #[arg(long)]
    pub mac_address: Option<String>,

    /// Show a progress view (experimental)
    #[arg(long)]
    pub interactive: bool,

    /// Export to an OCI layout directory instead of the daemon (experimental)
    #[arg(long)]
    pub layout: bool,

    /// always, never, if-not-present, hourly, daily, weekly or interval=<d h m>
    #[arg(long, env = "PACK_PULL_POLICY")]
    pub pull_policy: Option<String>,
}

#[derive(Args, Debug)]
pub struct BuilderArgs {
    #[command(subcommand)]
    pub command: BuilderCommands,
}

#[derive(Subcommand, Debug)]
pub enum BuilderCommands {
    /// Create a builder image from a builder.toml
    Create(BuilderCreateArgs),

    /// Show information about a builder
    Inspect(BuilderInspectArgs),
}

#[derive(Args, Debug)]
pub struct BuilderCreateArgs {
    /// Name of the builder image
    pub name: String,

    /// Path to builder.toml
    #[arg(short, long)]
    pub config: PathBuf,

    /// Publish the builder to its registry
    #[arg(long)]
    pub publish: bool,

    #[arg(long)]
    pub pull_policy: Option<String>,

    /// Buildpack registry for id@version references
    #[arg(short = 'R', long = "buildpack-registry")]
    pub registry: Option<String>,

    /// Label to add, KEY=VALUE; repeatable
    #[arg(short, long = "label")]
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
pub struct BuilderInspectArgs {
    /// Builder image; defaults to the configured default builder
    pub name: Option<String>,

    /// Only look in the registry
    #[arg(long, conflicts_with = "local")]
    pub remote: bool,

    /// Only look in the daemon
    #[arg(long)]
    pub local: bool,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Toml,
}

#[derive(Args, Debug)]
pub struct BuildpackArgs {
    #[command(subcommand)]
    pub command: BuildpackCommands,
}

#[derive(Subcommand, Debug)]
pub enum BuildpackCommands {
    /// Package a buildpack as an image or a .cnb file
    Package(BuildpackPackageArgs),
}

#[derive(Args, Debug)]
pub struct BuildpackPackageArgs {
    /// Image name, or output file for --format file
    pub name: String,

    /// Path to package.toml
    #[arg(short, long)]
    pub config: PathBuf,

    /// "image" or "file"
    #[arg(short, long, default_value = "image")]
    pub format: String,

    #[arg(long)]
    pub publish: bool,

    #[arg(long)]
    pub pull_policy: Option<String>,

    #[arg(short = 'R', long = "buildpack-registry")]
    pub registry: Option<String>,

    #[arg(short, long = "label")]
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ManifestArgs {
    #[command(subcommand)]
    pub command: ManifestCommands,
}

#[derive(Subcommand, Debug)]
pub enum ManifestCommands {
    /// Create a manifest list from images
    Create(ManifestCreateArgs),

    /// Add an image to a manifest list
    Add(ManifestImageArgs),

    /// Set platform fields and annotations of an entry
    Annotate(ManifestAnnotateArgs),

    /// Push a manifest list to its registry
    Push(ManifestPushArgs),

    /// Delete local manifest lists
    Rm(ManifestNamesArgs),

    /// Remove images from a manifest list
    Remove(ManifestRemoveArgs),

    /// Show a manifest list
    Inspect(ManifestNameArgs),

    /// Check whether a manifest list exists locally
    Exists(ManifestNameArgs),
}

#[derive(Args, Debug)]
pub struct ManifestCreateArgs {
    pub name: String,

    #[arg(required = true)]
    pub images: Vec<String>,

    /// oci or v2s2
    #[arg(short, long, default_value = "oci")]
    pub format: String,

    /// Push the list right after creating it
    #[arg(long)]
    pub publish: bool,
}

#[derive(Args, Debug)]
pub struct ManifestImageArgs {
    pub name: String,
    pub image: String,
}

#[derive(Args, Debug)]
pub struct ManifestAnnotateArgs {
    pub name: String,
    pub image: String,

    #[arg(long)]
    pub os: Option<String>,

    #[arg(long = "arch")]
    pub architecture: Option<String>,

    #[arg(long)]
    pub variant: Option<String>,

    /// KEY=VALUE; repeatable
    #[arg(long = "annotations")]
    pub annotations: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ManifestPushArgs {
    pub name: String,

    /// Delete the local list after a successful push
    #[arg(long)]
    pub purge: bool,
}

#[derive(Args, Debug)]
pub struct ManifestNamesArgs {
    #[arg(required = true)]
    pub names: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ManifestRemoveArgs {
    pub name: String,

    #[arg(required = true)]
    pub images: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ManifestNameArgs {
    pub name: String,
}

#[derive(Args, Debug)]
pub struct RebaseArgs {
    /// App image to rebase
    pub image: String,

    #[arg(long)]
    pub publish: bool,

    #[arg(long, env = "PACK_PULL_POLICY")]
    pub pull_policy: Option<String>,

    /// Run image to rebase onto
    #[arg(long)]
    pub run_image: Option<String>,
}

#[derive(Args, Debug)]
pub struct InspectImageArgs {
    pub image: String,

    /// Skip the registry lookup
    #[arg(long)]
    pub local: bool,

    /// Skip the daemon lookup
    #[arg(long, conflicts_with = "local")]
    pub remote: bool,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: Option<ConfigCommands>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the config file path
    Path,

    /// Manage trusted builders
    TrustedBuilders(TrustedBuildersArgs),

    /// Manage run image mirrors
    RunImageMirrors(RunImageMirrorsArgs),

    /// Show, set or unset the default pull policy
    PullPolicy(ValueArgs),

    /// Show, set or unset the default builder
    DefaultBuilder(ValueArgs),

    /// Show, enable or disable experimental features
    Experimental(ToggleArgs),

    /// Manage buildpack registries
    Registries(RegistriesArgs),

    /// Show, set or unset the lifecycle image for untrusted builds
    LifecycleImage(ValueArgs),
}

#[derive(Args, Debug)]
pub struct TrustedBuildersArgs {
    #[command(subcommand)]
    pub command: Option<TrustedBuildersCommands>,
}

#[derive(Subcommand, Debug)]
pub enum TrustedBuildersCommands {
    Add(TrustedBuilderName),
    Remove(TrustedBuilderName),
    List,
}

#[derive(Args, Debug)]
pub struct TrustedBuilderName {
    /// Builder image, or a pattern such as `paketobuildpacks/*`
    pub name: String,
}

#[derive(Args, Debug)]
pub struct RunImageMirrorsArgs {
    #[command(subcommand)]
    pub command: Option<RunImageMirrorsCommands>,
}

#[derive(Subcommand, Debug)]
pub enum RunImageMirrorsCommands {
    Add {
        image: String,
        #[arg(short, long = "mirror", required = true)]
        mirrors: Vec<String>,
    },
    /// Remove the given mirrors, or all of them when none are given
    Remove {
        image: String,
        #[arg(short, long = "mirror")]
        mirrors: Vec<String>,
    },
    List {
        image: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct ValueArgs {
    /// New value; omit to show the current one
    pub value: Option<String>,

    #[arg(short, long, conflicts_with = "value")]
    pub unset: bool,
}

#[derive(Args, Debug)]
pub struct ToggleArgs {
    /// true or false; omit to show the current value
    pub value: Option<bool>,
}

#[derive(Args, Debug)]
pub struct RegistriesArgs {
    #[command(subcommand)]
    pub command: Option<RegistriesCommands>,
}

#[derive(Subcommand, Debug)]
pub enum RegistriesCommands {
    Add {
        name: String,
        url: String,
        /// github or git
        #[arg(long = "type", default_value = "github")]
        kind: String,
        #[arg(long)]
        default: bool,
    },
    Remove {
        name: String,
    },
    List,
    Default {
        name: Option<String>,
        #[arg(short, long, conflicts_with = "name")]
        unset: bool,
    },
}

#[derive(Args, Debug)]
pub struct CompletionArgs {
    #[arg(short, long, value_enum, default_value_t = Shell::Bash)]
    pub shell: Shell,
}
