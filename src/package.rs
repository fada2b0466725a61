//! `buildpack package`: bundle a buildpack and its dependencies
//!
//! The package is an image whose layers are module layers, written to the
//! daemon, a registry, or a `.cnb` file holding an OCI layout.

use crate::buildpack::package::ModuleLayers;
use crate::buildpack::resolve::sort_modules;
use crate::buildpack::{BuildModule, ModuleKind, ModuleResolver, PackageMetadata, Resolved};
use crate::client::Client;
use crate::error::{PackError, PackResult};
use crate::image::layout::write_layout_archive;
use crate::image::{labels, Backend, FetchOptions, Image, ImageRef, PullPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

/// Extension of package files
pub const PACKAGE_EXTENSION: &str = "cnb";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildpackUri {
    pub uri: String,
}

/// A `[[dependencies]]` entry: exactly one of `uri` or `image`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependencyConfig {
    pub uri: String,
    pub image: String,
}

impl DependencyConfig {
    fn locator(&self) -> String {
        if self.image.is_empty() {
            self.uri.clone()
        } else {
            format!("docker://{}", self.image)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    pub os: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self { os: "linux".to_string() }
    }
}

/// Parsed `package.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageConfig {
    pub buildpack: BuildpackUri,
    pub dependencies: Vec<DependencyConfig>,
    pub platform: PlatformConfig,
}

impl PackageConfig {
    pub fn read(path: &Path) -> PackResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PackError::io(format!("reading package config {}", path.display()), e))?;
        Self::parse(&contents, &path.display().to_string())
    }

    pub fn parse(contents: &str, source: &str) -> PackResult<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| PackError::ConfigInvalid {
            path: PathBuf::from(source),
            reason: e.to_string(),
        })?;
        if config.buildpack.uri.is_empty() {
            return Err(PackError::invalid(format!("{}: buildpack.uri is required", source)));
        }
        for dependency in &config.dependencies {
            if dependency.uri.is_empty() == dependency.image.is_empty() {
                return Err(PackError::invalid(format!(
                    "{}: each dependency needs exactly one of uri or image",
                    source
                )));
            }
        }
        if !matches!(config.platform.os.as_str(), "linux" | "windows") {
            return Err(PackError::invalid(format!(
                "{}: platform.os must be linux or windows, got '{}'",
                source, config.platform.os
            )));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackageFormat {
    #[default]
    Image,
    File,
}

impl std::str::FromStr for PackageFormat {
    type Err = PackError;

    fn from_str(s: &str) -> PackResult<Self> {
        match s {
            "" | "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            other => Err(PackError::invalid(format!("unknown package format '{}'; use image or file", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// Image name, or output path for `File`
    pub name: String,
    pub config: PackageConfig,
    pub format: PackageFormat,
    /// Directory relative `uri` values are resolved against
    pub base_dir: PathBuf,
    pub publish: bool,
    pub pull_policy: PullPolicy,
    /// Buildpack registry for `urn:cnb:registry:` locators
    pub registry: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl PackageOptions {
    pub fn new(name: impl Into<String>, config: PackageConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            config,
            format: PackageFormat::Image,
            base_dir: base_dir.into(),
            publish: false,
            pull_policy: PullPolicy::default(),
            registry: None,
            labels: BTreeMap::new(),
        }
    }
}

/// `name` with the `.cnb` extension added when it has none
pub fn package_file_path(name: &str) -> PathBuf {
    let path = PathBuf::from(name);
    if path.extension().is_some() {
        path
    } else {
        path.with_extension(PACKAGE_EXTENSION)
    }
}

async fn resolve_modules(resolver: &ModuleResolver<'_>, locator: &str) -> PackResult<Vec<BuildModule>> {
    match resolver.resolve(ModuleKind::Buildpack, locator).await? {
        Resolved::Modules(contents) => {
            let mut modules = vec![contents.main];
            modules.extend(contents.dependencies);
            Ok(modules)
        }
        Resolved::FromBuilder => Err(PackError::invalid(format!(
            "{} cannot be used in a package: there is no builder",
            locator
        ))),
    }
}

impl Client {
    /// Package a buildpack; returns the image identifier or the written file path
    pub async fn package_buildpack(&self, opts: PackageOptions) -> PackResult<String> {
        self.interrupt()
            .cancellable("package", self.write_package(opts))
            .await
    }

    async fn write_package(&self, opts: PackageOptions) -> PackResult<String> {
        let config = &opts.config;
        if config.platform.os == "windows" && !self.config().experimental {
            return Err(PackError::invalid(
                "Windows buildpack packages are experimental; enable with `pack config experimental true`",
            ));
        }
        let image_name = match opts.format {
            PackageFormat::Image => {
                let name = ImageRef::parse(&opts.name)?;
                if opts.publish {
                    self.keychain().require_for_publish(&name).await?;
                }
                name
            }
            PackageFormat::File if opts.publish => {
                return Err(PackError::invalid("--publish cannot be used with --format file"))
            }
            PackageFormat::File => ImageRef::parse("pack.local/package:latest")?,
        };

        let fetch = if opts.publish {
            FetchOptions::registry()
        } else {
            FetchOptions::daemon(opts.pull_policy)
        };
        let resolver = ModuleResolver::new(self.fetcher(), self.downloader(), &opts.base_dir)
            .with_registry(self.registry_index(opts.registry.as_deref())?)
            .with_fetch_options(fetch);

        let mut modules = resolve_modules(&resolver, &config.buildpack.uri).await?;
        let main = modules[0].descriptor.clone();
        for dependency in &config.dependencies {
            let locator = dependency.locator();
            debug!("Packaging dependency {}", locator);
            for module in resolve_modules(&resolver, &locator).await? {
                if !modules.iter().any(|m| m.info().matches(module.info())) {
                    modules.push(module);
                }
            }
        }
        // every meta-buildpack child must be present and the graph acyclic
        let ordered = sort_modules(&modules)?;

        let target = main.targets.first();
        let arch = target.map(|t| t.arch.as_str()).filter(|a| !a.is_empty()).unwrap_or("amd64");
        let temp = TempDir::new().map_err(|e| PackError::io("creating temp dir", e))?;
        let layout_root = temp.path().join("layout");
        let backend = match (opts.format, opts.publish) {
            (PackageFormat::File, _) => Backend::Layout(layout_root.clone()),
            (PackageFormat::Image, true) => self.fetcher().remote_backend(),
            (PackageFormat::Image, false) => self.fetcher().local_backend(),
        };
        let store = Arc::clone(self.fetcher().store());
        let mut image = Image::new(image_name, backend, Arc::clone(&store), &config.platform.os, arch);

        let mut layers = ModuleLayers::default();
        for module in ordered {
            let layer_store = Arc::clone(&store);
            let writer = module.clone();
            let info = tokio::task::spawn_blocking(move || writer.write_layer(&layer_store))
                .await
                .map_err(|e| PackError::Internal(e.to_string()))??;
            layers.insert(&module.descriptor, &info.diff_id);
            if !image.has_layer(&info.diff_id) {
                image.reuse_layer(&info.diff_id)?;
            }
        }

        let metadata = PackageMetadata {
            info: main.info.clone(),
            stacks: main.stacks.clone(),
            targets: main.targets.clone(),
        };
        image.set_label(labels::BUILDPACKAGE_METADATA, &serde_json::to_string(&metadata)?)?;
        image.set_label(labels::BUILDPACK_LAYERS, &serde_json::to_string(&layers)?)?;
        for (key, value) in &opts.labels {
            image.set_label(key, value)?;
        }

        let identifier = image.save().await?;
        match opts.format {
            PackageFormat::Image => {
                info!("Saved package {} ({})", image.name(), main.info);
                Ok(identifier)
            }
            PackageFormat::File => {
                let out = package_file_path(&opts.name);
                let out = if out.is_absolute() { out } else { opts.base_dir.join(out) };
                tokio::task::spawn_blocking({
                    let out = out.clone();
                    move || write_layout_archive(&layout_root, &out)
                })
                .await
                .map_err(|e| PackError::Internal(e.to_string()))??;
                info!("Wrote package {} ({})", out.display(), main.info);
                Ok(out.display().to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildpack::blob::tests::leaf_buildpack;
    use crate::buildpack::package::is_layout_archive;
    use crate::client::tests::client;
    use crate::config::Config;
    use std::fs;

    fn meta_buildpack(root: &Path, children: &[(&str, &str)]) -> PathBuf {
        let dir = root.join("meta");
        fs::create_dir_all(&dir).unwrap();
        let mut toml = String::from("api = \"0.10\"\n[buildpack]\nid = \"example/meta\"\nversion = \"1.0.0\"\n[[order]]\n");
        for (id, version) in children {
            toml.push_str(&format!("[[order.group]]\nid = \"{}\"\nversion = \"{}\"\n", id, version));
        }
        fs::write(dir.join("buildpack.toml"), toml).unwrap();
        dir
    }

    fn config(uri: &str, deps: &[&str]) -> PackageConfig {
        PackageConfig {
            buildpack: BuildpackUri { uri: uri.to_string() },
            dependencies: deps
                .iter()
                .map(|d| DependencyConfig {
                    uri: d.to_string(),
                    image: String::new(),
                })
                .collect(),
            platform: PlatformConfig::default(),
        }
    }

    #[test]
    fn parses_package_toml() {
        let parsed = PackageConfig::parse(
            "[buildpack]\nuri = \".\"\n[[dependencies]]\nimage = \"example/dep:1\"\n[platform]\nos = \"linux\"\n",
            "package.toml",
        )
        .unwrap();
        assert_eq!(parsed.dependencies[0].locator(), "docker://example/dep:1");

        assert!(PackageConfig::parse("[[dependencies]]\nuri = \"x\"\n", "package.toml").is_err());
        assert!(PackageConfig::parse(
            "[buildpack]\nuri = \".\"\n[[dependencies]]\nuri = \"a\"\nimage = \"b\"\n",
            "package.toml"
        )
        .is_err());
        assert!(PackageConfig::parse("[buildpack]\nuri = \".\"\n[platform]\nos = \"plan9\"\n", "package.toml").is_err());
    }

    #[test]
    fn file_names_get_cnb_extension() {
        assert_eq!(package_file_path("out/node"), PathBuf::from("out/node.cnb"));
        assert_eq!(package_file_path("node.cnb"), PathBuf::from("node.cnb"));
        assert!("zip".parse::<PackageFormat>().is_err());
    }

    #[tokio::test]
    async fn packages_meta_buildpack_to_daemon_image() {
        let temp = TempDir::new().unwrap();
        let (client, runtime) = client(temp.path(), Config::default());
        leaf_buildpack(temp.path(), "example/leaf", "0.1.0");
        meta_buildpack(temp.path(), &[("example/leaf", "0.1.0")]);

        let mut opts = PackageOptions::new(
            "example/meta-package:1",
            config("meta", &["example_leaf-0.1.0"]),
            temp.path(),
        );
        opts.labels.insert("org.example.owner".into(), "team".into());
        client.package_buildpack(opts).await.unwrap();

        let state = runtime.lock();
        let inspect = state.images.get("docker.io/example/meta-package:1").unwrap();
        let labels = &inspect.config.as_ref().unwrap().labels;
        let metadata: PackageMetadata =
            serde_json::from_str(&labels[crate::image::labels::BUILDPACKAGE_METADATA]).unwrap();
        assert_eq!(metadata.info.id, "example/meta");
        let layers: ModuleLayers = serde_json::from_str(&labels[crate::image::labels::BUILDPACK_LAYERS]).unwrap();
        assert!(layers.contains("example/meta", "1.0.0"));
        assert!(layers.contains("example/leaf", "0.1.0"));
        assert_eq!(labels["org.example.owner"], "team");
        assert_eq!(inspect.root_fs.as_ref().unwrap().layers.as_ref().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn packages_to_cnb_file() {
        let temp = TempDir::new().unwrap();
        let (client, _) = client(temp.path(), Config::default());
        let leaf = leaf_buildpack(temp.path(), "example/leaf", "0.1.0");

        let mut opts = PackageOptions::new("leaf", config(&leaf.display().to_string(), &[]), temp.path());
        opts.format = PackageFormat::File;
        let written = client.package_buildpack(opts).await.unwrap();

        let path = temp.path().join("leaf.cnb");
        assert_eq!(written, path.display().to_string());
        assert!(is_layout_archive(&path).unwrap());
    }

    #[tokio::test]
    async fn missing_child_is_rejected() {
        let temp = TempDir::new().unwrap();
        let (client, runtime) = client(temp.path(), Config::default());
        meta_buildpack(temp.path(), &[("example/absent", "1.0.0")]);

        let err = client
            .package_buildpack(PackageOptions::new("example/meta:1", config("meta", &[]), temp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, PackError::BuildpackNotFound(_)));
        assert!(runtime.lock().images.is_empty());
    }

    #[tokio::test]
    async fn windows_requires_experimental() {
        let temp = TempDir::new().unwrap();
        let (client, _) = client(temp.path(), Config::default());
        let mut cfg = config("meta", &[]);
        cfg.platform.os = "windows".into();
        let err = client
            .package_buildpack(PackageOptions::new("example/meta:1", cfg, temp.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOptions);
    }
}
