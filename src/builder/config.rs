//! `builder.toml` schema and loading
//!
//! Relative `uri` values are resolved against the directory holding the
//! file, so a config can reference buildpacks next to it.

use crate::buildpack::descriptor::{Order, Target};
use crate::error::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A module entry: exactly one of `uri` or `image`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleConfig {
    pub id: String,
    pub version: String,
    pub uri: String,
    pub image: String,
}

impl ModuleConfig {
    /// The locator to resolve for this entry
    pub fn locator(&self) -> &str {
        if self.uri.is_empty() {
            &self.image
        } else {
            &self.uri
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct StackConfig {
    pub id: String,
    pub build_image: String,
    pub run_image: String,
    pub run_image_mirrors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub image: String,
    /// Written to `/platform/env/<name>` inside the builder
    pub env: Vec<EnvEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunImageConfig {
    pub image: String,
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub images: Vec<RunImageConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    pub uri: String,
    pub version: String,
}

/// Parsed `builder.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuilderConfig {
    pub description: String,
    pub buildpacks: Vec<ModuleConfig>,
    pub extensions: Vec<ModuleConfig>,
    pub order: Order,
    pub order_extensions: Order,
    pub stack: Option<StackConfig>,
    pub build: BuildConfig,
    pub run: RunConfig,
    pub lifecycle: LifecycleConfig,
    pub targets: Vec<Target>,
}

impl BuilderConfig {
    /// Read and validate a `builder.toml`; returns the config and warnings
    pub fn read(path: &Path) -> PackResult<(Self, Vec<String>)> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PackError::io(format!("reading builder config {}", path.display()), e))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let base = std::path::absolute(&base)
            .map_err(|e| PackError::io(format!("resolving {}", base.display()), e))?;
        Self::parse(&contents, &base, &path.display().to_string())
    }

    /// Parse config text; relative URIs are joined to `base_dir`
    pub fn parse(contents: &str, base_dir: &Path, source: &str) -> PackResult<(Self, Vec<String>)> {
        let mut config: Self = toml::from_str(contents).map_err(|e| PackError::ConfigInvalid {
            path: PathBuf::from(source),
            reason: e.to_string(),
        })?;

        for module in config.buildpacks.iter_mut().chain(config.extensions.iter_mut()) {
            module.uri = resolve_uri(&module.uri, base_dir);
        }
        config.lifecycle.uri = resolve_uri(&config.lifecycle.uri, base_dir);

        let warnings = config.validate()?;
        debug!(
            "Builder config {}: {} buildpacks, {} order groups",
            source,
            config.buildpacks.len(),
            config.order.len()
        );
        Ok((config, warnings))
    }

    /// The image the builder is layered on
    pub fn build_image(&self) -> &str {
        if !self.build.image.is_empty() {
            return &self.build.image;
        }
        self.stack.as_ref().map(|s| s.build_image.as_str()).unwrap_or("")
    }

    /// Run images with mirrors; `[stack]` contributes one when `[run]` is empty
    pub fn run_images(&self) -> Vec<RunImageConfig> {
        if !self.run.images.is_empty() {
            return self.run.images.clone();
        }
        match &self.stack {
            Some(stack) if !stack.run_image.is_empty() => vec![RunImageConfig {
                image: stack.run_image.clone(),
                mirrors: stack.run_image_mirrors.clone(),
            }],
            _ => Vec::new(),
        }
    }

    fn validate(&self) -> PackResult<Vec<String>> {
        let mut warnings = Vec::new();

        if self.build_image().is_empty() {
            return Err(PackError::invalid("builder config must set build.image (or stack.build-image)"));
        }
        if self.run_images().is_empty() {
            return Err(PackError::invalid("builder config must set run.images (or stack.run-image)"));
        }
        if let Some(stack) = &self.stack {
            if !self.run.images.is_empty()
                && !stack.run_image.is_empty()
                && stack.run_image != self.run.images[0].image
            {
                return Err(PackError::invalid(format!(
                    "stack.run-image {} must match the first run.images entry {}",
                    stack.run_image, self.run.images[0].image
                )));
            }
        }
        if !self.lifecycle.uri.is_empty() && !self.lifecycle.version.is_empty() {
            return Err(PackError::invalid(
                "lifecycle can only set one of uri or version",
            ));
        }
        if !self.lifecycle.version.is_empty() && semver::Version::parse(&self.lifecycle.version).is_err() {
            return Err(PackError::invalid(format!(
                "lifecycle version '{}' is not a semantic version",
                self.lifecycle.version
            )));
        }

        for module in self.buildpacks.iter().chain(&self.extensions) {
            match (module.uri.is_empty(), module.image.is_empty()) {
                (true, true) => {
                    return Err(PackError::invalid(format!(
                        "module {} must set one of uri or image",
                        if module.id.is_empty() { "<unnamed>" } else { &module.id }
                    )))
                }
                (false, false) => {
                    return Err(PackError::invalid(format!(
                        "module {} cannot set both uri and image",
                        module.id
                    )))
                }
                _ => {}
            }
        }

        if self.order.is_empty() {
            warnings.push("empty order definition".to_string());
        }
        if self.stack.is_some() && !self.targets.is_empty() {
            warnings.push("both [stack] and [[targets]] are set; targets take precedence".to_string());
        }
        Ok(warnings)
    }
}

/// Join a scheme-less relative path onto `base`
fn resolve_uri(uri: &str, base: &Path) -> String {
    if uri.is_empty() || uri.contains("://") || Path::new(uri).is_absolute() {
        return uri.to_string();
    }
    if looks_like_image_or_urn(uri) {
        return uri.to_string();
    }
    format!("file://{}", base.join(uri).display())
}

fn looks_like_image_or_urn(uri: &str) -> bool {
    uri.starts_with("urn:") || uri.starts_with("docker:")
}
