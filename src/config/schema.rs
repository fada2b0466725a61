//! Configuration schema for pack
//!
//! Configuration is stored at `$PACK_HOME/config.toml` (default `~/.pack/config.toml`)

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Builder used when `--builder` is omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_builder_image: Option<String>,

    /// Enables experimental commands and flags
    pub experimental: bool,

    /// User-local run image mirrors
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run_images: Vec<RunImageMirrors>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trusted_builders: Vec<TrustedBuilder>,

    /// Buildpack registries besides the official one
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub registries: Vec<RegistryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_registry_name: Option<String>,

    /// `always`, `never`, `if-not-present`, `hourly`, `daily`, `weekly` or `interval=...`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,

    /// Lifecycle image for untrusted builds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle_image: Option<String>,

    /// Host directory the lifecycle exports `--layout` builds into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_repository_dir: Option<String>,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_builder_image: None,
            experimental: false,
            run_images: Vec::new(),
            trusted_builders: Vec::new(),
            registries: Vec::new(),
            default_registry_name: None,
            pull_policy: None,
            lifecycle_image: None,
            layout_repository_dir: None,
            log_format: "text".to_string(),
        }
    }
}

impl Config {
    /// Mirrors configured for `image`
    pub fn mirrors_for(&self, image: &str) -> Vec<String> {
        self.run_images
            .iter()
            .filter(|r| r.image == image)
            .flat_map(|r| r.mirrors.iter().cloned())
            .collect()
    }

    pub fn registry(&self, name: &str) -> Option<&RegistryConfig> {
        self.registries.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunImageMirrors {
    pub image: String,
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrustedBuilder {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    pub name: String,
    /// `github` or `git`
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kebab_case_keys() {
        let raw = r#"
default-builder-image = "paketobuildpacks/builder-jammy-base"
experimental = true
pull-policy = "if-not-present"

[[run-images]]
image = "example/run"
mirrors = ["m1.example.com/run", "m2.example.com/run"]

[[trusted-builders]]
name = "example/builder"

[[registries]]
name = "mine"
type = "git"
url = "https://git.example.com/index"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.experimental);
        assert_eq!(config.mirrors_for("example/run").len(), 2);
        assert!(config.mirrors_for("other").is_empty());
        assert_eq!(config.trusted_builders[0].name, "example/builder");
        assert_eq!(config.registry("mine").unwrap().kind, "git");
        assert_eq!(config.log_format, "text");
    }

    #[test]
    fn defaults_serialize_compactly() {
        let text = toml::to_string(&Config::default()).unwrap();
        assert_eq!(text.trim(), "experimental = false\nlog-format = \"text\"");
    }
}
