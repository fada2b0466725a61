//! Configuration management for pack
//!
//! Reads go through serde into [`Config`]; the `config` subcommands edit
//! the file in place with `toml_edit` so comments and unknown keys survive.

pub mod schema;

pub use schema::{Config, RegistryConfig, RunImageMirrors, TrustedBuilder};

use crate::error::{PackError, PackResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use toml_edit::{Array, ArrayOfTables, DocumentMut, Item, Table};
use tracing::{debug, info};

/// Overrides the pack home directory
pub const PACK_HOME_ENV: &str = "PACK_HOME";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a config manager for `$PACK_HOME/config.toml`
    pub fn new() -> Self {
        Self {
            config_path: Self::home().join("config.toml"),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// `$PACK_HOME`, else `~/.pack`
    pub fn home() -> PathBuf {
        match std::env::var_os(PACK_HOME_ENV) {
            Some(home) if !home.is_empty() => PathBuf::from(home),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".pack"),
        }
    }

    /// Directory holding the config file and pack's state
    pub fn dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Pull timestamps for the interval pull policies
    pub fn image_state_path(&self) -> PathBuf {
        self.dir().join("image.json")
    }

    /// Content-addressed layer store
    pub fn blobs_dir(&self) -> PathBuf {
        self.dir().join("blobs")
    }

    /// Local manifest lists
    pub fn manifests_dir(&self) -> PathBuf {
        self.dir().join("manifests")
    }

    /// Downloaded buildpacks, lifecycles and registry clones
    pub fn download_cache_dir(&self) -> PathBuf {
        self.dir().join("download-cache")
    }

    /// Load configuration, using defaults when the file does not exist
    pub async fn load(&self) -> PackResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> PackResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PackError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| PackError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file, replacing its contents
    pub async fn save(&self, config: &Config) -> PackResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            PackError::io(format!("writing config to {}", self.config_path.display()), e)
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> PackResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PackError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Apply `change` to the parsed document and write it back if the result is valid
    async fn edit<T>(&self, change: impl FnOnce(&mut DocumentMut) -> PackResult<T>) -> PackResult<T> {
        let mut doc = if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path).await.map_err(|e| {
                PackError::io(format!("reading config from {}", self.config_path.display()), e)
            })?;
            content.parse::<DocumentMut>()?
        } else {
            DocumentMut::new()
        };

        let result = change(&mut doc)?;

        let text = doc.to_string();
        toml::from_str::<Config>(&text).map_err(|e| PackError::ConfigInvalid {
            path: self.config_path.clone(),
            reason: e.to_string(),
        })?;

        self.ensure_config_dir().await?;
        fs::write(&self.config_path, text).await.map_err(|e| {
            PackError::io(format!("writing config to {}", self.config_path.display()), e)
        })?;
        debug!("Updated {}", self.config_path.display());
        Ok(result)
    }

    /// Set a top-level string key
    pub async fn set_string(&self, key: &str, value: &str) -> PackResult<()> {
        self.edit(|doc| {
            doc[key] = toml_edit::value(value);
            Ok(())
        })
        .await
    }

    pub async fn set_bool(&self, key: &str, value: bool) -> PackResult<()> {
        self.edit(|doc| {
            doc[key] = toml_edit::value(value);
            Ok(())
        })
        .await
    }

    /// Remove a top-level key; returns whether it was present
    pub async fn unset(&self, key: &str) -> PackResult<bool> {
        self.edit(|doc| Ok(doc.remove(key).is_some())).await
    }

    /// Returns false when the builder was already trusted
    pub async fn add_trusted_builder(&self, name: &str) -> PackResult<bool> {
        self.edit(|doc| {
            let builders = tables_mut(doc, "trusted-builders")?;
            if builders.iter().any(|t| str_field(t, "name") == Some(name)) {
                return Ok(false);
            }
            let mut entry = Table::new();
            entry["name"] = toml_edit::value(name);
            builders.push(entry);
            Ok(true)
        })
        .await
    }

    /// Returns false when the builder was not in the list
    pub async fn remove_trusted_builder(&self, name: &str) -> PackResult<bool> {
        self.edit(|doc| {
            let builders = tables_mut(doc, "trusted-builders")?;
            let before = builders.len();
            remove_where(builders, |t| str_field(t, "name") == Some(name));
            let removed = builders.len() != before;
            if builders.is_empty() {
                doc.remove("trusted-builders");
            }
            Ok(removed)
        })
        .await
    }

    /// Add mirrors for `image`, keeping existing ones
    pub async fn add_run_image_mirrors(&self, image: &str, mirrors: &[String]) -> PackResult<()> {
        self.edit(|doc| {
            let images = tables_mut(doc, "run-images")?;
            let position = images.iter().position(|t| str_field(t, "image") == Some(image));
            let index = match position {
                Some(index) => index,
                None => {
                    let mut entry = Table::new();
                    entry["image"] = toml_edit::value(image);
                    entry["mirrors"] = toml_edit::value(Array::new());
                    images.push(entry);
                    images.len() - 1
                }
            };
            let Some(entry) = images.get_mut(index) else {
                return Err(PackError::Internal("run image entry vanished".to_string()));
            };
            let mut current = string_array(entry, "mirrors");
            for mirror in mirrors {
                if !current.contains(mirror) {
                    current.push(mirror.clone());
                }
            }
            entry["mirrors"] = toml_edit::value(current.into_iter().collect::<Array>());
            Ok(())
        })
        .await
    }

    /// Remove `mirrors` for `image`, or every mirror when `mirrors` is empty
    pub async fn remove_run_image_mirrors(&self, image: &str, mirrors: &[String]) -> PackResult<bool> {
        self.edit(|doc| {
            let images = tables_mut(doc, "run-images")?;
            let Some(index) = images.iter().position(|t| str_field(t, "image") == Some(image)) else {
                return Ok(false);
            };
            let Some(entry) = images.get_mut(index) else {
                return Ok(false);
            };
            let remaining: Vec<String> = string_array(entry, "mirrors")
                .into_iter()
                .filter(|m| !mirrors.is_empty() && !mirrors.contains(m))
                .collect();
            if remaining.is_empty() {
                images.remove(index);
            } else {
                entry["mirrors"] = toml_edit::value(remaining.into_iter().collect::<Array>());
            }
            if images.is_empty() {
                doc.remove("run-images");
            }
            Ok(true)
        })
        .await
    }

    /// Add (or replace) a buildpack registry
    pub async fn add_registry(&self, registry: &RegistryConfig, make_default: bool) -> PackResult<()> {
        self.edit(|doc| {
            let registries = tables_mut(doc, "registries")?;
            remove_where(registries, |t| str_field(t, "name") == Some(registry.name.as_str()));
            let mut entry = Table::new();
            entry["name"] = toml_edit::value(registry.name.as_str());
            entry["type"] = toml_edit::value(registry.kind.as_str());
            entry["url"] = toml_edit::value(registry.url.as_str());
            registries.push(entry);
            if make_default {
                doc["default-registry-name"] = toml_edit::value(registry.name.as_str());
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_registry(&self, name: &str) -> PackResult<bool> {
        self.edit(|doc| {
            let registries = tables_mut(doc, "registries")?;
            let before = registries.len();
            remove_where(registries, |t| str_field(t, "name") == Some(name));
            let removed = registries.len() != before;
            if registries.is_empty() {
                doc.remove("registries");
            }
            if doc.get("default-registry-name").and_then(Item::as_str) == Some(name) {
                doc.remove("default-registry-name");
            }
            Ok(removed)
        })
        .await
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn tables_mut<'a>(doc: &'a mut DocumentMut, key: &str) -> PackResult<&'a mut ArrayOfTables> {
    doc.entry(key)
        .or_insert_with(|| Item::ArrayOfTables(ArrayOfTables::new()))
        .as_array_of_tables_mut()
        .ok_or_else(|| PackError::invalid(format!("config key '{}' must be an array of tables", key)))
}

fn str_field<'a>(table: &'a Table, key: &str) -> Option<&'a str> {
    table.get(key).and_then(Item::as_str)
}

fn string_array(table: &Table, key: &str) -> Vec<String> {
    table
        .get(key)
        .and_then(Item::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn remove_where(tables: &mut ArrayOfTables, matches: impl Fn(&Table) -> bool) {
    loop {
        let Some(index) = tables.iter().position(&matches) else {
            break;
        };
        tables.remove(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config, Config::default());
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));

        let config = Config {
            default_builder_image: Some("example/builder".to_string()),
            ..Default::default()
        };
        manager.save(&config).await.unwrap();
        assert_eq!(manager.load().await.unwrap(), config);
    }

    #[tokio::test]
    async fn edits_preserve_comments() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "# my settings\nexperimental = true\n").unwrap();
        let manager = ConfigManager::with_path(path.clone());

        assert!(manager.add_trusted_builder("example/builder").await.unwrap());
        assert!(!manager.add_trusted_builder("example/builder").await.unwrap());
        manager.set_string("pull-policy", "never").await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# my settings"));
        let config = manager.load().await.unwrap();
        assert!(config.experimental);
        assert_eq!(config.trusted_builders.len(), 1);
        assert_eq!(config.pull_policy.as_deref(), Some("never"));

        assert!(manager.remove_trusted_builder("example/builder").await.unwrap());
        assert!(!manager.remove_trusted_builder("example/builder").await.unwrap());
        assert!(manager.load().await.unwrap().trusted_builders.is_empty());
    }

    #[tokio::test]
    async fn run_image_mirrors() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));

        manager
            .add_run_image_mirrors("example/run", &["a.example.com/run".into()])
            .await
            .unwrap();
        manager
            .add_run_image_mirrors("example/run", &["b.example.com/run".into(), "a.example.com/run".into()])
            .await
            .unwrap();
        let config = manager.load().await.unwrap();
        assert_eq!(
            config.mirrors_for("example/run"),
            vec!["a.example.com/run", "b.example.com/run"]
        );

        manager
            .remove_run_image_mirrors("example/run", &["a.example.com/run".into()])
            .await
            .unwrap();
        assert_eq!(manager.load().await.unwrap().mirrors_for("example/run"), vec!["b.example.com/run"]);

        assert!(manager.remove_run_image_mirrors("example/run", &[]).await.unwrap());
        assert!(manager.load().await.unwrap().run_images.is_empty());
    }

    #[tokio::test]
    async fn registries_and_default() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));
        let registry = RegistryConfig {
            name: "mine".into(),
            kind: "git".into(),
            url: "https://git.example.com/index".into(),
        };
        manager.add_registry(&registry, true).await.unwrap();
        let config = manager.load().await.unwrap();
        assert_eq!(config.default_registry_name.as_deref(), Some("mine"));
        assert_eq!(config.registries, vec![registry]);

        assert!(manager.remove_registry("mine").await.unwrap());
        let config = manager.load().await.unwrap();
        assert!(config.registries.is_empty());
        assert!(config.default_registry_name.is_none());
    }

    #[tokio::test]
    async fn invalid_edits_are_not_written() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path.clone());
        assert!(manager.set_string("experimental", "yes").await.is_err());
        assert!(!path.exists());
    }
}
