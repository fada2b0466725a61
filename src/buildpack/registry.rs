//! Buildpack registry index lookups
//!
//! An index is a repository of JSON-lines files, one per `namespace/name`,
//! at `<ns[0..2]>/<ns[2..4]>/<ns>_<name>`. `github` registries are read
//! file-by-file over HTTPS; `git` registries are cloned into a cache
//! directory and refreshed with `git pull`.

use crate::buildpack::locator::compare_versions;
use crate::error::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

pub const DEFAULT_REGISTRY_NAME: &str = "official";
pub const DEFAULT_REGISTRY_URL: &str = "https://github.com/buildpacks/registry-index";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One line of an index file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub ns: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub yanked: bool,
    /// Image reference of the packaged buildpack
    pub addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Github,
    Git,
}

impl FromStr for IndexKind {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::Github),
            "git" => Ok(Self::Git),
            other => Err(PackError::invalid(format!(
                "registry type '{}' must be 'github' or 'git'",
                other
            ))),
        }
    }
}

/// Relative path of the index file for `ns/name`
pub fn index_path(ns: &str, name: &str) -> PackResult<String> {
    if ns.len() < 4 || !ns.is_ascii() {
        return Err(PackError::RegistryIndex {
            id: format!("{}/{}", ns, name),
            reason: "namespace must be at least 4 ASCII characters".to_string(),
        });
    }
    Ok(format!("{}/{}/{}_{}", &ns[..2], &ns[2..4], ns, name))
}

/// Parse an index file's JSON lines
pub fn parse_entries(id: &str, contents: &str) -> PackResult<Vec<RegistryEntry>> {
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| PackError::RegistryIndex {
                id: id.to_string(),
                reason: format!("malformed index line: {}", e),
            })
        })
        .collect()
}

/// Pick `version` exactly, or the highest non-yanked version
pub fn select_version<'a>(entries: &'a [RegistryEntry], version: Option<&str>) -> Option<&'a RegistryEntry> {
    match version {
        Some(v) if !v.is_empty() && v != "latest" => entries.iter().find(|e| !e.yanked && e.version == v),
        _ => entries
            .iter()
            .filter(|e| !e.yanked)
            .max_by(|a, b| compare_versions(&a.version, &b.version)),
    }
}

/// A configured buildpack registry
#[derive(Debug, Clone)]
pub struct RegistryIndex {
    pub name: String,
    pub kind: IndexKind,
    pub url: String,
    cache_dir: PathBuf,
}

impl RegistryIndex {
    /// `cache_root` is where git registries are cloned (keyed by URL)
    pub fn new(name: impl Into<String>, kind: IndexKind, url: impl Into<String>, cache_root: &Path) -> Self {
        let url = url.into();
        let key = hex::encode(Sha256::digest(url.as_bytes()));
        Self {
            name: name.into(),
            kind,
            cache_dir: cache_root.join(format!("registry-{}", key)),
            url,
        }
    }

    pub fn official(cache_root: &Path) -> Self {
        Self::new(DEFAULT_REGISTRY_NAME, IndexKind::Github, DEFAULT_REGISTRY_URL, cache_root)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Find `ns/name[@version]`
    pub async fn locate(&self, ns: &str, name: &str, version: Option<&str>) -> PackResult<RegistryEntry> {
        let id = format!("{}/{}", ns, name);
        let entries = self.entries(ns, name).await?;
        select_version(&entries, version)
            .cloned()
            .ok_or_else(|| PackError::RegistryIndex {
                id: id.clone(),
                reason: match version {
                    Some(v) => format!("version {} not found (or yanked) in registry {}", v, self.name),
                    None => format!("no usable versions in registry {}", self.name),
                },
            })
    }

    async fn entries(&self, ns: &str, name: &str) -> PackResult<Vec<RegistryEntry>> {
        let id = format!("{}/{}", ns, name);
        let path = index_path(ns, name)?;
        let contents = match self.kind {
            IndexKind::Github => self.fetch_github(&id, &path).await?,
            IndexKind::Git => {
                self.refresh_git().await?;
                let file = self.cache_dir.join(&path);
                tokio::fs::read_to_string(&file)
                    .await
                    .map_err(|e| PackError::RegistryIndex {
                        id: id.clone(),
                        reason: format!("reading {}: {}", file.display(), e),
                    })?
            }
        };
        parse_entries(&id, &contents)
    }

    fn raw_url(&self, path: &str) -> String {
        match self.url.strip_prefix("https://github.com/") {
            Some(repo) => format!(
                "https://raw.githubusercontent.com/{}/main/{}",
                repo.trim_end_matches('/').trim_end_matches(".git"),
                path
            ),
            None => format!("{}/{}", self.url.trim_end_matches('/'), path),
        }
    }

    async fn fetch_github(&self, id: &str, path: &str) -> PackResult<String> {
        let url = self.raw_url(path);
        debug!("Fetching registry index {}", url);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let config = ureq::Agent::config_builder()
                .timeout_global(Some(HTTP_TIMEOUT))
                .build();
            let agent = ureq::Agent::new_with_config(config);
            let fail = |reason: String| PackError::RegistryIndex {
                id: id.clone(),
                reason,
            };
            match agent.get(&url).call() {
                Ok(mut response) => response
                    .body_mut()
                    .read_to_string()
                    .map_err(|e| fail(e.to_string())),
                Err(ureq::Error::StatusCode(404)) => Err(fail("not found in registry".to_string())),
                Err(e) => Err(fail(format!("fetching {}: {}", url, e))),
            }
        })
        .await
        .map_err(|e| PackError::Internal(e.to_string()))?
    }

    async fn refresh_git(&self) -> PackResult<()> {
        let (args, action): (Vec<String>, &str) = if self.cache_dir.join(".git").is_dir() {
            (
                vec![
                    "-C".to_string(),
                    self.cache_dir.display().to_string(),
                    "pull".to_string(),
                    "--ff-only".to_string(),
                ],
                "refreshing",
            )
        } else {
            info!("Cloning registry {} ({})", self.name, self.url);
            (
                vec![
                    "clone".to_string(),
                    "--depth".to_string(),
                    "1".to_string(),
                    self.url.clone(),
                    self.cache_dir.display().to_string(),
                ],
                "cloning",
            )
        };

        debug!("Executing: git {}", args.join(" "));
        let output = Command::new("git")
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PackError::command_failed("git", e))?;
        if !output.status.success() {
            return Err(PackError::RegistryIndex {
                id: self.name.clone(),
                reason: format!(
                    "{} {}: {}",
                    action,
                    self.url,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}
