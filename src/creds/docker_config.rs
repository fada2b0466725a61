//! Docker CLI `config.json`

use crate::creds::{normalize_registry, Credential};
use crate::error::{PackError, PackResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(rename = "credsStore", default)]
    creds_store: Option<String>,
    #[serde(rename = "credHelpers", default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    identitytoken: Option<String>,
    #[serde(default)]
    registrytoken: Option<String>,
}

impl DockerConfig {
    /// `$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`
    pub fn default_path() -> PathBuf {
        match std::env::var_os("DOCKER_CONFIG") {
            Some(dir) => PathBuf::from(dir).join("config.json"),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".docker")
                .join("config.json"),
        }
    }

    /// Load a config file; `None` when it does not exist
    pub fn load(path: &Path) -> PackResult<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(Self::parse(&bytes).map_err(|reason| {
                PackError::ConfigInvalid {
                    path: path.to_path_buf(),
                    reason,
                }
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PackError::io(format!("reading {}", path.display()), e)),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let raw: Self = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        Ok(Self {
            auths: raw
                .auths
                .into_iter()
                .map(|(k, v)| (normalize_registry(&k), v))
                .collect(),
            creds_store: raw.creds_store.filter(|s| !s.is_empty()),
            cred_helpers: raw
                .cred_helpers
                .into_iter()
                .map(|(k, v)| (normalize_registry(&k), v))
                .collect(),
        })
    }

    /// Credential helper to consult for `registry`, if any
    pub fn helper_for(&self, registry: &str) -> Option<&str> {
        self.cred_helpers
            .get(registry)
            .or(self.creds_store.as_ref())
            .map(String::as_str)
    }

    /// Credential stored inline under `auths`
    pub fn inline(&self, registry: &str) -> Option<Credential> {
        let entry = self.auths.get(registry)?;
        if let Some(token) = &entry.registrytoken {
            return Some(Credential::RegistryToken(token.clone()));
        }
        if let Some(token) = &entry.identitytoken {
            return Some(Credential::IdentityToken(token.clone()));
        }
        if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
            return Some(Credential::basic(username.clone(), password.clone()));
        }
        let decoded = STANDARD.decode(entry.auth.as_ref()?).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Credential::basic(username, password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{
        "auths": {
            "https://index.docker.io/v1/": {"auth": "dXNlcjpwYXNz"},
            "registry.example.com": {"identitytoken": "refresh"},
            "ghcr.io": {}
        },
        "credsStore": "desktop",
        "credHelpers": {"gcr.io": "gcloud"}
    }"#;

    #[test]
    fn inline_auths() {
        let config = DockerConfig::parse(CONFIG.as_bytes()).unwrap();
        assert_eq!(config.inline("docker.io"), Some(Credential::basic("user", "pass")));
        assert_eq!(
            config.inline("registry.example.com"),
            Some(Credential::IdentityToken("refresh".into()))
        );
        assert_eq!(config.inline("ghcr.io"), None);
        assert_eq!(config.inline("quay.io"), None);
    }

    #[test]
    fn helper_selection() {
        let config = DockerConfig::parse(CONFIG.as_bytes()).unwrap();
        assert_eq!(config.helper_for("gcr.io"), Some("gcloud"));
        assert_eq!(config.helper_for("quay.io"), Some("desktop"));

        let no_store = DockerConfig::parse(br#"{"credsStore": ""}"#).unwrap();
        assert_eq!(no_store.helper_for("quay.io"), None);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(DockerConfig::load(&dir.path().join("config.json")).unwrap().is_none());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{").unwrap();
        assert!(matches!(
            DockerConfig::load(&bad),
            Err(PackError::ConfigInvalid { .. })
        ));
    }

    #[test]
    #[serial]
    fn default_path_honours_docker_config() {
        std::env::set_var("DOCKER_CONFIG", "/tmp/docker-cfg");
        assert_eq!(
            DockerConfig::default_path(),
            PathBuf::from("/tmp/docker-cfg/config.json")
        );
        std::env::remove_var("DOCKER_CONFIG");
        assert!(DockerConfig::default_path().ends_with(".docker/config.json"));
    }
}
