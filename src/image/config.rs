//! OCI image configuration model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The image config JSON (`application/vnd.oci.image.config.v1+json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default)]
    pub architecture: String,

    #[serde(default)]
    pub os: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,

    #[serde(default)]
    pub config: ContainerSettings,

    #[serde(default)]
    pub rootfs: RootFs,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<History>,
}

/// Runtime defaults recorded in the config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "null_as_default")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            kind: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ImageConfig {
    /// A config for an empty image on the given platform
    pub fn empty(os: &str, architecture: &str) -> Self {
        Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
            ..Default::default()
        }
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.config.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }

    /// Set or replace `key` in the env list, keeping order stable
    pub fn set_env(&mut self, key: &str, value: &str) {
        let entry = format!("{}={}", key, value);
        let prefix = format!("{}=", key);
        match self.config.env.iter_mut().find(|e| e.starts_with(&prefix)) {
            Some(existing) => *existing = entry,
            None => self.config.env.push(entry),
        }
    }

    /// Serialize to the canonical bytes that are hashed for the config digest
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_config_with_nulls() {
        let json = r#"{
            "architecture": "amd64",
            "os": "linux",
            "config": {"Env": null, "Labels": null, "Cmd": ["/bin/sh"]},
            "rootfs": {"type": "layers", "diff_ids": ["sha256:aa"]}
        }"#;
        let config: ImageConfig = serde_json::from_str(json).unwrap();
        assert!(config.config.env.is_empty());
        assert!(config.config.labels.is_empty());
        assert_eq!(config.config.cmd, Some(vec!["/bin/sh".to_string()]));
        assert_eq!(config.rootfs.diff_ids, vec!["sha256:aa"]);
    }

    #[test]
    fn env_updates_in_place() {
        let mut config = ImageConfig::empty("linux", "amd64");
        config.set_env("CNB_USER_ID", "1000");
        config.set_env("PATH", "/usr/bin");
        config.set_env("CNB_USER_ID", "1001");
        assert_eq!(config.config.env, vec!["CNB_USER_ID=1001", "PATH=/usr/bin"]);
        assert_eq!(config.env("PATH"), Some("/usr/bin"));
        assert_eq!(config.env("MISSING"), None);
    }
}
