//! `CNB_REGISTRY_AUTH` envelopes
//!
//! Input envelopes map a registry to either an object
//! (`{"username","password"}`, `{"identitytoken"}`, `{"registrytoken"}`) or
//! a ready `Authorization` header string. The envelope handed to the
//! lifecycle always uses header strings.

use crate::creds::{normalize_registry, Credential, Keychain};
use crate::error::{PackError, PackResult};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Deserialize)]
#[serde(untagged)]
enum EnvEntry {
    Header(String),
    Fields {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        identitytoken: Option<String>,
        #[serde(default)]
        registrytoken: Option<String>,
    },
}

/// Parse the JSON envelope from the environment
pub fn parse_env_envelope(raw: &str) -> PackResult<HashMap<String, Credential>> {
    let entries: HashMap<String, EnvEntry> =
        serde_json::from_str(raw).map_err(|e| PackError::invalid(format!(
            "{} is not a valid credential envelope: {}",
            super::REGISTRY_AUTH_ENV,
            e
        )))?;

    let mut out = HashMap::new();
    for (registry, entry) in entries {
        let credential = match entry {
            EnvEntry::Header(header) => Credential::from_authorization(&header),
            EnvEntry::Fields {
                identitytoken: Some(token),
                ..
            } => Some(Credential::IdentityToken(token)),
            EnvEntry::Fields {
                registrytoken: Some(token),
                ..
            } => Some(Credential::RegistryToken(token)),
            EnvEntry::Fields {
                username: Some(username),
                password,
                ..
            } => Some(Credential::basic(username, password.unwrap_or_default())),
            EnvEntry::Fields { .. } => None,
        };
        match credential {
            Some(credential) => {
                out.insert(normalize_registry(&registry), credential);
            }
            None => {
                return Err(PackError::invalid(format!(
                    "credential for {} in {} has no usable fields",
                    registry,
                    super::REGISTRY_AUTH_ENV
                )))
            }
        }
    }
    Ok(out)
}

/// Build the envelope for exactly `registries`, skipping ones without credentials
pub async fn lifecycle_envelope<'a>(
    keychain: &Keychain,
    registries: impl IntoIterator<Item = &'a str>,
) -> PackResult<String> {
    let unique: BTreeSet<String> = registries.into_iter().map(normalize_registry).collect();

    let mut envelope = BTreeMap::new();
    for registry in unique {
        if let Some(credential) = keychain.resolve(&registry).await? {
            envelope.insert(registry, credential.authorization());
        }
    }
    Ok(serde_json::to_string(&envelope)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_objects_and_headers() {
        let raw = r#"{
            "gcr.io": {"username": "_json_key", "password": "secret"},
            "https://index.docker.io/v1/": "Basic dXNlcjpwYXNz",
            "ghcr.io": {"identitytoken": "refresh"},
            "quay.io": {"registrytoken": "bearer"}
        }"#;
        let parsed = parse_env_envelope(raw).unwrap();
        assert_eq!(parsed["gcr.io"], Credential::basic("_json_key", "secret"));
        assert_eq!(parsed["docker.io"], Credential::basic("user", "pass"));
        assert_eq!(parsed["ghcr.io"], Credential::IdentityToken("refresh".into()));
        assert_eq!(parsed["quay.io"], Credential::RegistryToken("bearer".into()));
    }

    #[test]
    fn rejects_malformed_envelopes() {
        assert!(parse_env_envelope("not json").is_err());
        assert!(parse_env_envelope(r#"{"gcr.io": {}}"#).is_err());
        assert!(parse_env_envelope(r#"{"gcr.io": "Digest abc"}"#).is_err());
    }

    #[tokio::test]
    async fn envelope_covers_only_requested_registries() {
        let keychain = Keychain::new()
            .with_credential("gcr.io", Credential::basic("a", "b"))
            .with_credential("ghcr.io", Credential::RegistryToken("t".into()));

        let envelope = lifecycle_envelope(&keychain, ["gcr.io", "gcr.io", "docker.io"])
            .await
            .unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&envelope).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["gcr.io"], "Basic YTpi");
    }
}
