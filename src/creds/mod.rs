//! Registry credential resolution
//!
//! Credentials are looked up per registry host, in order:
//! 1. an explicit in-memory keychain
//! 2. the `CNB_REGISTRY_AUTH` environment envelope
//! 3. docker's `config.json` (`credHelpers`, `credsStore`, inline `auths`)
//!
//! The lifecycle receives a fresh envelope covering only the registries a
//! build touches (see [`envelope::lifecycle_envelope`]).

pub mod docker_config;
pub mod envelope;
pub mod helper;

pub use docker_config::DockerConfig;
pub use envelope::{lifecycle_envelope, parse_env_envelope};

use crate::error::{PackError, PackResult};
use crate::image::reference::{ImageRef, DOCKER_HUB};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

/// Environment variable holding the JSON credential envelope
pub const REGISTRY_AUTH_ENV: &str = "CNB_REGISTRY_AUTH";

/// A registry credential
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Basic { username: String, password: String },
    /// OAuth refresh token issued by `docker login`
    IdentityToken(String),
    /// Bearer token presented as-is
    RegistryToken(String),
}

impl Credential {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value of an HTTP `Authorization` header
    pub fn authorization(&self) -> String {
        match self {
            Self::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
            }
            Self::IdentityToken(token) | Self::RegistryToken(token) => format!("Bearer {}", token),
        }
    }

    /// Parse an `Authorization` header value
    pub fn from_authorization(header: &str) -> Option<Self> {
        let (scheme, value) = header.trim().split_once(' ')?;
        match scheme {
            "Basic" => {
                let decoded = STANDARD.decode(value.trim()).ok()?;
                let decoded = String::from_utf8(decoded).ok()?;
                let (username, password) = decoded.split_once(':')?;
                Some(Self::basic(username, password))
            }
            "Bearer" => Some(Self::RegistryToken(value.trim().to_string())),
            _ => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => write!(f, "Basic({}, <redacted>)", username),
            Self::IdentityToken(_) => write!(f, "IdentityToken(<redacted>)"),
            Self::RegistryToken(_) => write!(f, "RegistryToken(<redacted>)"),
        }
    }
}

/// Normalize a registry key from config files or references to a host name
pub fn normalize_registry(key: &str) -> String {
    let host = key
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host);
    match host {
        "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => DOCKER_HUB.to_string(),
        other => other.to_string(),
    }
}

/// Layered credential lookup
#[derive(Default)]
pub struct Keychain {
    explicit: HashMap<String, Credential>,
    env: HashMap<String, Credential>,
    docker: Option<DockerConfig>,
    resolved: Mutex<HashMap<String, Option<Credential>>>,
}

impl Keychain {
    /// An empty keychain (anonymous access everywhere)
    pub fn new() -> Self {
        Self::default()
    }

    /// Keychain backed by `CNB_REGISTRY_AUTH` and the user's docker config
    pub fn from_environment() -> PackResult<Self> {
        let env = match std::env::var(REGISTRY_AUTH_ENV) {
            Ok(raw) if !raw.trim().is_empty() => parse_env_envelope(&raw)?,
            _ => HashMap::new(),
        };
        let docker = DockerConfig::load(&DockerConfig::default_path())?;
        Ok(Self {
            env,
            docker,
            ..Self::default()
        })
    }

    pub fn with_docker_config(mut self, config: DockerConfig) -> Self {
        self.docker = Some(config);
        self
    }

    /// Add an explicit credential, taking precedence over every other source
    pub fn with_credential(mut self, registry: &str, credential: Credential) -> Self {
        self.explicit.insert(normalize_registry(registry), credential);
        self
    }

    /// Resolve credentials for a registry host
    pub async fn resolve(&self, registry: &str) -> PackResult<Option<Credential>> {
        let key = normalize_registry(registry);
        if let Some(hit) = self.lock_resolved().get(&key) {
            return Ok(hit.clone());
        }

        let found = self.lookup(&key).await?;
        debug!(
            "Credentials for {}: {}",
            key,
            if found.is_some() { "found" } else { "none" }
        );
        self.lock_resolved().insert(key, found.clone());
        Ok(found)
    }

    /// Resolve credentials that a push to `image` needs
    ///
    /// Loopback registries are assumed open and never fail here.
    pub async fn require_for_publish(&self, image: &ImageRef) -> PackResult<Option<Credential>> {
        match self.resolve(image.registry()).await? {
            Some(cred) => Ok(Some(cred)),
            None if image.is_local_registry() => Ok(None),
            None => Err(PackError::AuthRequired {
                registry: image.registry().to_string(),
            }),
        }
    }

    async fn lookup(&self, key: &str) -> PackResult<Option<Credential>> {
        if let Some(cred) = self.explicit.get(key) {
            return Ok(Some(cred.clone()));
        }
        if let Some(cred) = self.env.get(key) {
            return Ok(Some(cred.clone()));
        }
        let Some(docker) = &self.docker else {
            return Ok(None);
        };

        if let Some(helper_name) = docker.helper_for(key) {
            if let Some(cred) = helper::get(helper_name, &docker_server_url(key)).await? {
                return Ok(Some(cred));
            }
        }
        Ok(docker.inline(key))
    }

    fn lock_resolved(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<Credential>>> {
        self.resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Server URL credential helpers store Docker Hub under
fn docker_server_url(registry: &str) -> String {
    if registry == DOCKER_HUB {
        "https://index.docker.io/v1/".to_string()
    } else {
        registry.to_string()
    }
}
