//! Image references
//!
//! Parses `[registry/]repository[:tag][@digest]` and normalizes Docker Hub
//! shorthand (`busybox` becomes `docker.io/library/busybox:latest`).

use crate::error::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Canonical name of Docker Hub
pub const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_INDEX: &str = "index.docker.io";
const DEFAULT_TAG: &str = "latest";

/// A parsed, normalized image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    /// Parse a reference string
    pub fn parse(input: &str) -> PackResult<Self> {
        let invalid = |reason: &str| PackError::InvalidReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("reference is empty"));
        }

        let (rest, digest) = match trimmed.split_once('@') {
            Some((rest, digest)) => {
                validate_digest(digest).map_err(|r| invalid(&r))?;
                (rest, Some(digest.to_string()))
            }
            None => (trimmed, None),
        };

        // A ':' after the last '/' separates the tag; one before it is a port.
        let last_slash = rest.rfind('/');
        let (name, tag) = match rest.rfind(':') {
            Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
                (&rest[..colon], Some(rest[colon + 1..].to_string()))
            }
            _ => (rest, None),
        };

        if let Some(tag) = &tag {
            validate_tag(tag).map_err(|r| invalid(&r))?;
        }

        let (registry, repository) = split_registry(name);
        let repository = if registry == DOCKER_HUB && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        };
        validate_repository(&repository).map_err(|r| invalid(&r))?;

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// `registry/repository`, without tag or digest
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Directory of this image inside an OCI layout repository:
    /// `registry/repository/tag`, or `registry/repository/<alg>/<hex>` when pinned
    pub fn layout_path(&self) -> PathBuf {
        // the lifecycle names Docker Hub by its index host
        let registry = if self.registry == DOCKER_HUB { DOCKER_HUB_INDEX } else { &self.registry };
        let mut path = PathBuf::from(registry);
        path.extend(self.repository.split('/'));
        match (&self.digest, &self.tag) {
            (Some(digest), _) => match digest.split_once(':') {
                Some((alg, hex)) => path.extend([alg, hex]),
                None => path.push(digest),
            },
            (None, Some(tag)) => path.push(tag),
            (None, None) => path.push(DEFAULT_TAG),
        }
        path
    }

    /// A reference pinned to a digest never changes
    pub fn is_immutable(&self) -> bool {
        self.digest.is_some()
    }

    /// Same repository with a different tag
    pub fn with_tag(&self, tag: &str) -> PackResult<Self> {
        validate_tag(tag).map_err(|reason| PackError::InvalidReference {
            reference: format!("{}:{}", self.name(), tag),
            reason,
        })?;
        Ok(Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        })
    }

    /// Same repository pinned to `digest`
    pub fn with_digest(&self, digest: &str) -> PackResult<Self> {
        validate_digest(digest).map_err(|reason| PackError::InvalidReference {
            reference: format!("{}@{}", self.name(), digest),
            reason,
        })?;
        Ok(Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        })
    }

    pub fn same_registry(&self, other: &ImageRef) -> bool {
        self.registry == other.registry
    }

    /// Registry host used when looking up credentials
    pub fn credential_key(&self) -> &str {
        &self.registry
    }

    /// Registries on the loopback interface are assumed to be open
    pub fn is_local_registry(&self) -> bool {
        let host = self.registry.split(':').next().unwrap_or("");
        host == "localhost" || host == "127.0.0.1" || host == "[::1]"
    }

    /// Convert to the registry client's reference type
    pub fn to_oci(&self) -> PackResult<oci_distribution::Reference> {
        oci_distribution::Reference::from_str(&self.to_string()).map_err(|e| {
            PackError::InvalidReference {
                reference: self.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

fn split_registry(name: &str) -> (String, &str) {
    match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            let registry = match first {
                "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB.to_string(),
                other => other.to_string(),
            };
            (registry, rest)
        }
        _ => (DOCKER_HUB.to_string(), name),
    }
}

fn validate_repository(repository: &str) -> Result<(), String> {
    if repository.is_empty() {
        return Err("repository is empty".to_string());
    }
    for component in repository.split('/') {
        if component.is_empty() {
            return Err("repository has an empty path component".to_string());
        }
        let valid = component.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
        });
        if !valid {
            return Err(format!(
                "repository component '{}' must be lowercase alphanumerics, '.', '_' or '-'",
                component
            ));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), String> {
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if first_ok && rest_ok && tag.len() <= 128 {
        Ok(())
    } else {
        Err(format!("invalid tag '{}'", tag))
    }
}

fn validate_digest(digest: &str) -> Result<(), String> {
    match digest.split_once(':') {
        Some(("sha256", hex)) if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
            Ok(())
        }
        _ => Err(format!("invalid digest '{}'", digest)),
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = PackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.to_string()
    }
}
