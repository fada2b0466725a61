//! Trusted builders
//!
//! A trusted builder runs every lifecycle phase in one container with access
//! to registry credentials. Entries are either image names (`heroku/builder`,
//! matching any tag, or `heroku/builder:24`, matching that tag only) or
//! prefix patterns ending in `/*` (`paketobuildpacks/*`).

use crate::config::Config;
use crate::error::{PackError, PackResult};
use crate::image::reference::DOCKER_HUB;
use crate::image::ImageRef;
use std::collections::BTreeSet;

/// Builder publishers trusted without configuration
pub const KNOWN_TRUSTED: &[&str] = &["paketobuildpacks/*", "heroku/*", "gcr.io/buildpacks/*"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Pattern {
    /// `registry/repository` prefix, always ending in `/`
    Prefix(String),
    /// Any tag of `registry/repository`
    Repository(String),
    /// Exactly this reference
    Reference(String),
}

impl Pattern {
    fn parse(raw: &str) -> PackResult<Self> {
        let raw = raw.trim();
        if let Some(prefix) = raw.strip_suffix("/*") {
            if prefix.is_empty() || prefix.contains('*') {
                return Err(PackError::invalid(format!("invalid trust pattern '{}'", raw)));
            }
            return Ok(Self::Prefix(format!("{}/", qualify(prefix))));
        }
        let reference = ImageRef::parse(raw)?;
        let last = raw.rsplit('/').next().unwrap_or(raw);
        if last.contains(':') || raw.contains('@') {
            Ok(Self::Reference(reference.to_string()))
        } else {
            Ok(Self::Repository(reference.name()))
        }
    }

    fn matches(&self, builder: &ImageRef) -> bool {
        match self {
            Self::Prefix(prefix) => builder.name().starts_with(prefix),
            Self::Repository(name) => builder.name() == *name,
            Self::Reference(reference) => builder.to_string() == *reference,
        }
    }
}

/// Prefix a Docker Hub namespace with its registry
fn qualify(prefix: &str) -> String {
    let first = prefix.split('/').next().unwrap_or(prefix);
    if first.contains('.') || first.contains(':') || first == "localhost" {
        prefix.to_string()
    } else {
        format!("{}/{}", DOCKER_HUB, prefix)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrustSet {
    patterns: BTreeSet<Pattern>,
}

impl TrustSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known publishers plus the configured `trusted-builders`
    pub fn from_config(config: &Config) -> PackResult<Self> {
        let mut set = Self::new();
        for known in KNOWN_TRUSTED {
            set.insert(known)?;
        }
        for builder in &config.trusted_builders {
            set.insert(&builder.name)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, pattern: &str) -> PackResult<()> {
        self.patterns.insert(Pattern::parse(pattern)?);
        Ok(())
    }

    pub fn is_trusted(&self, builder: &str) -> bool {
        match ImageRef::parse(builder) {
            Ok(reference) => self.patterns.iter().any(|p| p.matches(&reference)),
            Err(_) => false,
        }
    }
}

/// Whether `builder` is one of the default trusted publishers
pub fn is_known_trusted(builder: &str) -> bool {
    let mut set = TrustSet::new();
    for known in KNOWN_TRUSTED {
        if set.insert(known).is_err() {
            return false;
        }
    }
    set.is_trusted(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustedBuilder;

    #[test]
    fn known_publishers_are_trusted() {
        let set = TrustSet::from_config(&Config::default()).unwrap();
        assert!(set.is_trusted("paketobuildpacks/builder-jammy-base"));
        assert!(set.is_trusted("docker.io/paketobuildpacks/builder-jammy-full:0.3"));
        assert!(set.is_trusted("gcr.io/buildpacks/builder:v1"));
        assert!(set.is_trusted("heroku/builder:24"));
        assert!(!set.is_trusted("paketobuildpacks-fake/builder"));
        assert!(!set.is_trusted("example.com/paketobuildpacks/builder"));
        assert!(!set.is_trusted("gcr.io/other/builder"));
        assert!(is_known_trusted("heroku/builder:22"));
    }

    #[test]
    fn configured_names_match_any_tag_unless_tagged() {
        let config = Config {
            trusted_builders: vec![
                TrustedBuilder {
                    name: "example/builder".into(),
                },
                TrustedBuilder {
                    name: "registry.example.com/pinned:1.0".into(),
                },
            ],
            ..Default::default()
        };
        let set = TrustSet::from_config(&config).unwrap();
        assert!(set.is_trusted("example/builder"));
        assert!(set.is_trusted("index.docker.io/example/builder:2"));
        assert!(set.is_trusted("registry.example.com/pinned:1.0"));
        assert!(!set.is_trusted("registry.example.com/pinned:2.0"));
        assert!(!set.is_trusted("example/other"));
    }

    #[test]
    fn bad_patterns_are_rejected() {
        let mut set = TrustSet::new();
        assert!(set.insert("/*").is_err());
        assert!(set.insert("a/*/b/*").is_err());
        assert!(set.insert("").is_err());
    }
}
