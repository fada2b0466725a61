//! Classification of `--buildpack` / `uri` locator strings

use crate::buildpack::descriptor::ModuleInfo;
use crate::error::{PackError, PackResult};
use std::path::{Path, PathBuf};

pub const FROM_BUILDER: &str = "from=builder";
const FROM_BUILDER_PREFIX: &str = "urn:cnb:builder:";
const DEPRECATED_FROM_BUILDER_PREFIX: &str = "from=builder:";
const REGISTRY_PREFIX: &str = "urn:cnb:registry:";
const DOCKER_PREFIX: &str = "docker://";

/// What a locator points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Every buildpack already in the builder's order
    FromBuilder,
    /// A module already present in the builder
    Builder { id: String, version: String },
    /// A directory or archive on disk
    Path(PathBuf),
    /// An `http(s)://` or `file://` URI
    Uri(String),
    /// A packaged buildpack image
    Package(String),
    /// A registry index entry
    Registry {
        namespace: String,
        name: String,
        version: Option<String>,
    },
}

impl Locator {
    /// Classify `locator`; relative paths are resolved against `base_dir`
    pub fn classify(locator: &str, builder_modules: &[ModuleInfo], base_dir: &Path) -> PackResult<Self> {
        let locator = locator.trim();
        let invalid = |reason: &str| PackError::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };
        if locator.is_empty() {
            return Err(invalid("locator is empty"));
        }

        if locator == FROM_BUILDER {
            return Ok(Self::FromBuilder);
        }

        if let Some(rest) = locator
            .strip_prefix(FROM_BUILDER_PREFIX)
            .or_else(|| locator.strip_prefix(DEPRECATED_FROM_BUILDER_PREFIX))
        {
            let (id, version) = split_id_version(rest);
            return match find_in_builder(builder_modules, id, version) {
                Some(found) => Ok(Self::Builder {
                    id: found.id.clone(),
                    version: found.version.clone(),
                }),
                None => Err(invalid("not found in builder")),
            };
        }

        if let Some(rest) = locator.strip_prefix(REGISTRY_PREFIX) {
            return parse_registry(rest).ok_or_else(|| invalid("expected <namespace>/<name>[@<version>]"));
        }

        if let Some(rest) = locator.strip_prefix(DOCKER_PREFIX) {
            return Ok(Self::Package(rest.trim_start_matches('/').to_string()));
        }

        if locator.starts_with("http://") || locator.starts_with("https://") || locator.starts_with("file://") {
            return Ok(Self::Uri(locator.to_string()));
        }

        let path = base_dir.join(locator);
        if path.exists() {
            return Ok(Self::Path(path));
        }

        let (id, version) = split_id_version(locator);
        if let Some(found) = find_in_builder(builder_modules, id, version) {
            return Ok(Self::Builder {
                id: found.id.clone(),
                version: found.version.clone(),
            });
        }

        if looks_like_image(locator) {
            return Ok(Self::Package(locator.to_string()));
        }

        if let Some(registry) = parse_registry(locator) {
            return Ok(registry);
        }
        if locator.contains('/') && locator.contains('@') {
            return Err(invalid("registry versions must be valid semver"));
        }

        Err(invalid("not a path, URI, image, registry id or builder buildpack"))
    }
}

fn split_id_version(s: &str) -> (&str, &str) {
    s.split_once('@').unwrap_or((s, ""))
}

/// Highest version of `id` in the builder, or exactly `version` when given
fn find_in_builder<'a>(modules: &'a [ModuleInfo], id: &str, version: &str) -> Option<&'a ModuleInfo> {
    let mut candidates = modules
        .iter()
        .filter(|m| m.id == id && (version.is_empty() || m.version == version))
        .collect::<Vec<_>>();
    candidates.sort_by(|a, b| compare_versions(&a.version, &b.version));
    candidates.pop()
}

/// Semver order where both parse, lexical otherwise
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Whether `locator` can only reasonably be an image reference
///
/// A tag, a digest, or a first component that looks like a registry host
/// (contains `.` or `:`, or is `localhost`) qualifies.
fn looks_like_image(locator: &str) -> bool {
    if locator.contains("@sha256:") {
        return true;
    }
    let last = locator.rsplit('/').next().unwrap_or(locator);
    if last.contains(':') {
        return true;
    }
    match locator.split_once('/') {
        Some((host, _)) => host.contains('.') || host.contains(':') || host == "localhost",
        None => false,
    }
}

fn is_registry_component(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.' || c == '_')
}

fn parse_registry(s: &str) -> Option<Locator> {
    let (id, version) = match s.split_once('@') {
        Some((id, version)) => (id, Some(version)),
        None => (s, None),
    };
    let (namespace, name) = id.split_once('/')?;
    if !is_registry_component(namespace) || !is_registry_component(name) {
        return None;
    }
    if let Some(version) = version {
        semver::Version::parse(version).ok()?;
    }
    Some(Locator::Registry {
        namespace: namespace.to_string(),
        name: name.to_string(),
        version: version.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn builder() -> Vec<ModuleInfo> {
        vec![
            ModuleInfo::new("paketo-buildpacks/node-engine", "1.2.0"),
            ModuleInfo::new("paketo-buildpacks/node-engine", "1.10.0"),
            ModuleInfo::new("heroku/java", "0.3.0"),
        ]
    }

    fn classify(s: &str) -> PackResult<Locator> {
        Locator::classify(s, &builder(), Path::new("/nonexistent-base"))
    }

    #[test]
    fn builder_references() {
        assert_eq!(classify("from=builder").unwrap(), Locator::FromBuilder);
        assert_eq!(
            classify("urn:cnb:builder:paketo-buildpacks/node-engine").unwrap(),
            Locator::Builder {
                id: "paketo-buildpacks/node-engine".into(),
                version: "1.10.0".into()
            }
        );
        assert_eq!(
            classify("heroku/java@0.3.0").unwrap(),
            Locator::Builder {
                id: "heroku/java".into(),
                version: "0.3.0".into()
            }
        );
        assert!(matches!(
            classify("urn:cnb:builder:missing/bp"),
            Err(PackError::InvalidLocator { .. })
        ));
    }

    #[test]
    fn paths_and_uris() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("my-bp")).unwrap();
        assert_eq!(
            Locator::classify("my-bp", &[], dir.path()).unwrap(),
            Locator::Path(dir.path().join("my-bp"))
        );
        assert_eq!(
            classify("https://example.com/bp.tgz").unwrap(),
            Locator::Uri("https://example.com/bp.tgz".into())
        );
    }

    #[test]
    fn package_images() {
        assert_eq!(
            classify("docker://gcr.io/paketo/node").unwrap(),
            Locator::Package("gcr.io/paketo/node".into())
        );
        assert_eq!(
            classify("paketobuildpacks/nodejs:latest").unwrap(),
            Locator::Package("paketobuildpacks/nodejs:latest".into())
        );
        assert_eq!(
            classify("localhost:5000/bp").unwrap(),
            Locator::Package("localhost:5000/bp".into())
        );
        assert!(matches!(
            classify("cnbs/sample@sha256:abcd").unwrap(),
            Locator::Package(_)
        ));
    }

    #[test]
    fn registry_ids() {
        assert_eq!(
            classify("urn:cnb:registry:example/java@1.0.0").unwrap(),
            Locator::Registry {
                namespace: "example".into(),
                name: "java".into(),
                version: Some("1.0.0".into())
            }
        );
        assert_eq!(
            classify("example/java").unwrap(),
            Locator::Registry {
                namespace: "example".into(),
                name: "java".into(),
                version: None
            }
        );
        assert!(classify("example/java@latest-ish").is_err());
        assert!(classify("not a locator").is_err());
    }

    #[test]
    fn version_comparison() {
        use std::cmp::Ordering;
        assert_eq!(compare_versions("1.10.0", "1.2.0"), Ordering::Greater);
        assert_eq!(compare_versions("b", "a"), Ordering::Greater);
    }
}
