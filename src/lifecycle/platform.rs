//! Platform API versions and negotiation with a builder's lifecycle

use crate::error::{PackError, PackResult};
use std::fmt;
use std::str::FromStr;

/// Platform APIs this tool can drive, oldest first
pub const SUPPORTED_PLATFORM_APIS: &[&str] = &[
    "0.3", "0.4", "0.5", "0.6", "0.7", "0.8", "0.9", "0.10", "0.11", "0.12", "0.13",
];

/// A `major.minor` API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    major: u32,
    minor: u32,
}

impl ApiVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        *self >= Self::new(major, minor)
    }

    pub fn less_than(&self, major: u32, minor: u32) -> bool {
        *self < Self::new(major, minor)
    }
}

impl FromStr for ApiVersion {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().trim_start_matches('v');
        let invalid = || PackError::invalid(format!("invalid API version '{}'", s));
        let (major, minor) = match raw.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (raw, "0"),
        };
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn parse_all(apis: &[String]) -> PackResult<Vec<ApiVersion>> {
    apis.iter().map(|a| a.parse()).collect()
}

/// Highest platform API supported by this tool and the builder's lifecycle
///
/// When a custom lifecycle image is used, its APIs (`lifecycle_image_apis`)
/// are intersected with the builder's first.
pub fn negotiate(builder_apis: &[String], lifecycle_image_apis: &[String]) -> PackResult<ApiVersion> {
    let mut candidates = parse_all(builder_apis)?;
    if !lifecycle_image_apis.is_empty() {
        let image_apis = parse_all(lifecycle_image_apis)?;
        candidates.retain(|api| image_apis.contains(api));
    }

    SUPPORTED_PLATFORM_APIS
        .iter()
        .rev()
        .filter_map(|s| s.parse::<ApiVersion>().ok())
        .find(|supported| candidates.contains(supported))
        .ok_or_else(|| {
            PackError::invalid(format!(
                "unable to find a supported Platform API version: lifecycle supports [{}], pack supports [{}]",
                builder_apis.join(", "),
                SUPPORTED_PLATFORM_APIS.join(", ")
            ))
        })
}
