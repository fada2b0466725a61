//! `--cache` option parsing
//!
//! Accepts `;`-separated `key=value` fields, for example
//! `type=build;format=volume;name=my-cache`. A `type` field picks which
//! cache the remaining fields apply to (build when absent).

use crate::error::{PackError, PackResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheFormat {
    #[default]
    Volume,
    Image,
    Bind,
}

impl fmt::Display for CacheFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume => write!(f, "volume"),
            Self::Image => write!(f, "image"),
            Self::Bind => write!(f, "bind"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Build,
    Launch,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Launch => "launch",
        }
    }
}

/// One cache's backing: format plus an optional source name or path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheInfo {
    pub format: CacheFormat,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheOptions {
    pub build: CacheInfo,
    pub launch: CacheInfo,
}

impl CacheOptions {
    /// Parse relative to the current working directory
    pub fn parse(value: &str) -> PackResult<Self> {
        let cwd = std::env::current_dir().map_err(|e| PackError::io("reading current directory", e))?;
        Self::parse_in(value, &cwd)
    }

    /// Parse with bind paths resolved against `base`
    pub fn parse_in(value: &str, base: &Path) -> PackResult<Self> {
        let mut opts = Self::default();
        opts.apply(value)?;
        opts.sanitize(base)?;
        Ok(opts)
    }

    /// Build cache from a `--cache-image` reference
    pub fn from_cache_image(image: &str) -> Self {
        Self {
            build: CacheInfo {
                format: CacheFormat::Image,
                source: image.to_string(),
            },
            launch: CacheInfo::default(),
        }
    }

    pub fn get(&self, kind: CacheKind) -> &CacheInfo {
        match kind {
            CacheKind::Build => &self.build,
            CacheKind::Launch => &self.launch,
        }
    }

    fn apply(&mut self, value: &str) -> PackResult<()> {
        let fields = split_fields(value)?;

        let mut kind = CacheKind::Build;
        if let Some((_, v)) = fields.iter().find(|(k, _)| k == "type") {
            kind = match v.to_lowercase().as_str() {
                "build" => CacheKind::Build,
                "launch" => CacheKind::Launch,
                other => return Err(PackError::invalid(format!("invalid cache type '{}'", other))),
            };
        }

        let cache = match kind {
            CacheKind::Build => &mut self.build,
            CacheKind::Launch => &mut self.launch,
        };
        for (key, value) in fields {
            match key.as_str() {
                "format" => {
                    cache.format = match value.to_lowercase().as_str() {
                        "image" => CacheFormat::Image,
                        "volume" => CacheFormat::Volume,
                        "bind" => CacheFormat::Bind,
                        other => {
                            return Err(PackError::invalid(format!("invalid cache format '{}'", other)))
                        }
                    }
                }
                "name" => cache.source = value,
                _ => {}
            }
        }
        Ok(())
    }

    fn sanitize(&mut self, base: &Path) -> PackResult<()> {
        for info in [&self.build, &self.launch] {
            if info.source.is_empty() && matches!(info.format, CacheFormat::Image | CacheFormat::Bind) {
                return Err(PackError::invalid("cache 'name' is required"));
            }
        }
        if self.launch.format == CacheFormat::Image {
            return Err(PackError::invalid("image format is only supported for the build cache"));
        }

        if self.build.format == CacheFormat::Bind {
            self.build.source = bind_path(base, &self.build.source, "build-cache");
        }
        if self.launch.format == CacheFormat::Bind {
            self.launch.source = bind_path(base, &self.launch.source, "launch-cache");
        }
        Ok(())
    }
}

impl FromStr for CacheOptions {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type=build;format={};name={};type=launch;format={};name={};",
            self.build.format, self.build.source, self.launch.format, self.launch.source
        )
    }
}

fn split_fields(value: &str) -> PackResult<Vec<(String, String)>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|field| {
            let (key, value) = field.split_once('=').ok_or_else(|| {
                PackError::invalid(format!("invalid field '{}' must be a key=value pair", field))
            })?;
            Ok((key.trim().to_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn bind_path(base: &Path, source: &str, leaf: &str) -> String {
    let path = PathBuf::from(source);
    let absolute = if path.is_absolute() { path } else { base.join(path) };
    absolute.join(leaf).to_string_lossy().into_owned()
}
