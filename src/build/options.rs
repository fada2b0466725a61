//! Options accepted by [`Client::build`](crate::Client::build) and their validation

use crate::cache::{CacheFormat, CacheOptions};
use crate::config::Config;
use crate::error::{PackError, PackResult};
use crate::image::PullPolicy;
use crate::orchestration::Mount;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Paths a user volume may not be mounted over
const RESERVED_TARGETS: &[&str] = &["/cnb", "/layers", "/workspace", "/platform"];

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// App image to produce
    pub image: String,
    /// Source directory or zip; defaults to the working directory
    pub app_path: Option<PathBuf>,
    /// Builder image; falls back to `default-builder-image`
    pub builder: Option<String>,
    pub run_image: Option<String>,
    /// Run image → mirrors; replaces the configured mirrors for that image
    pub additional_mirrors: BTreeMap<String, Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub env_files: Vec<PathBuf>,
    pub buildpacks: Vec<String>,
    pub extensions: Vec<String>,
    pub pre_buildpacks: Vec<String>,
    pub post_buildpacks: Vec<String>,
    pub clear_cache: bool,
    pub cache_image: Option<String>,
    pub cache: CacheOptions,
    pub publish: bool,
    pub docker_host: Option<String>,
    pub trust_builder: bool,
    pub network: Option<String>,
    /// `<host>:<target>[:ro|rw]`
    pub volumes: Vec<String>,
    pub workspace: Option<String>,
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub default_process: Option<String>,
    pub previous_image: Option<String>,
    pub lifecycle_image: Option<String>,
    pub additional_tags: Vec<String>,
    pub sbom_destination_dir: Option<PathBuf>,
    pub report_destination_dir: Option<PathBuf>,
    /// `now` or seconds since the epoch
    pub creation_time: Option<String>,
    pub mac_address: Option<String>,
    pub interactive: bool,
    pub layout: bool,
    pub pull_policy: PullPolicy,
    pub verbose: bool,
}

impl BuildOptions {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Reject invalid combinations before anything touches the runtime
    pub fn validate(&self, config: &Config) -> PackResult<()> {
        if self.image.trim().is_empty() {
            return Err(PackError::invalid("an image name is required"));
        }
        if self.cache_image.is_some() && !self.publish {
            return Err(PackError::invalid("cache-image requires the publish flag"));
        }
        if self.cache.build.format == CacheFormat::Image && !self.publish {
            return Err(PackError::invalid("image cache format requires the publish flag"));
        }
        if self.cache_image.is_some() && self.cache != CacheOptions::default() {
            return Err(PackError::invalid("cache-image cannot be combined with cache"));
        }
        if self.publish && self.pull_policy == PullPolicy::Never {
            return Err(PackError::invalid("publish and pull-policy=never cannot be used together"));
        }
        if self.publish && self.layout {
            return Err(PackError::invalid("publish cannot be used when exporting to an OCI layout"));
        }
        for (name, id) in [("uid", self.uid), ("gid", self.gid)] {
            if let Some(id) = id {
                check_id(name, id)?;
            }
        }
        if let Some(mac) = &self.mac_address {
            parse_mac_address(mac)?;
        }
        if let Some(raw) = &self.creation_time {
            parse_creation_time(raw)?;
        }
        for volume in &self.volumes {
            parse_volume(volume)?;
        }
        if !config.experimental {
            if self.interactive {
                return Err(PackError::invalid("interactive mode is experimental; run `pack config experimental true`"));
            }
            if self.layout {
                return Err(PackError::invalid("exporting to an OCI layout is experimental; run `pack config experimental true`"));
            }
        }
        Ok(())
    }

    /// Cache settings, with `cache_image` taking the build cache
    pub fn cache_options(&self) -> CacheOptions {
        match &self.cache_image {
            Some(image) => CacheOptions::from_cache_image(image),
            None => self.cache.clone(),
        }
    }

    pub fn creation_time(&self) -> PackResult<Option<DateTime<Utc>>> {
        self.creation_time.as_deref().map(parse_creation_time).transpose()
    }

    pub fn mounts(&self) -> PackResult<Vec<Mount>> {
        self.volumes.iter().map(|v| parse_volume(v)).collect()
    }
}

fn check_id(name: &str, id: i64) -> PackResult<u32> {
    if id < 0 || id > i64::from(i32::MAX) {
        return Err(PackError::invalid(format!("{} must be between 0 and {}, got {}", name, i32::MAX, id)));
    }
    u32::try_from(id).map_err(|_| PackError::invalid(format!("{} {} is out of range", name, id)))
}

/// Checked conversion of a `--uid`/`--gid` value
pub fn user_id(name: &str, id: Option<i64>) -> PackResult<Option<u32>> {
    id.map(|id| check_id(name, id)).transpose()
}

/// `now` or a unix timestamp in seconds
pub fn parse_creation_time(raw: &str) -> PackResult<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    let seconds: i64 = raw
        .parse()
        .map_err(|_| PackError::invalid(format!("creation time must be 'now' or a unix timestamp, got '{}'", raw)))?;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| PackError::invalid(format!("creation time {} is out of range", seconds)))
}

/// Six hex octets separated by `:` or `-`
pub fn parse_mac_address(raw: &str) -> PackResult<[u8; 6]> {
    let invalid = || PackError::invalid(format!("invalid MAC address '{}'", raw));
    let separator = if raw.contains('-') { '-' } else { ':' };
    let octets: Vec<&str> = raw.split(separator).collect();
    if octets.len() != 6 {
        return Err(invalid());
    }
    let mut mac = [0u8; 6];
    for (slot, octet) in mac.iter_mut().zip(octets) {
        if octet.len() != 2 {
            return Err(invalid());
        }
        *slot = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
    }
    Ok(mac)
}

/// `<host>:<target>[:ro|rw]`; mounts are read-only unless `rw` is given
pub fn parse_volume(raw: &str) -> PackResult<Mount> {
    let invalid = |reason: &str| PackError::invalid(format!("invalid volume '{}': {}", raw, reason));
    let parts: Vec<&str> = raw.split(':').collect();
    let (source, target, mode) = match parts.as_slice() {
        [source, target] => (*source, *target, "ro"),
        [source, target, mode] => (*source, *target, *mode),
        _ => return Err(invalid("expected <host path>:<target>[:ro|rw]")),
    };
    let read_only = match mode {
        "ro" => true,
        "rw" => false,
        _ => return Err(invalid("mode must be ro or rw")),
    };
    if source.is_empty() || !target.starts_with('/') {
        return Err(invalid("target must be an absolute path"));
    }
    let target = target.trim_end_matches('/');
    if RESERVED_TARGETS
        .iter()
        .any(|r| target == *r || Path::new(target).starts_with(r))
    {
        return Err(invalid(&format!("{} is reserved for the lifecycle", target)));
    }
    Ok(Mount::Bind {
        source: PathBuf::from(source),
        target: target.to_string(),
        read_only,
    })
}
