//! `buildpack.toml` / `extension.toml` descriptors and order groups

use crate::error::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Buildpack API assumed when a descriptor does not declare one
pub const ASSUMED_BUILDPACK_API: &str = "0.1";

/// Ids the platform reserves for itself
const RESERVED_IDS: &[&str] = &["app", "config", "sbom"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Buildpack,
    Extension,
}

impl ModuleKind {
    /// Directory modules of this kind live under inside a builder
    pub fn install_root(self) -> &'static str {
        match self {
            Self::Buildpack => "/cnb/buildpacks",
            Self::Extension => "/cnb/extensions",
        }
    }

    pub fn descriptor_file(self) -> &'static str {
        match self {
            Self::Buildpack => "buildpack.toml",
            Self::Extension => "extension.toml",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buildpack => write!(f, "buildpack"),
            Self::Extension => write!(f, "extension"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
}

/// Identity of a buildpack or extension
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl ModuleInfo {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    /// `id@version`, or just `id` when unversioned
    pub fn full_name(&self) -> String {
        if self.version.is_empty() {
            self.id.clone()
        } else {
            format!("{}@{}", self.id, self.version)
        }
    }

    pub fn matches(&self, other: &ModuleInfo) -> bool {
        self.id == other.id && self.version == other.version
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mixins: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distros: Vec<Distribution>,
}

impl Target {
    /// Whether this target accepts `os`/`arch`; empty fields match anything
    pub fn supports(&self, os: &str, arch: &str) -> bool {
        (self.os.is_empty() || self.os == os) && (self.arch.is_empty() || self.arch == arch)
    }
}

/// A reference to a module inside an order group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl ModuleRef {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            optional: false,
        }
    }

    pub fn full_name(&self) -> String {
        ModuleInfo::new(self.id.clone(), self.version.clone()).full_name()
    }
}

impl From<&ModuleInfo> for ModuleRef {
    fn from(info: &ModuleInfo) -> Self {
        Self::new(info.id.clone(), info.version.clone())
    }
}

/// One alternative group of an order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub group: Vec<ModuleRef>,
}

pub type Order = Vec<Group>;

/// A parsed buildpack or extension descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub kind: ModuleKind,
    pub api: String,
    pub info: ModuleInfo,
    pub stacks: Vec<Stack>,
    pub targets: Vec<Target>,
    pub order: Order,
}

#[derive(Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    api: Option<String>,
    #[serde(default)]
    buildpack: Option<ModuleInfo>,
    #[serde(default)]
    extension: Option<ModuleInfo>,
    #[serde(default)]
    stacks: Vec<Stack>,
    #[serde(default)]
    targets: Vec<Target>,
    #[serde(default)]
    order: Order,
}

impl Descriptor {
    /// Parse and validate descriptor TOML; `source` names it in errors
    pub fn parse(kind: ModuleKind, contents: &str, source: &str) -> PackResult<Self> {
        let invalid = |reason: String| PackError::DescriptorInvalid {
            path: source.to_string(),
            reason,
        };

        let raw: RawDescriptor = toml::from_str(contents).map_err(|e| invalid(e.to_string()))?;
        let info = match kind {
            ModuleKind::Buildpack => raw.buildpack,
            ModuleKind::Extension => raw.extension,
        }
        .ok_or_else(|| invalid(format!("missing [{}] table", kind)))?;

        let descriptor = Self {
            kind,
            api: raw
                .api
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| ASSUMED_BUILDPACK_API.to_string()),
            info,
            stacks: raw.stacks,
            targets: raw.targets,
            order: raw.order,
        };
        descriptor.validate().map_err(invalid)?;
        Ok(descriptor)
    }

    /// Read `buildpack.toml` (or `extension.toml`) from a directory
    pub fn read_dir(kind: ModuleKind, dir: &Path) -> PackResult<Self> {
        let path = dir.join(kind.descriptor_file());
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| PackError::io(format!("reading {}", path.display()), e))?;
        Self::parse(kind, &contents, &path.display().to_string())
    }

    fn validate(&self) -> Result<(), String> {
        if self.info.id.is_empty() {
            return Err(format!("{} id is required", self.kind));
        }
        if RESERVED_IDS.contains(&self.info.id.as_str()) {
            return Err(format!("{} id '{}' is reserved", self.kind, self.info.id));
        }
        if self.info.version.is_empty() {
            return Err(format!("{} {} has no version", self.kind, self.info.id));
        }
        if self.kind == ModuleKind::Extension && !self.order.is_empty() {
            return Err(format!("extension {} cannot define an order", self.info.id));
        }
        if !self.order.is_empty() && (!self.stacks.is_empty() || !self.targets.is_empty()) {
            return Err(format!(
                "buildpack {} cannot have both stacks/targets and an order",
                self.info.id
            ));
        }
        Ok(())
    }

    pub fn is_meta(&self) -> bool {
        !self.order.is_empty()
    }

    /// Id with `/` replaced, as used in on-disk paths
    pub fn escaped_id(&self) -> String {
        self.info.id.replace('/', "_")
    }

    /// Where the module is unpacked inside a builder
    pub fn install_dir(&self) -> String {
        format!(
            "{}/{}/{}",
            self.kind.install_root(),
            self.escaped_id(),
            self.info.version
        )
    }

    /// Fail unless this module supports `stack_id` with the given mixins
    ///
    /// Meta buildpacks and target-based buildpacks (no stacks) always pass.
    pub fn ensure_stack_support(&self, stack_id: &str, provided_mixins: &[String]) -> PackResult<()> {
        if self.stacks.is_empty() {
            return Ok(());
        }
        let stack = self
            .stacks
            .iter()
            .find(|s| s.id == stack_id || s.id == "*")
            .ok_or_else(|| {
                PackError::invalid(format!(
                    "{} {} does not support stack {}",
                    self.kind,
                    self.info.full_name(),
                    stack_id
                ))
            })?;

        let mut missing: Vec<&str> = stack
            .mixins
            .iter()
            .filter(|m| {
                let bare = m
                    .strip_prefix("build:")
                    .or_else(|| m.strip_prefix("run:"))
                    .unwrap_or(m);
                !provided_mixins.iter().any(|p| p == *m || p == bare)
            })
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort_unstable();
        Err(PackError::invalid(format!(
            "{} {} requires missing mixin(s): {}",
            self.kind,
            self.info.full_name(),
            missing.join(", ")
        )))
    }

    /// Fail unless one of the declared targets accepts `os`/`arch`
    pub fn ensure_target_support(&self, os: &str, arch: &str) -> PackResult<()> {
        if self.targets.is_empty() || self.targets.iter().any(|t| t.supports(os, arch)) {
            return Ok(());
        }
        Err(PackError::invalid(format!(
            "{} {} does not support target {}/{}",
            self.kind,
            self.info.full_name(),
            os,
            arch
        )))
    }
}
