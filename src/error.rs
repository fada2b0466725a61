//! Error types for pack
//!
//! All modules use `PackResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pack operations
pub type PackResult<T> = Result<T, PackError>;

/// Coarse classification used by callers that branch on failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidOptions,
    ImageNotFound,
    AuthRequired,
    NoMatchingGroup,
    PhaseFailed,
    Cancelled,
    RebaseMismatch,
    BuilderInconsistent,
    Io,
    BlobCorrupt,
    Other,
}

/// All errors that can occur in pack
#[derive(Error, Debug)]
pub enum PackError {
    // Option errors
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    // Image errors
    #[error("image '{0}' not found")]
    ImageNotFound(String),

    #[error("image '{0}' was already saved; reopen it before mutating")]
    AlreadySaved(String),

    #[error("rebase base mismatch: expected top layer {expected}, found {actual}")]
    RebaseMismatch { expected: String, actual: String },

    #[error("blob {expected} is corrupt: content hashes to {actual}")]
    BlobCorrupt { expected: String, actual: String },

    #[error("layer {0} not found in blob store")]
    LayerNotFound(String),

    #[error("registry operation on {reference} failed: {reason}")]
    Registry { reference: String, reason: String },

    #[error("{0} is not supported")]
    Unsupported(String),

    // Credential errors
    #[error("credentials required for registry {registry}")]
    AuthRequired { registry: String },

    #[error("credential helper {helper} failed: {reason}")]
    CredentialHelper { helper: String, reason: String },

    // Buildpack errors
    #[error("invalid descriptor {path}: {reason}")]
    DescriptorInvalid { path: String, reason: String },

    #[error("buildpack '{0}' not found")]
    BuildpackNotFound(String),

    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("buildpack order contains a cycle: {0}")]
    Cycle(String),

    #[error("builder is inconsistent: {0}")]
    BuilderInconsistent(String),

    #[error("registry index lookup for {id} failed: {reason}")]
    RegistryIndex { id: String, reason: String },

    // Lifecycle errors
    #[error("no buildpack group passed detection (exit code {code})")]
    NoMatchingGroup { code: i64 },

    #[error("{phase} failed with exit code {code}")]
    PhaseFailed {
        phase: String,
        code: i64,
        output: String,
    },

    #[error("build cancelled during {phase}")]
    Cancelled { phase: String },

    #[error("a build for {0} is already in progress")]
    BuildInProgress(String),

    // Archive errors
    #[error("symlink chain too deep at {0}")]
    SymlinkLoop(PathBuf),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Container runtime errors
    #[error("No container runtime found. Install docker or podman")]
    RuntimeNotFound,

    #[error("Container create failed: {0}")]
    ContainerCreate(String),

    #[error("Image pull failed: {image}: {reason}")]
    ImagePull { image: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML edit error: {0}")]
    TomlEdit(#[from] toml_edit::TomlError),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Guidance for the user; the CLI prints it and exits successfully
    #[error("{0}")]
    Soft(String),
}

impl PackError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create an invalid options error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOptions(reason.into())
    }

    /// Create a registry error
    pub fn registry(reference: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Registry {
            reference: reference.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOptions(_) | Self::InvalidReference { .. } | Self::InvalidLocator { .. } => {
                ErrorKind::InvalidOptions
            }
            Self::ImageNotFound(_) => ErrorKind::ImageNotFound,
            Self::AuthRequired { .. } => ErrorKind::AuthRequired,
            Self::NoMatchingGroup { .. } => ErrorKind::NoMatchingGroup,
            Self::PhaseFailed { .. } => ErrorKind::PhaseFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::RebaseMismatch { .. } => ErrorKind::RebaseMismatch,
            Self::BuilderInconsistent(_) | Self::Cycle(_) => ErrorKind::BuilderInconsistent,
            Self::Io { .. } | Self::PathNotFound(_) | Self::SymlinkLoop(_) => ErrorKind::Io,
            Self::BlobCorrupt { .. } => ErrorKind::BlobCorrupt,
            _ => ErrorKind::Other,
        }
    }

    /// Process exit code for the CLI
    ///
    /// Lifecycle exit codes pass through unchanged; invalid arguments use 2.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Soft(_) => 0,
            Self::PhaseFailed { code, .. } | Self::NoMatchingGroup { code } => {
                u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1)
            }
            _ if self.kind() == ErrorKind::InvalidOptions => 2,
            _ => 1,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BuildInProgress(_) | Self::Download { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::AuthRequired { registry } => Some(format!(
                "Run: docker login {}",
                registry.trim_start_matches("https://")
            )),
            Self::NoMatchingGroup { .. } => {
                Some("Check that the builder supports your app, or pass --buildpack".to_string())
            }
            Self::RuntimeNotFound => Some("Install docker or podman, or set DOCKER_HOST".to_string()),
            Self::BuildInProgress(_) => Some("Wait for the running build to finish".to_string()),
            Self::RebaseMismatch { .. } => {
                Some("The app image was not built on the expected run image".to_string())
            }
            Self::BuilderInconsistent(_) => {
                Some("Recreate the builder with `pack builder create`".to_string())
            }
            _ => None,
        }
    }
}
