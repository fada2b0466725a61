//! `inspect-image`: decode the labels the lifecycle writes on app images

use crate::build::run_image::user_mirrors;
use crate::builder::RunImageInfo;
use crate::client::Client;
use crate::error::{PackError, PackResult};
use crate::image::{labels, FetchOptions, Image, PullPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entrypoint prefix of process-specific launchers
const PROCESS_ENTRYPOINT_DIR: &str = "/cnb/process/";
const ENV_PROCESS_TYPE: &str = "CNB_PROCESS_TYPE";

/// `command` is a string on older platform APIs and a list on newer ones
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum CommandValue {
    One(String),
    Many(Vec<String>),
}

impl Default for CommandValue {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl From<CommandValue> for Vec<String> {
    fn from(value: CommandValue) -> Self {
        match value {
            CommandValue::One(cmd) if cmd.is_empty() => Vec::new(),
            CommandValue::One(cmd) => vec![cmd],
            CommandValue::Many(cmd) => cmd,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProcess {
    #[serde(rename = "type")]
    process_type: String,
    command: CommandValue,
    args: Vec<String>,
    direct: Option<bool>,
    #[serde(rename = "working-dir")]
    working_dir: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawModule {
    id: String,
    version: String,
    homepage: String,
}

/// `io.buildpacks.build.metadata`, the parts shown to users
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BuildMetadata {
    processes: Vec<RawProcess>,
    buildpacks: Vec<RawModule>,
    extensions: Vec<RawModule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub homepage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    #[serde(rename = "type")]
    pub process_type: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    /// Run without a shell
    pub direct: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    pub default: bool,
}

/// Base (run) image an app image was exported on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BaseImageInfo {
    pub top_layer: String,
    pub reference: String,
}

/// Where the app source came from, per the project metadata label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub source_type: String,
    pub repository: String,
    pub commit: String,
}

/// An app image, ready for display
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    pub name: String,
    pub identifier: String,
    pub stack_id: String,
    pub base: BaseImageInfo,
    pub run_images: Vec<RunImageInfo>,
    pub buildpacks: Vec<ModuleSummary>,
    pub extensions: Vec<ModuleSummary>,
    pub processes: Vec<ProcessInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
}

/// The process the launcher runs when none is named
fn default_process(image: &Image) -> Option<String> {
    if let Some(kind) = image
        .entrypoint()
        .and_then(|e| e.first())
        .and_then(|e| e.strip_prefix(PROCESS_ENTRYPOINT_DIR))
    {
        return Some(kind.to_string());
    }
    image
        .env(ENV_PROCESS_TYPE)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn summaries(modules: Vec<RawModule>) -> Vec<ModuleSummary> {
    modules
        .into_iter()
        .map(|m| ModuleSummary {
            id: m.id,
            version: m.version,
            homepage: m.homepage,
        })
        .collect()
}

fn source_info(image: &Image) -> Option<SourceInfo> {
    let raw = image.label(labels::PROJECT_METADATA)?;
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let source = value.get("source")?;
    let text = |v: &serde_json::Value| v.as_str().unwrap_or_default().to_string();
    Some(SourceInfo {
        source_type: text(&source["type"]),
        repository: text(&source["metadata"]["repository"]),
        commit: text(&source["version"]["commit"]),
    })
}

impl Client {
    /// Decode the app image `name`; `None` when it does not exist there
    pub async fn inspect_image(&self, name: &str, daemon: bool) -> PackResult<Option<ImageInfo>> {
        self.interrupt()
            .cancellable("inspect", self.decode_image(name, daemon))
            .await
    }

    async fn decode_image(&self, name: &str, daemon: bool) -> PackResult<Option<ImageInfo>> {
        let fetch = if daemon {
            FetchOptions::daemon(PullPolicy::Never)
        } else {
            FetchOptions::registry()
        };
        let image = match self.fetcher().fetch(name, &fetch).await {
            Ok(image) => image,
            Err(PackError::ImageNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let lifecycle: serde_json::Value = match image.label(labels::LIFECYCLE_METADATA) {
            Some(raw) => serde_json::from_str(raw)?,
            None => {
                return Err(PackError::invalid(format!(
                    "{} was not built by the lifecycle: missing label {}",
                    name,
                    labels::LIFECYCLE_METADATA
                )))
            }
        };
        let build: BuildMetadata = match image.label(labels::BUILD_METADATA) {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)?,
            _ => BuildMetadata::default(),
        };

        let text = |v: &serde_json::Value| v.as_str().unwrap_or_default().to_string();
        let base = BaseImageInfo {
            top_layer: text(&lifecycle["runImage"]["topLayer"]),
            reference: text(&lifecycle["runImage"]["reference"]),
        };

        let mut run_images = Vec::new();
        let stack_run = &lifecycle["stack"]["runImage"];
        let run_image = match text(&lifecycle["runImage"]["image"]) {
            image if image.is_empty() => text(&stack_run["image"]),
            image => image,
        };
        if !run_image.is_empty() {
            run_images.extend(
                user_mirrors(&run_image, self.config(), &BTreeMap::new())
                    .into_iter()
                    .map(|name| RunImageInfo {
                        name,
                        user_configured: true,
                    }),
            );
            run_images.push(RunImageInfo {
                name: run_image,
                user_configured: false,
            });
            let mirrors = lifecycle["runImage"]["mirrors"]
                .as_array()
                .or_else(|| stack_run["mirrors"].as_array());
            run_images.extend(mirrors.into_iter().flatten().filter_map(|m| m.as_str()).map(|m| RunImageInfo {
                name: m.to_string(),
                user_configured: false,
            }));
        }

        let default = default_process(&image);
        let processes = build
            .processes
            .into_iter()
            .map(|p| ProcessInfo {
                default: default.as_deref() == Some(p.process_type.as_str()),
                direct: p.direct.unwrap_or(true),
                command: p.command.into(),
                process_type: p.process_type,
                args: p.args,
                working_dir: p.working_dir,
            })
            .collect();

        Ok(Some(ImageInfo {
            name: name.to_string(),
            identifier: image.identifier().unwrap_or_default().to_string(),
            stack_id: image.label(labels::STACK_ID).unwrap_or_default().to_string(),
            base,
            run_images,
            buildpacks: summaries(build.buildpacks),
            extensions: summaries(build.extensions),
            processes,
            source: source_info(&image),
        }))
    }
}
