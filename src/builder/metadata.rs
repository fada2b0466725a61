//! Builder image labels and a read view over an existing builder

use crate::buildpack::blob::BuildModule;
use crate::buildpack::descriptor::{ModuleInfo, ModuleKind, Order};
use crate::buildpack::package::ModuleLayers;
use crate::error::{PackError, PackResult};
use crate::image::{labels, Image};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Label holding the extension order of a builder
pub const EXTENSION_ORDER_LABEL: &str = "io.buildpacks.extension.order";

pub const ENV_UID: &str = "CNB_USER_ID";
pub const ENV_GID: &str = "CNB_GROUP_ID";

/// Written into `createdBy`
pub const CREATOR_NAME: &str = "Pack CLI";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSet {
    #[serde(default)]
    pub deprecated: Vec<String>,
    #[serde(default)]
    pub supported: Vec<String>,
}

impl ApiSet {
    pub fn all(&self) -> Vec<String> {
        self.deprecated.iter().chain(&self.supported).cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleApis {
    #[serde(default)]
    pub buildpack: ApiSet,
    #[serde(default)]
    pub platform: ApiSet,
}

/// Pre-`apis` lifecycles advertise one version per API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyApi {
    #[serde(default)]
    pub buildpack: String,
    #[serde(default)]
    pub platform: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<LegacyApi>,
    #[serde(default)]
    pub apis: LifecycleApis,
}

impl LifecycleMetadata {
    /// Platform APIs the lifecycle understands, deprecated ones included
    pub fn platform_apis(&self) -> Vec<String> {
        let all = self.apis.platform.all();
        if !all.is_empty() {
            return all;
        }
        self.api
            .as_ref()
            .filter(|a| !a.platform.is_empty())
            .map(|a| vec![a.platform.clone()])
            .unwrap_or_default()
    }

    pub fn buildpack_apis(&self) -> Vec<String> {
        let all = self.apis.buildpack.all();
        if !all.is_empty() {
            return all;
        }
        self.api
            .as_ref()
            .filter(|a| !a.buildpack.is_empty())
            .map(|a| vec![a.buildpack.clone()])
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunImageMetadata {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackMetadata {
    #[serde(default)]
    pub run_image: RunImageMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// `io.buildpacks.builder.metadata`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub buildpacks: Vec<ModuleInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ModuleInfo>,
    #[serde(default)]
    pub stack: StackMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<RunImageMetadata>,
    #[serde(default)]
    pub lifecycle: LifecycleMetadata,
    #[serde(default)]
    pub created_by: CreatorMetadata,
}

impl BuilderMetadata {
    /// Run images in preference order; `images` wins over the legacy stack entry
    pub fn run_images(&self) -> Vec<RunImageMetadata> {
        if !self.images.is_empty() {
            return self.images.clone();
        }
        if self.stack.run_image.image.is_empty() {
            Vec::new()
        } else {
            vec![self.stack.run_image.clone()]
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct StackToml<'a> {
    run_image: &'a RunImageMetadata,
}

#[derive(Serialize)]
struct RunToml<'a> {
    images: &'a [RunImageMetadata],
}

/// `stack.toml` contents naming the preferred run image
pub fn stack_toml(run_images: &[RunImageMetadata]) -> PackResult<String> {
    let first = run_images.first().cloned().unwrap_or_default();
    Ok(toml::to_string(&StackToml { run_image: &first })?)
}

/// `run.toml` contents listing every run image
pub fn run_toml(run_images: &[RunImageMetadata]) -> PackResult<String> {
    Ok(toml::to_string(&RunToml { images: run_images })?)
}

/// Decode a JSON label, treating an absent or blank label as the default
pub(crate) fn json_label<T: DeserializeOwned + Default>(image: &Image, key: &str) -> PackResult<T> {
    match image.label(key) {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw).map_err(|e| {
            PackError::BuilderInconsistent(format!("label {} on {} is malformed: {}", key, image.name(), e))
        }),
        _ => Ok(T::default()),
    }
}

fn id_from_env(image: &Image, key: &str) -> PackResult<u32> {
    let raw = image.env(key).ok_or_else(|| {
        PackError::BuilderInconsistent(format!("image {} is missing required env var {}", image.name(), key))
    })?;
    raw.trim().parse().map_err(|_| {
        PackError::BuilderInconsistent(format!("{} on {} must be an integer, got '{}'", key, image.name(), raw))
    })
}

/// A builder image with its labels decoded
pub struct Builder {
    image: Image,
    metadata: BuilderMetadata,
    order: Order,
    order_extensions: Order,
    buildpack_layers: ModuleLayers,
    extension_layers: ModuleLayers,
    stack_id: String,
    mixins: Vec<String>,
    uid: u32,
    gid: u32,
}

impl Builder {
    pub fn from_image(image: Image) -> PackResult<Self> {
        if image.label(labels::BUILDER_METADATA).is_none() {
            return Err(PackError::invalid(format!(
                "{} is not a builder: missing label {}",
                image.name(),
                labels::BUILDER_METADATA
            )));
        }
        let metadata: BuilderMetadata = json_label(&image, labels::BUILDER_METADATA)?;
        let order: Order = json_label(&image, labels::BUILDER_ORDER)?;
        let order_extensions: Order = json_label(&image, EXTENSION_ORDER_LABEL)?;
        let mixins: Vec<String> = json_label(&image, labels::STACK_MIXINS)?;
        let buildpack_layers = ModuleLayers::from_image(&image, ModuleKind::Buildpack)?;
        let extension_layers = ModuleLayers::from_image(&image, ModuleKind::Extension)?;
        let uid = id_from_env(&image, ENV_UID)?;
        let gid = id_from_env(&image, ENV_GID)?;
        let stack_id = image.label(labels::STACK_ID).unwrap_or_default().to_string();

        Ok(Self {
            image,
            metadata,
            order,
            order_extensions,
            buildpack_layers,
            extension_layers,
            stack_id,
            mixins,
            uid,
            gid,
        })
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn into_image(self) -> Image {
        self.image
    }

    pub fn name(&self) -> String {
        self.image.name().to_string()
    }

    pub fn metadata(&self) -> &BuilderMetadata {
        &self.metadata
    }

    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    pub fn lifecycle(&self) -> &LifecycleMetadata {
        &self.metadata.lifecycle
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn order_extensions(&self) -> &Order {
        &self.order_extensions
    }

    pub fn layers(&self, kind: ModuleKind) -> &ModuleLayers {
        match kind {
            ModuleKind::Buildpack => &self.buildpack_layers,
            ModuleKind::Extension => &self.extension_layers,
        }
    }

    /// Every module in the builder, backed by the builder's own layers
    pub fn modules(&self, kind: ModuleKind) -> Vec<BuildModule> {
        self.layers(kind)
            .descriptors(kind)
            .into_iter()
            .map(|(descriptor, diff_id)| BuildModule::from_layer(descriptor, diff_id))
            .collect()
    }

    pub fn stack_id(&self) -> &str {
        &self.stack_id
    }

    pub fn mixins(&self) -> &[String] {
        &self.mixins
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn run_images(&self) -> Vec<RunImageMetadata> {
        self.metadata.run_images()
    }

    /// Preferred run image name, if the builder declares one
    pub fn run_image(&self) -> Option<String> {
        self.run_images().into_iter().next().map(|r| r.image)
    }

    pub fn os(&self) -> &str {
        self.image.os()
    }

    pub fn architecture(&self) -> &str {
        self.image.architecture()
    }
}
