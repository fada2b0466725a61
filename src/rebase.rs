//! Swap the run image under an app image
//!
//! Rebase never runs buildpacks: the app layers are kept as-is and only the
//! base layers and the run image fields of the lifecycle metadata label
//! change.

use crate::build::run_image::{best_mirror, user_mirrors};
use crate::builder::metadata::RunImageMetadata;
use crate::client::Client;
use crate::error::{PackError, PackResult};
use crate::image::{labels, FetchOptions, ImageRef, PullPolicy};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct RebaseOptions {
    /// The app image to rebase, updated in place
    pub repo_name: String,
    /// Read and write the registry instead of the daemon
    pub publish: bool,
    pub pull_policy: PullPolicy,
    /// Run image to use instead of the one recorded in the app image
    pub run_image: Option<String>,
    /// Mirror overrides keyed by run image
    pub additional_mirrors: BTreeMap<String, Vec<String>>,
}

impl RebaseOptions {
    pub fn new(repo_name: impl Into<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
            ..Default::default()
        }
    }
}

/// What changed during a rebase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebaseReport {
    pub image: ImageRef,
    pub identifier: String,
    pub run_image: String,
    pub top_layer: String,
}

/// The run image recorded in lifecycle metadata; `runImage` wins over the legacy `stack` entry
fn recorded_run_image(metadata: &Value) -> RunImageMetadata {
    let from = |value: &Value| RunImageMetadata {
        image: value["image"].as_str().unwrap_or_default().to_string(),
        mirrors: value["mirrors"]
            .as_array()
            .map(|m| m.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
    };
    let run = from(&metadata["runImage"]);
    if run.image.is_empty() {
        from(&metadata["stack"]["runImage"])
    } else {
        run
    }
}

impl Client {
    pub async fn rebase(&self, opts: RebaseOptions) -> PackResult<RebaseReport> {
        self.interrupt().cancellable("rebase", self.rebase_image(opts)).await
    }

    async fn rebase_image(&self, opts: RebaseOptions) -> PackResult<RebaseReport> {
        let target = ImageRef::parse(&opts.repo_name)?;
        if opts.publish {
            self.keychain().require_for_publish(&target).await?;
        }
        let fetch = if opts.publish {
            FetchOptions::registry()
        } else {
            FetchOptions::daemon(opts.pull_policy)
        };

        let mut app = self.fetcher().fetch(&target.to_string(), &fetch).await?;
        let raw = app.label(labels::LIFECYCLE_METADATA).ok_or_else(|| {
            PackError::invalid(format!(
                "{} has no {} label; only images built by the lifecycle can be rebased",
                target,
                labels::LIFECYCLE_METADATA
            ))
        })?;
        let mut metadata: Value = serde_json::from_str(raw)?;
        let old_top = metadata["runImage"]["topLayer"]
            .as_str()
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PackError::invalid(format!("{} does not record its run image top layer", target)))?;

        let run_image = match opts.run_image.as_deref().filter(|r| !r.is_empty()) {
            Some(explicit) => explicit.to_string(),
            None => {
                let recorded = recorded_run_image(&metadata);
                if recorded.image.is_empty() {
                    return Err(PackError::invalid(format!(
                        "{} does not record a run image; pass --run-image",
                        target
                    )));
                }
                let preferred = user_mirrors(&recorded.image, self.config(), &opts.additional_mirrors);
                best_mirror(&target, &recorded, &preferred)
            }
        };
        debug!("Rebasing {} onto {}", target, run_image);

        let base = self
            .fetcher()
            .fetch(&run_image, &fetch.clone().with_platform(Some(app.platform())))
            .await?;
        let new_top = base
            .top_layer()
            .map(str::to_string)
            .ok_or_else(|| PackError::invalid(format!("run image {} has no layers", run_image)))?;

        app.rebase(&old_top, &base)?;

        metadata["runImage"]["topLayer"] = Value::String(new_top.clone());
        metadata["runImage"]["reference"] = Value::String(base.identifier().unwrap_or_default().to_string());
        app.set_label(labels::LIFECYCLE_METADATA, &serde_json::to_string(&metadata)?)?;
        let identifier = app.save().await?;

        info!("Rebased {} onto {}", target, run_image);
        Ok(RebaseReport {
            image: target,
            identifier,
            run_image,
            top_layer: new_top,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::LayerWriter;
    use crate::client::tests::client;
    use crate::config::Config;
    use crate::image::{Backend, Image};
    use serde_json::json;
    use tempfile::TempDir;

    fn layer(path: &str, contents: &str) -> Vec<u8> {
        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        writer.add_file(path, contents.as_bytes(), 0o644).unwrap();
        writer.finish().unwrap()
    }

    async fn save_run_image(client: &Client, os_release: &str) -> Image {
        let mut run = Image::new(
            ImageRef::parse("example/run:jammy").unwrap(),
            client.fetcher().local_backend(),
            std::sync::Arc::clone(client.fetcher().store()),
            "linux",
            "amd64",
        );
        run.add_layer_reader(layer("/etc/os-release", os_release).as_slice(), None)
            .unwrap();
        run.save().await.unwrap();
        run
    }

    async fn save_app(client: &Client, base: &Image, top_layer: &str) -> Image {
        let backend: Backend = client.fetcher().local_backend();
        let mut app = Image::from_base(ImageRef::parse("local/app:1").unwrap(), backend, base);
        app.add_layer_reader(layer("/workspace/app.js", "console.log(1)").as_slice(), None)
            .unwrap();
        let metadata = json!({
            "app": [{"sha": "sha256:app"}],
            "runImage": {"topLayer": top_layer, "reference": base.identifier()},
            "stack": {"runImage": {"image": "example/run:jammy"}}
        });
        app.set_label(labels::LIFECYCLE_METADATA, &metadata.to_string())
            .unwrap();
        app.save().await.unwrap();
        app
    }

    fn opts() -> RebaseOptions {
        RebaseOptions {
            pull_policy: PullPolicy::Never,
            ..RebaseOptions::new("local/app:1")
        }
    }

    #[tokio::test]
    async fn swaps_base_layers_and_keeps_app_layers() {
        let temp = TempDir::new().unwrap();
        let (client, _) = client(temp.path(), Config::default());

        let old = save_run_image(&client, "VERSION=1").await;
        let old_top = old.top_layer().unwrap().to_string();
        let app = save_app(&client, &old, &old_top).await;
        let app_layer = app.top_layer().unwrap().to_string();
        let new = save_run_image(&client, "VERSION=2").await;
        let new_top = new.top_layer().unwrap().to_string();
        assert_ne!(old_top, new_top);

        let report = client.rebase(opts()).await.unwrap();
        assert_eq!(report.top_layer, new_top);
        assert_eq!(report.run_image, "example/run:jammy");

        let rebased = Image::open_existing(
            ImageRef::parse("local/app:1").unwrap(),
            client.fetcher().local_backend(),
            std::sync::Arc::clone(client.fetcher().store()),
        )
        .await
        .unwrap();
        assert_eq!(rebased.diff_ids(), vec![new_top.clone(), app_layer]);
        let metadata: Value = serde_json::from_str(rebased.label(labels::LIFECYCLE_METADATA).unwrap()).unwrap();
        assert_eq!(metadata["runImage"]["topLayer"], new_top);
        // unrelated fields survive
        assert_eq!(metadata["app"][0]["sha"], "sha256:app");
    }

    #[tokio::test]
    async fn unknown_top_layer_is_a_mismatch() {
        let temp = TempDir::new().unwrap();
        let (client, _) = client(temp.path(), Config::default());
        let old = save_run_image(&client, "VERSION=1").await;
        save_app(&client, &old, "sha256:not-a-layer").await;

        let err = client.rebase(opts()).await.unwrap_err();
        assert!(matches!(err, PackError::RebaseMismatch { .. }));
    }

    #[tokio::test]
    async fn images_without_lifecycle_metadata_are_rejected() {
        let temp = TempDir::new().unwrap();
        let (client, _) = client(temp.path(), Config::default());
        let run = save_run_image(&client, "VERSION=1").await;
        let mut plain = Image::from_base(
            ImageRef::parse("local/app:1").unwrap(),
            client.fetcher().local_backend(),
            &run,
        );
        plain.save().await.unwrap();

        let err = client.rebase(opts()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidOptions);
    }

    #[test]
    fn run_image_prefers_current_field_over_stack() {
        let metadata = json!({
            "runImage": {"image": "new/run", "mirrors": ["gcr.io/new/run"]},
            "stack": {"runImage": {"image": "old/run"}}
        });
        let run = recorded_run_image(&metadata);
        assert_eq!(run.image, "new/run");
        assert_eq!(run.mirrors, ["gcr.io/new/run"]);
        assert_eq!(recorded_run_image(&json!({"stack": {"runImage": {"image": "old/run"}}})).image, "old/run");
    }
}
