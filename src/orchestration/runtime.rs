//! Container runtime abstraction
//!
//! Provides a trait for the daemon operations pack needs: image storage,
//! named volumes and phase containers. Implemented by the docker/podman
//! CLI backend and by an in-memory fake in tests.

use crate::error::PackResult;
use crate::orchestration::container::{ContainerSpec, ImageInspect, VolumeInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Abstract container runtime interface
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime is available on this system
    async fn is_available(&self) -> PackResult<bool>;

    /// Operating system of the daemon (`linux` or `windows`)
    async fn daemon_os(&self) -> PackResult<String>;

    /// Host path of the daemon socket, bind-mounted into exporters
    fn daemon_socket(&self) -> String;

    // Images

    /// Inspect a local image; `None` when it does not exist
    async fn image_inspect(&self, image: &str) -> PackResult<Option<ImageInspect>>;

    /// Pull an image, optionally for a specific `os/arch` platform
    async fn image_pull(&self, image: &str, platform: Option<&str>) -> PackResult<()>;

    async fn image_push(&self, image: &str) -> PackResult<()>;

    async fn image_tag(&self, source: &str, target: &str) -> PackResult<()>;

    /// Remove an image; missing images are not an error
    async fn image_remove(&self, image: &str) -> PackResult<()>;

    /// Export an image as a docker-archive tarball
    async fn image_save(&self, image: &str, dest: &Path) -> PackResult<()>;

    /// Import a docker-archive tarball
    async fn image_load(&self, archive: &Path) -> PackResult<()>;

    // Volumes

    async fn volume_create(&self, name: &str, labels: &HashMap<String, String>) -> PackResult<()>;

    async fn volume_exists(&self, name: &str) -> PackResult<bool>;

    /// Remove a volume; missing volumes are not an error
    async fn volume_remove(&self, name: &str) -> PackResult<()>;

    /// List volumes whose name starts with `prefix`
    async fn volume_list(&self, prefix: &str) -> PackResult<Vec<VolumeInfo>>;

    // Containers

    /// Create (but do not start) a container and return its ID
    async fn container_create(&self, spec: &ContainerSpec) -> PackResult<String>;

    /// Unpack a tar archive into the container filesystem at `/`
    async fn copy_to_container(&self, container_id: &str, archive: &Path) -> PackResult<()>;

    /// Copy `path` out of the container as a tar archive written to `dest`
    async fn copy_from_container(&self, container_id: &str, path: &str, dest: &Path) -> PackResult<()>;

    /// Start a container attached, stream each output line, and return its exit code
    async fn start_wait(
        &self,
        container_id: &str,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> PackResult<i64>;

    /// Stop a container, killing it once `grace` expires
    async fn stop(&self, container_id: &str, grace: Duration) -> PackResult<()>;

    /// Kill a container immediately
    async fn kill(&self, container_id: &str) -> PackResult<()>;

    /// Remove a container; missing containers are not an error
    async fn container_remove(&self, container_id: &str) -> PackResult<()>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
