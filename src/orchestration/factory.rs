//! Runtime factory for creating the container runtime
//!
//! Picks docker or podman (in that order, unless `PACK_CONTAINER_RUNTIME`
//! names one) and resolves the daemon socket that exporters bind-mount.

use crate::error::{PackError, PackResult};
use crate::orchestration::cli_runtime::{CliRuntime, RuntimeKind};
use crate::orchestration::runtime::ContainerRuntime;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

async fn installed(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Create a container runtime, honouring an explicit daemon host
///
/// # Arguments
/// * `docker_host` - Value of `--docker-host`, or `None` for the environment default
pub async fn create_runtime(docker_host: Option<&str>) -> PackResult<Arc<dyn ContainerRuntime>> {
    let preferred = std::env::var("PACK_CONTAINER_RUNTIME").ok();
    let candidates = match preferred.as_deref() {
        Some("podman") => vec![RuntimeKind::Podman],
        Some("docker") => vec![RuntimeKind::Docker],
        _ => vec![RuntimeKind::Docker, RuntimeKind::Podman],
    };

    for kind in candidates {
        if installed(kind.binary()).await {
            let host = docker_host
                .map(str::to_string)
                .or_else(|| std::env::var("DOCKER_HOST").ok());
            let socket = default_socket(kind, host.as_deref());
            debug!("Using {} runtime (socket {})", kind.binary(), socket);
            return Ok(Arc::new(CliRuntime::new(kind, host, socket)));
        }
    }

    Err(PackError::RuntimeNotFound)
}

/// Socket path for the daemon that export-to-daemon phases talk to
pub fn default_socket(kind: RuntimeKind, host: Option<&str>) -> String {
    if let Some(path) = host.and_then(|h| h.strip_prefix("unix://")) {
        return path.to_string();
    }
    match kind {
        RuntimeKind::Docker => DOCKER_SOCKET.to_string(),
        RuntimeKind::Podman => {
            // SAFETY: geteuid has no preconditions and cannot fail
            let uid = unsafe { libc::geteuid() };
            if uid == 0 {
                "/run/podman/podman.sock".to_string()
            } else {
                format!("/run/user/{}/podman/podman.sock", uid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_host_overrides_socket() {
        assert_eq!(
            default_socket(RuntimeKind::Docker, Some("unix:///home/me/.docker/run/docker.sock")),
            "/home/me/.docker/run/docker.sock"
        );
    }

    #[test]
    fn docker_default_socket() {
        assert_eq!(default_socket(RuntimeKind::Docker, None), DOCKER_SOCKET);
        assert_eq!(
            default_socket(RuntimeKind::Docker, Some("tcp://10.0.0.2:2375")),
            DOCKER_SOCKET
        );
    }

    #[test]
    fn podman_socket_tracks_user() {
        let socket = default_socket(RuntimeKind::Podman, None);
        assert!(socket.ends_with("podman/podman.sock"));
    }
}
