//! Docker/Podman CLI container runtime
//!
//! Implements the ContainerRuntime trait by shelling out to the `docker` or
//! `podman` binary. Both accept the same subset of commands used here.

use crate::error::{PackError, PackResult};
use crate::orchestration::container::{ContainerSpec, ImageInspect, VolumeInfo};
use crate::orchestration::runtime::ContainerRuntime;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Which CLI the runtime drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Env var that points the CLI at a non-default daemon
    fn host_env(&self) -> &'static str {
        match self {
            Self::Docker => "DOCKER_HOST",
            Self::Podman => "CONTAINER_HOST",
        }
    }
}

/// Container runtime backed by the docker or podman CLI
pub struct CliRuntime {
    kind: RuntimeKind,
    host: Option<String>,
    socket: String,
}

impl CliRuntime {
    /// Create a runtime for `kind`, optionally targeting a specific daemon host
    pub fn new(kind: RuntimeKind, host: Option<String>, socket: String) -> Self {
        Self { kind, host, socket }
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(self.kind.binary());
        cmd.args(args).kill_on_drop(true);
        if let Some(host) = &self.host {
            cmd.env(self.kind.host_env(), host);
        }
        cmd
    }

    /// Execute a CLI command and return the output
    async fn exec(&self, args: &[&str]) -> PackResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.kind.binary(), args);

        self.command(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PackError::command_failed(format!("{} {:?}", self.kind.binary(), args), e))
    }

    /// Execute and fail on a nonzero exit status
    async fn exec_ok(&self, args: &[&str]) -> PackResult<std::process::Output> {
        let output = self.exec(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::command_exec(
                format!("{} {}", self.kind.binary(), args.first().copied().unwrap_or_default()),
                stderr.trim(),
            ))
        }
    }

    fn is_missing(stderr: &str) -> bool {
        let lower = stderr.to_lowercase();
        lower.contains("no such") || lower.contains("not known") || lower.contains("not found")
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn is_available(&self) -> PackResult<bool> {
        let status = self
            .command(&["version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        Ok(status.map(|s| s.success()).unwrap_or(false))
    }

    async fn daemon_os(&self) -> PackResult<String> {
        let format = match self.kind {
            RuntimeKind::Docker => "{{.OSType}}",
            RuntimeKind::Podman => "{{.Host.OS}}",
        };
        let output = self.exec_ok(&["info", "--format", format]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn daemon_socket(&self) -> String {
        self.socket.clone()
    }

    async fn image_inspect(&self, image: &str) -> PackResult<Option<ImageInspect>> {
        let output = self.exec(&["image", "inspect", image]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if Self::is_missing(&stderr) {
                return Ok(None);
            }
            return Err(PackError::command_exec("image inspect", stderr.trim()));
        }

        let mut parsed: Vec<ImageInspect> = serde_json::from_slice(&output.stdout)?;
        Ok(if parsed.is_empty() {
            None
        } else {
            Some(parsed.swap_remove(0))
        })
    }

    async fn image_pull(&self, image: &str, platform: Option<&str>) -> PackResult<()> {
        info!("Pulling image: {}", image);

        let mut args = vec!["pull"];
        if let Some(platform) = platform {
            args.push("--platform");
            args.push(platform);
        }
        args.push(image);

        let output = self.exec(&args).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if Self::is_missing(&stderr) || stderr.contains("manifest unknown") {
                return Err(PackError::ImageNotFound(image.to_string()));
            }
            Err(PackError::ImagePull {
                image: image.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn image_push(&self, image: &str) -> PackResult<()> {
        info!("Pushing image: {}", image);
        self.exec_ok(&["push", image]).await?;
        Ok(())
    }

    async fn image_tag(&self, source: &str, target: &str) -> PackResult<()> {
        self.exec_ok(&["tag", source, target]).await?;
        Ok(())
    }

    async fn image_remove(&self, image: &str) -> PackResult<()> {
        let output = self.exec(&["rmi", image]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if Self::is_missing(&stderr) {
            Ok(())
        } else {
            Err(PackError::command_exec("rmi", stderr.trim()))
        }
    }

    async fn image_save(&self, image: &str, dest: &Path) -> PackResult<()> {
        let dest = dest.display().to_string();
        self.exec_ok(&["save", "-o", &dest, image]).await?;
        Ok(())
    }

    async fn image_load(&self, archive: &Path) -> PackResult<()> {
        let archive = archive.display().to_string();
        let output = self.exec_ok(&["load", "-i", &archive]).await?;
        debug!("{}", String::from_utf8_lossy(&output.stdout).trim());
        Ok(())
    }

    async fn volume_create(&self, name: &str, labels: &HashMap<String, String>) -> PackResult<()> {
        debug!("Creating volume: {}", name);

        let mut args = vec!["volume", "create"];
        if self.kind == RuntimeKind::Podman {
            args.push("--ignore");
        }
        let label_strings: Vec<String> =
            labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        for label in &label_strings {
            args.push("--label");
            args.push(label);
        }
        args.push(name);

        self.exec_ok(&args).await?;
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> PackResult<bool> {
        let output = self.exec(&["volume", "inspect", name]).await?;
        Ok(output.status.success())
    }

    async fn volume_remove(&self, name: &str) -> PackResult<()> {
        debug!("Removing volume: {}", name);

        let output = self.exec(&["volume", "rm", "-f", name]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if Self::is_missing(&stderr) {
            Ok(())
        } else {
            Err(PackError::command_exec("volume rm", stderr.trim()))
        }
    }

    async fn volume_list(&self, prefix: &str) -> PackResult<Vec<VolumeInfo>> {
        let output = self
            .exec_ok(&["volume", "ls", "--format", "{{json .}}"])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let mut result = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            // podman prints a JSON array, docker prints one object per line
            let values: Vec<serde_json::Value> = match serde_json::from_str(line)? {
                serde_json::Value::Array(items) => items,
                other => vec![other],
            };
            for vol in values {
                let name = vol["Name"].as_str().unwrap_or_default();
                if !name.starts_with(prefix) {
                    continue;
                }
                result.push(VolumeInfo {
                    name: name.to_string(),
                    labels: parse_labels(&vol["Labels"]),
                });
            }
        }
        Ok(result)
    }

    async fn container_create(&self, spec: &ContainerSpec) -> PackResult<String> {
        let mut args = vec!["create".to_string()];
        args.extend(spec.to_create_args());
        debug!("Creating container: {:?}", args);

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec(&args_refs).await?;

        if output.status.success() {
            let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            debug!(
                "Container created: {}",
                &container_id[..12.min(container_id.len())]
            );
            Ok(container_id)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::ContainerCreate(stderr.trim().to_string()))
        }
    }

    async fn copy_to_container(&self, container_id: &str, archive: &Path) -> PackResult<()> {
        let file = std::fs::File::open(archive)
            .map_err(|e| PackError::io(format!("opening {}", archive.display()), e))?;
        let target = format!("{}:/", container_id);
        debug!("Copying {} into {}", archive.display(), target);

        let output = self
            .command(&["cp", "-", &target])
            .stdin(Stdio::from(file))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PackError::command_failed("cp", e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::command_exec("cp", stderr.trim()))
        }
    }

    async fn copy_from_container(&self, container_id: &str, path: &str, dest: &Path) -> PackResult<()> {
        let file = std::fs::File::create(dest)
            .map_err(|e| PackError::io(format!("creating {}", dest.display()), e))?;
        let source = format!("{}:{}", container_id, path);

        let output = self
            .command(&["cp", &source, "-"])
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PackError::command_failed("cp", e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::command_exec("cp", stderr.trim()))
        }
    }

    async fn start_wait(
        &self,
        container_id: &str,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> PackResult<i64> {
        debug!("Starting container attached: {}", container_id);

        let mut child = self
            .command(&["start", "--attach", container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PackError::command_failed("start", e))?;

        super::stream_child_output(&mut child, on_output).await;

        // `start --attach` mirrors the container's exit status; ask the daemon
        // anyway so a CLI failure is not mistaken for a phase failure.
        let status = child
            .wait()
            .await
            .map_err(|e| PackError::command_failed("start", e))?;
        let inspected = self
            .exec(&["inspect", "--format", "{{.State.ExitCode}}", container_id])
            .await?;
        if inspected.status.success() {
            let code = String::from_utf8_lossy(&inspected.stdout);
            if let Ok(code) = code.trim().parse::<i64>() {
                return Ok(code);
            }
        }
        Ok(status.code().map(i64::from).unwrap_or(-1))
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> PackResult<()> {
        debug!("Stopping container: {}", container_id);

        let secs = grace.as_secs().to_string();
        let output = self.exec(&["stop", "-t", &secs, container_id]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if Self::is_missing(&stderr) {
            Ok(())
        } else {
            Err(PackError::command_exec("stop", stderr.trim()))
        }
    }

    async fn kill(&self, container_id: &str) -> PackResult<()> {
        debug!("Killing container: {}", container_id);

        let output = self.exec(&["kill", container_id]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if Self::is_missing(&stderr) || stderr.contains("is not running") {
            Ok(())
        } else {
            Err(PackError::command_exec("kill", stderr.trim()))
        }
    }

    async fn container_remove(&self, container_id: &str) -> PackResult<()> {
        debug!("Removing container: {}", container_id);

        let output = self.exec(&["rm", "-f", container_id]).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if Self::is_missing(&stderr) {
            Ok(())
        } else {
            Err(PackError::command_exec("rm", stderr.trim()))
        }
    }

    fn runtime_name(&self) -> &'static str {
        match self.kind {
            RuntimeKind::Docker => "Docker",
            RuntimeKind::Podman => "Podman",
        }
    }
}

fn parse_labels(value: &serde_json::Value) -> HashMap<String, String> {
    match value {
        serde_json::Value::Object(obj) => obj
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        // docker's `{{json .}}` renders labels as "k=v,k2=v2"
        serde_json::Value::String(s) => s
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        _ => HashMap::new(),
    }
}
