//! Container, mount and image-inspect types shared by runtime implementations

use crate::image::config::{ContainerSettings, ImageConfig, RootFs};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// A mount attached to a phase container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mount {
    /// Host path
    Bind {
        source: PathBuf,
        target: String,
        read_only: bool,
    },
    /// Named volume, persisted across builds
    Volume {
        name: String,
        target: String,
        read_only: bool,
    },
    /// In-memory filesystem
    Tmpfs { target: String },
}

impl Mount {
    pub fn bind(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self::Bind {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Volume {
            name: name.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn tmpfs(target: impl Into<String>) -> Self {
        Self::Tmpfs {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Bind { target, .. } | Self::Volume { target, .. } | Self::Tmpfs { target } => target,
        }
    }

    /// Command-line arguments understood by both docker and podman
    pub fn to_args(&self) -> Vec<String> {
        let ro = |read_only: bool| if read_only { ":ro" } else { "" };
        match self {
            Self::Bind {
                source,
                target,
                read_only,
            } => vec![
                "-v".to_string(),
                format!("{}:{}{}", source.display(), target, ro(*read_only)),
            ],
            Self::Volume {
                name,
                target,
                read_only,
            } => vec![
                "-v".to_string(),
                format!("{}:{}{}", name, target, ro(*read_only)),
            ],
            Self::Tmpfs { target } => vec!["--tmpfs".to_string(), target.clone()],
        }
    }
}

/// Everything needed to create a container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub entrypoint: Option<String>,
    pub cmd: Vec<String>,
    pub user: Option<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub network: Option<String>,
    pub mac_address: Option<String>,
    pub working_dir: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub security_opt: Vec<String>,
}

impl ContainerSpec {
    /// Arguments following `create`
    pub fn to_create_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(user) = &self.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        if let Some(mac) = &self.mac_address {
            args.push("--mac-address".to_string());
            args.push(mac.clone());
        }
        if let Some(dir) = &self.working_dir {
            args.push("-w".to_string());
            args.push(dir.clone());
        }
        for opt in &self.security_opt {
            args.push("--security-opt".to_string());
            args.push(opt.clone());
        }
        for mount in &self.mounts {
            args.extend(mount.to_args());
        }
        for (k, v) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", k, v));
        }
        for (k, v) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", k, v));
        }
        if let Some(entrypoint) = &self.entrypoint {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
        }

        args.push(self.image.clone());
        args.extend(self.cmd.iter().cloned());
        args
    }
}

/// Named volume as reported by the runtime
#[derive(Debug, Clone, Default)]
pub struct VolumeInfo {
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Subset of `docker image inspect` output
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInspect {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(default)]
    pub repo_digests: Option<Vec<String>>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub config: Option<ContainerSettings>,
    #[serde(rename = "RootFS", default)]
    pub root_fs: Option<InspectRootFs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectRootFs {
    #[serde(default)]
    pub layers: Option<Vec<String>>,
}

impl ImageInspect {
    pub fn diff_ids(&self) -> Vec<String> {
        self.root_fs
            .as_ref()
            .and_then(|fs| fs.layers.clone())
            .unwrap_or_default()
    }

    /// Rebuild the OCI config the daemon holds for this image
    pub fn to_config(&self) -> ImageConfig {
        ImageConfig {
            created: self.created.clone(),
            architecture: self.architecture.clone(),
            os: self.os.clone(),
            variant: self.variant.clone(),
            os_version: None,
            config: self.config.clone().unwrap_or_default(),
            rootfs: RootFs {
                diff_ids: self.diff_ids(),
                ..RootFs::default()
            },
            history: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_args_order() {
        let mut spec = ContainerSpec {
            image: "cnbs/builder:latest".to_string(),
            entrypoint: Some("/cnb/lifecycle/detector".to_string()),
            cmd: vec!["-app".to_string(), "/workspace".to_string()],
            user: Some("1000:1000".to_string()),
            network: Some("host".to_string()),
            ..Default::default()
        };
        spec.mounts.push(Mount::volume("pack-layers-abc", "/layers"));
        spec.mounts.push(Mount::tmpfs("/kaniko"));
        spec.env.insert("CNB_PLATFORM_API".to_string(), "0.13".to_string());

        let args = spec.to_create_args();
        assert_eq!(
            args,
            vec![
                "--user",
                "1000:1000",
                "--network",
                "host",
                "-v",
                "pack-layers-abc:/layers",
                "--tmpfs",
                "/kaniko",
                "-e",
                "CNB_PLATFORM_API=0.13",
                "--entrypoint",
                "/cnb/lifecycle/detector",
                "cnbs/builder:latest",
                "-app",
                "/workspace",
            ]
        );
    }

    #[test]
    fn read_only_bind() {
        let mount = Mount::Bind {
            source: PathBuf::from("/var/run/docker.sock"),
            target: "/var/run/docker.sock".to_string(),
            read_only: true,
        };
        assert_eq!(mount.to_args()[1], "/var/run/docker.sock:/var/run/docker.sock:ro");
    }

    #[test]
    fn parses_docker_inspect() {
        let json = r#"[{
            "Id": "sha256:abc",
            "RepoTags": ["cnbs/sample-builder:jammy"],
            "Os": "linux",
            "Architecture": "arm64",
            "Config": {"Env": ["CNB_USER_ID=1000"], "Labels": {"io.buildpacks.stack.id": "io.buildpacks.stacks.jammy"}},
            "RootFS": {"Type": "layers", "Layers": ["sha256:l1", "sha256:l2"]}
        }]"#;
        let parsed: Vec<ImageInspect> = serde_json::from_str(json).unwrap();
        let config = parsed[0].to_config();
        assert_eq!(config.architecture, "arm64");
        assert_eq!(config.env("CNB_USER_ID"), Some("1000"));
        assert_eq!(config.rootfs.diff_ids, vec!["sha256:l1", "sha256:l2"]);
        assert_eq!(
            config.config.labels.get("io.buildpacks.stack.id").map(String::as_str),
            Some("io.buildpacks.stacks.jammy")
        );
    }
}
