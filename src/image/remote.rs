//! Registry access over the OCI Distribution API
//!
//! Wraps `oci_distribution::Client` with keychain-backed auth, a timeout on
//! metadata requests, and error classification into `ImageNotFound` /
//! `AuthRequired` / `Registry`.

use crate::creds::{Credential, Keychain};
use crate::error::{PackError, PackResult};
use crate::image::config::ImageConfig;
use crate::image::reference::ImageRef;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::{OciDescriptor, OciImageIndex, OciImageManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Client;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Connection and handshake budget for metadata requests
pub const REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Media type of gzip layers pack writes
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const DOCKER_LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_LIST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Manifest + config of an image in a registry
#[derive(Debug, Clone)]
pub struct RemoteManifest {
    pub manifest: OciImageManifest,
    pub digest: String,
    pub config: ImageConfig,
}

/// Location of one blob in a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub digest: String,
    pub size: u64,
    pub media_type: String,
}

/// Keychain-aware registry client
pub struct RegistryClient {
    client: Client,
    keychain: Arc<Keychain>,
    timeout: Duration,
}

impl RegistryClient {
    pub fn new(keychain: Arc<Keychain>) -> Self {
        Self::with_insecure_registries(keychain, Vec::new())
    }

    /// Client that talks plain HTTP to loopback and the listed registries
    pub fn with_insecure_registries(keychain: Arc<Keychain>, insecure: Vec<String>) -> Self {
        let mut plain_http = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        plain_http.extend(insecure);
        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(plain_http),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            keychain,
            timeout: REGISTRY_TIMEOUT,
        }
    }

    pub fn keychain(&self) -> &Arc<Keychain> {
        &self.keychain
    }

    async fn auth(&self, reference: &ImageRef) -> PackResult<RegistryAuth> {
        Ok(match self.keychain.resolve(reference.registry()).await? {
            Some(Credential::Basic { username, password }) => RegistryAuth::Basic(username, password),
            // Docker's convention for exchanging a refresh token at the token endpoint
            Some(Credential::IdentityToken(token)) => RegistryAuth::Basic("<token>".to_string(), token),
            Some(Credential::RegistryToken(token)) => RegistryAuth::Basic(String::new(), token),
            None => RegistryAuth::Anonymous,
        })
    }

    async fn timed<T, E, F>(&self, reference: &ImageRef, fut: F) -> PackResult<T>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| classify(reference, e)),
            Err(_) => Err(PackError::registry(
                reference.to_string(),
                format!("timed out after {}s", self.timeout.as_secs()),
            )),
        }
    }

    /// Digest of the manifest `reference` points at; `None` when absent
    pub async fn manifest_digest(&self, reference: &ImageRef) -> PackResult<Option<String>> {
        let oci = reference.to_oci()?;
        let auth = self.auth(reference).await?;
        not_found_as_none(
            self.timed(reference, self.client.fetch_manifest_digest(&oci, &auth))
                .await,
        )
    }

    /// Manifest and config for the current platform; `None` when absent
    pub async fn fetch_image(&self, reference: &ImageRef) -> PackResult<Option<RemoteManifest>> {
        debug!("Fetching manifest for {}", reference);
        let oci = reference.to_oci()?;
        let auth = self.auth(reference).await?;
        let fetched = not_found_as_none(
            self.timed(reference, self.client.pull_manifest_and_config(&oci, &auth))
                .await,
        )?;
        let Some((manifest, digest, config)) = fetched else {
            return Ok(None);
        };
        let config: ImageConfig = serde_json::from_str(&config)?;
        Ok(Some(RemoteManifest {
            manifest,
            digest,
            config,
        }))
    }

    /// Raw manifest bytes (image or index) and their digest; `None` when absent
    pub async fn fetch_raw_manifest(&self, reference: &ImageRef) -> PackResult<Option<(Vec<u8>, String)>> {
        let oci = reference.to_oci()?;
        let auth = self.auth(reference).await?;
        let accepted = [
            MANIFEST_MEDIA_TYPE,
            INDEX_MEDIA_TYPE,
            DOCKER_MANIFEST_MEDIA_TYPE,
            DOCKER_LIST_MEDIA_TYPE,
        ];
        let fetched = not_found_as_none(
            self.timed(reference, self.client.pull_manifest_raw(&oci, &auth, &accepted))
                .await,
        )?;
        Ok(fetched.map(|(bytes, digest)| (bytes.to_vec(), digest)))
    }

    /// Download one blob to `dest`
    pub async fn pull_blob_to(&self, reference: &ImageRef, blob: &BlobLocation, dest: &Path) -> PackResult<()> {
        debug!("Downloading {} from {}", blob.digest, reference.name());
        let oci = reference.to_oci()?;
        // Establishes the bearer token for this repository.
        let auth = self.auth(reference).await?;
        self.timed(reference, self.client.fetch_manifest_digest(&oci, &auth))
            .await?;

        let descriptor = OciDescriptor {
            media_type: blob.media_type.clone(),
            digest: blob.digest.clone(),
            size: i64::try_from(blob.size).unwrap_or(i64::MAX),
            ..Default::default()
        };
        let file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| PackError::io(format!("creating {}", dest.display()), e))?;
        self.client
            .pull_blob(&oci, &descriptor, file)
            .await
            .map_err(|e| classify(reference, e))
    }

    /// Upload layers + config and tag the manifest; returns the manifest digest
    pub async fn push_image(
        &self,
        reference: &ImageRef,
        layers: Vec<(Vec<u8>, String)>,
        config: Vec<u8>,
    ) -> PackResult<String> {
        info!("Pushing {}", reference);
        let oci = reference.to_oci()?;
        let auth = self.auth(reference).await?;

        let layers: Vec<ImageLayer> = layers
            .into_iter()
            .map(|(data, media_type)| ImageLayer::new(data, media_type, None))
            .collect();
        let config = Config::new(config, CONFIG_MEDIA_TYPE.to_string(), None);

        self.client
            .push(&oci, &layers, config, &auth, None)
            .await
            .map_err(|e| classify(reference, e))?;

        self.manifest_digest(reference)
            .await?
            .ok_or_else(|| PackError::registry(reference.to_string(), "manifest missing after push"))
    }

    /// Push an image index built as JSON; returns the pushed manifest URL
    pub async fn push_index(&self, reference: &ImageRef, index: serde_json::Value) -> PackResult<String> {
        info!("Pushing index {}", reference);
        let oci = reference.to_oci()?;
        let auth = self.auth(reference).await?;
        let index: OciImageIndex = serde_json::from_value(index)?;
        self.client
            .push_manifest_list(&oci, &auth, index)
            .await
            .map_err(|e| classify(reference, e))
    }
}

fn not_found_as_none<T>(result: PackResult<T>) -> PackResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(PackError::ImageNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Map a client error onto the error taxonomy
pub(crate) fn classify(reference: &ImageRef, err: impl std::fmt::Display) -> PackError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("401") || lower.contains("authentication") {
        PackError::AuthRequired {
            registry: reference.registry().to_string(),
        }
    } else if lower.contains("not found")
        || lower.contains("404")
        || lower.contains("manifest_unknown")
        || lower.contains("manifest unknown")
        || lower.contains("name_unknown")
    {
        PackError::ImageNotFound(reference.to_string())
    } else {
        PackError::registry(reference.to_string(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ImageRef {
        ImageRef::parse("registry.example.com/team/app:1").unwrap()
    }

    #[test]
    fn classifies_auth_failures() {
        let err = classify(&reference(), "Not authorized: 401 UNAUTHORIZED");
        assert!(matches!(err, PackError::AuthRequired { registry } if registry == "registry.example.com"));
    }

    #[test]
    fn classifies_missing_images() {
        assert!(matches!(
            classify(&reference(), "Registry error: MANIFEST_UNKNOWN"),
            PackError::ImageNotFound(_)
        ));
        assert!(matches!(
            classify(&reference(), "server returned 404"),
            PackError::ImageNotFound(_)
        ));
    }

    #[test]
    fn other_failures_keep_context() {
        let err = classify(&reference(), "connection reset");
        assert!(err.to_string().contains("registry.example.com/team/app:1"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn not_found_is_absence() {
        let missing: PackResult<u8> = Err(PackError::ImageNotFound("x".into()));
        assert_eq!(not_found_as_none(missing).unwrap(), None);
        assert!(not_found_as_none::<u8>(Err(PackError::Internal("x".into()))).is_err());
    }
}
