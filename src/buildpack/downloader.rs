//! Downloads of buildpack and lifecycle archives, cached by URL

use crate::error::{PackError, PackResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Fetches `http(s)://` and `file://` URIs into a local cache directory
///
/// Remote downloads are revalidated with `If-None-Match` against the stored ETag.
#[derive(Debug, Clone)]
pub struct Downloader {
    cache_dir: PathBuf,
}

impl Downloader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local path for `uri`, downloading it when remote
    pub async fn download(&self, uri: &str) -> PackResult<PathBuf> {
        if let Some(path) = uri.strip_prefix("file://") {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(PackError::PathNotFound(path));
            }
            return Ok(path);
        }
        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            let path = PathBuf::from(uri);
            if !path.exists() {
                return Err(PackError::PathNotFound(path));
            }
            return Ok(path);
        }

        let key = hex::encode(Sha256::digest(uri.as_bytes()));
        let target = self.cache_dir.join(&key);
        let etag_path = self.cache_dir.join(format!("{}.etag", key));
        let cache_dir = self.cache_dir.clone();
        let uri = uri.to_string();

        tokio::task::spawn_blocking(move || fetch(&uri, &cache_dir, &target, &etag_path))
            .await
            .map_err(|e| PackError::Internal(e.to_string()))?
    }
}

fn fetch(uri: &str, cache_dir: &Path, target: &Path, etag_path: &Path) -> PackResult<PathBuf> {
    fs::create_dir_all(cache_dir)
        .map_err(|e| PackError::io(format!("creating {}", cache_dir.display()), e))?;

    let config = ureq::Agent::config_builder()
        .timeout_global(Some(DOWNLOAD_TIMEOUT))
        .build();
    let agent = ureq::Agent::new_with_config(config);
    let failed = |reason: String| PackError::Download {
        url: uri.to_string(),
        reason,
    };

    let mut request = agent.get(uri);
    let cached_etag = if target.is_file() {
        fs::read_to_string(etag_path).ok()
    } else {
        None
    };
    if let Some(etag) = &cached_etag {
        request = request.header("If-None-Match", etag.trim());
    }

    let mut response = request.call().map_err(|e| failed(e.to_string()))?;
    if response.status().as_u16() == 304 {
        debug!("Using cached download of {}", uri);
        return Ok(target.to_path_buf());
    }

    info!("Downloading {}", uri);
    let etag = response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut temp = tempfile::NamedTempFile::new_in(cache_dir)
        .map_err(|e| PackError::io("creating download file", e))?;
    let mut body = response.body_mut().as_reader();
    io::copy(&mut body, &mut temp).map_err(|e| failed(e.to_string()))?;
    temp.persist(target)
        .map_err(|e| PackError::io(format!("writing {}", target.display()), e.error))?;

    match etag {
        Some(etag) => fs::write(etag_path, etag)
            .map_err(|e| PackError::io(format!("writing {}", etag_path.display()), e))?,
        None => {
            let _ = fs::remove_file(etag_path);
        }
    }
    Ok(target.to_path_buf())
}
