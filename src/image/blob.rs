//! Content-addressed layer blob store
//!
//! Layers are kept gzip-compressed under `blobs/sha256/<hex>` with a
//! `diffids/<hex>` index from uncompressed diff-id to compressed digest.
//! Inserts write to a temp file and rename into place, so concurrent
//! inserts of distinct (or identical) content never observe partial blobs.

use crate::archive;
use crate::error::{PackError, PackResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Identity of a stored layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// `sha256:` of the uncompressed tar
    pub diff_id: String,
    /// `sha256:` of the gzip blob
    pub digest: String,
    /// Size of the gzip blob in bytes
    pub size: u64,
}

/// Host-side layer cache shared by every image handle
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> PackResult<Self> {
        let root = root.into();
        for dir in ["blobs/sha256", "diffids", "tmp"] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .map_err(|e| PackError::io(format!("creating {}", path.display()), e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Insert an uncompressed (or gzip) layer tar from disk
    pub fn insert_tar(&self, path: &Path) -> PackResult<BlobInfo> {
        let reader = archive::open_tar(path)?;
        self.insert_reader(reader)
    }

    /// Insert an uncompressed layer tar read from `reader`
    pub fn insert_reader(&self, mut reader: impl Read) -> PackResult<BlobInfo> {
        let temp = self.temp_file()?;
        let compressed = HashingWriter::new(temp);
        let encoder = GzEncoder::new(compressed, Compression::default());
        let mut uncompressed = HashingWriter::new(encoder);

        io::copy(&mut reader, &mut uncompressed)
            .map_err(|e| PackError::io("compressing layer", e))?;

        let (encoder, diff_id, _) = uncompressed.finish();
        let compressed = encoder
            .finish()
            .map_err(|e| PackError::io("finishing layer compression", e))?;
        let (mut temp, digest, size) = compressed.finish();
        temp.flush()
            .map_err(|e| PackError::io("flushing layer blob", e))?;

        let info = BlobInfo {
            diff_id,
            digest,
            size,
        };
        self.commit(temp, &info)?;
        Ok(info)
    }

    /// Insert an already-compressed blob, verifying it against `expected_digest`
    pub fn insert_compressed(&self, path: &Path, expected_digest: Option<&str>) -> PackResult<BlobInfo> {
        let file =
            File::open(path).map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
        let mut compressed = HashingReader::new(BufReader::new(file));
        let diff_id = {
            let mut decoder = GzDecoder::new(&mut compressed);
            sha256_reader(&mut decoder)
                .map_err(|e| PackError::io(format!("decompressing {}", path.display()), e))?
                .0
        };
        // Drain any trailing bytes so the digest covers the whole blob.
        io::copy(&mut compressed, &mut io::sink())
            .map_err(|e| PackError::io(format!("reading {}", path.display()), e))?;
        let (digest, size) = compressed.finish();

        if let Some(expected) = expected_digest {
            if expected != digest {
                return Err(PackError::BlobCorrupt {
                    expected: expected.to_string(),
                    actual: digest,
                });
            }
        }

        let info = BlobInfo {
            diff_id,
            digest,
            size,
        };
        let temp = self.temp_file()?;
        fs::copy(path, temp.path())
            .map_err(|e| PackError::io(format!("copying {}", path.display()), e))?;
        self.commit(temp, &info)?;
        Ok(info)
    }

    /// Look up a layer by diff-id
    pub fn lookup(&self, diff_id: &str) -> Option<BlobInfo> {
        let index = self.root.join("diffids").join(hex_part(diff_id));
        let contents = fs::read(index).ok()?;
        let info: BlobInfo = serde_json::from_slice(&contents).ok()?;
        self.blob_path(&info.digest).is_file().then_some(info)
    }

    pub fn contains(&self, diff_id: &str) -> bool {
        self.lookup(diff_id).is_some()
    }

    /// Path of the compressed blob for `digest`
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        self.root.join("blobs/sha256").join(hex_part(digest))
    }

    /// Read a compressed blob, failing with `BlobCorrupt` on digest mismatch
    pub fn read_compressed(&self, digest: &str) -> PackResult<Vec<u8>> {
        let path = self.blob_path(digest);
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => PackError::LayerNotFound(digest.to_string()),
            _ => PackError::io(format!("reading {}", path.display()), e),
        })?;
        let actual = sha256_digest(&bytes);
        if actual != digest {
            return Err(PackError::BlobCorrupt {
                expected: digest.to_string(),
                actual,
            });
        }
        Ok(bytes)
    }

    /// Open the uncompressed tar stream of a layer
    pub fn open_layer(&self, diff_id: &str) -> PackResult<Box<dyn Read + Send>> {
        let info = self
            .lookup(diff_id)
            .ok_or_else(|| PackError::LayerNotFound(diff_id.to_string()))?;
        let path = self.blob_path(&info.digest);
        let file =
            File::open(&path).map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    }

    /// Re-hash a stored layer end to end
    pub fn verify(&self, diff_id: &str) -> PackResult<BlobInfo> {
        let info = self
            .lookup(diff_id)
            .ok_or_else(|| PackError::LayerNotFound(diff_id.to_string()))?;
        let bytes = self.read_compressed(&info.digest)?;
        let (actual, _) = sha256_reader(&mut GzDecoder::new(bytes.as_slice()))
            .map_err(|e| PackError::io(format!("decompressing {}", info.digest), e))?;
        if actual != info.diff_id {
            return Err(PackError::BlobCorrupt {
                expected: info.diff_id.clone(),
                actual,
            });
        }
        Ok(info)
    }

    fn temp_file(&self) -> PackResult<NamedTempFile> {
        NamedTempFile::new_in(self.root.join("tmp"))
            .map_err(|e| PackError::io("creating temp blob", e))
    }

    fn commit(&self, temp: NamedTempFile, info: &BlobInfo) -> PackResult<()> {
        let target = self.blob_path(&info.digest);
        if target.is_file() {
            debug!("Blob {} already stored", info.digest);
        } else {
            temp.persist(&target)
                .map_err(|e| PackError::io(format!("storing {}", target.display()), e.error))?;
        }

        let index = self.root.join("diffids").join(hex_part(&info.diff_id));
        let mut index_temp = self.temp_file()?;
        index_temp
            .write_all(&serde_json::to_vec(info)?)
            .map_err(|e| PackError::io("writing diff-id index", e))?;
        index_temp
            .persist(&index)
            .map_err(|e| PackError::io(format!("storing {}", index.display()), e.error))?;
        Ok(())
    }
}

fn hex_part(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

/// `sha256:<hex>` of a byte slice
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// `sha256:<hex>` and length of everything `reader` yields
pub fn sha256_reader(reader: &mut impl Read) -> io::Result<(String, u64)> {
    let mut hasher = HashingWriter::new(io::sink());
    io::copy(reader, &mut hasher)?;
    let (_, digest, size) = hasher.finish();
    Ok((digest, size))
}

/// Writer adapter that hashes and counts what passes through
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    count: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    /// Returns the inner writer, `sha256:` digest and byte count
    pub fn finish(self) -> (W, String, u64) {
        let digest = format!("sha256:{}", hex::encode(self.hasher.finalize()));
        (self.inner, digest, self.count)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    count: u64,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            count: 0,
        }
    }

    fn finish(self) -> (String, u64) {
        (
            format!("sha256:{}", hex::encode(self.hasher.finalize())),
            self.count,
        )
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        self.count += read as u64;
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::LayerWriter;
    use tempfile::TempDir;

    fn layer_bytes(contents: &[u8]) -> Vec<u8> {
        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        writer.add_file("/app/file", contents, 0o644).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn insert_is_content_addressed() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();

        let tar = layer_bytes(b"hello");
        let first = store.insert_reader(tar.as_slice()).unwrap();
        let second = store.insert_reader(tar.as_slice()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.diff_id, sha256_digest(&tar));
        assert_eq!(store.lookup(&first.diff_id), Some(first.clone()));

        let other = store.insert_reader(layer_bytes(b"world").as_slice()).unwrap();
        assert_ne!(other.digest, first.digest);
    }

    #[test]
    fn open_layer_round_trips_content() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let tar = layer_bytes(b"payload");
        let info = store.insert_reader(tar.as_slice()).unwrap();

        let mut out = Vec::new();
        store.open_layer(&info.diff_id).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, tar);
        assert_eq!(store.verify(&info.diff_id).unwrap(), info);
    }

    #[test]
    fn corrupt_blob_is_detected() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        let info = store.insert_reader(layer_bytes(b"x").as_slice()).unwrap();

        fs::write(store.blob_path(&info.digest), b"not gzip").unwrap();
        let err = store.read_compressed(&info.digest).unwrap_err();
        assert!(matches!(err, PackError::BlobCorrupt { .. }));
    }

    #[test]
    fn compressed_insert_checks_digest() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path().join("store")).unwrap();
        let source = BlobStore::open(dir.path().join("source")).unwrap();
        let info = source.insert_reader(layer_bytes(b"abc").as_slice()).unwrap();
        let blob = source.blob_path(&info.digest);

        let inserted = store.insert_compressed(&blob, Some(&info.digest)).unwrap();
        assert_eq!(inserted, info);

        let wrong = "sha256:0000000000000000000000000000000000000000000000000000000000000000";
        let err = store.insert_compressed(&blob, Some(wrong)).unwrap_err();
        assert!(matches!(err, PackError::BlobCorrupt { .. }));
    }

    #[test]
    fn missing_layer() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path()).unwrap();
        assert!(!store.contains("sha256:abc"));
        assert!(matches!(
            store.open_layer("sha256:abc"),
            Err(PackError::LayerNotFound(_))
        ));
    }
}
