//! Reading helpers for layer tarballs and `docker cp` streams

use crate::archive::writer::normalize_path;
use crate::error::{PackError, PackResult};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Check whether a file starts with the gzip magic bytes
pub fn is_gzip(path: &Path) -> PackResult<bool> {
    let mut file =
        File::open(path).map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(PackError::io(format!("reading {}", path.display()), e)),
    }
}

/// Open a tar file, transparently decompressing gzip
pub fn open_tar(path: &Path) -> PackResult<Box<dyn Read + Send>> {
    let gzip = is_gzip(path)?;
    let file =
        File::open(path).map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
    let reader = BufReader::new(file);
    if gzip {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Read a single file out of a tar stream
///
/// Paths are compared after normalization, so `./cnb/x`, `/cnb/x` and
/// `cnb/x` all match.
pub fn read_entry(reader: impl Read, wanted: &str) -> PackResult<Option<Vec<u8>>> {
    let wanted = normalize_path(wanted);
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| PackError::io("reading tar entries", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| PackError::io("reading tar entry", e))?;
        let path = entry
            .path()
            .map_err(|e| PackError::io("reading tar entry path", e))?
            .to_string_lossy()
            .to_string();
        if normalize_path(&path) == wanted {
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| PackError::io(format!("reading {} from tar", wanted), e))?;
            return Ok(Some(contents));
        }
    }
    Ok(None)
}

/// List the normalized paths of every entry in a tar stream
pub fn list_entries(reader: impl Read) -> PackResult<Vec<String>> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| PackError::io("reading tar entries", e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PackError::io("reading tar entry", e))?;
        let path = entry
            .path()
            .map_err(|e| PackError::io("reading tar entry path", e))?;
        paths.push(normalize_path(&path.to_string_lossy()));
    }
    Ok(paths)
}

/// Extract a tar stream into `dest`, dropping the first `strip` path components
///
/// Entries that would escape `dest` are rejected.
pub fn extract(reader: impl Read, dest: &Path, strip: usize) -> PackResult<()> {
    fs::create_dir_all(dest).map_err(|e| PackError::io(format!("creating {}", dest.display()), e))?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_mtime(false);
    archive.set_unpack_xattrs(false);
    let entries = archive
        .entries()
        .map_err(|e| PackError::io("reading tar entries", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| PackError::io("reading tar entry", e))?;
        let path = entry
            .path()
            .map_err(|e| PackError::io("reading tar entry path", e))?
            .into_owned();
        let Some(relative) = stripped(&path, strip)? else {
            continue;
        };
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PackError::io(format!("creating {}", parent.display()), e))?;
        }
        entry
            .unpack(&target)
            .map_err(|e| PackError::io(format!("extracting {}", target.display()), e))?;
    }
    Ok(())
}

fn stripped(path: &Path, strip: usize) -> PackResult<Option<PathBuf>> {
    let mut out = PathBuf::new();
    let mut skipped = 0;
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                if skipped < strip {
                    skipped += 1;
                } else {
                    out.push(part);
                }
            }
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PackError::io(
                    format!("unpacking {}", path.display()),
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "tar entry escapes destination",
                    ),
                ));
            }
        }
    }
    Ok(if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    })
}
