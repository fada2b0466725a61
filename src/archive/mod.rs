//! Tar archives for layers, app sources and container copies
//!
//! Writing is deterministic (see [`LayerWriter`]); reading helpers cover
//! gzip detection, single-entry lookup and safe extraction.

pub mod reader;
pub mod writer;

pub use reader::{extract, is_gzip, list_entries, open_tar, read_entry};
pub use writer::{normalize_path, resolve_symlink_chain, LayerWriter, ModeRule};

use crate::error::{PackError, PackResult};
use std::fs::File;
use std::io::{BufWriter, Read, Seek};
use std::path::Path;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Check whether a path is a zip archive (by magic, not extension)
pub fn is_zip(path: &Path) -> PackResult<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let mut file =
        File::open(path).map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
    let mut magic = [0u8; 4];
    let read = file
        .read(&mut magic)
        .map_err(|e| PackError::io(format!("reading {}", path.display()), e))?;
    file.rewind()
        .map_err(|e| PackError::io(format!("rewinding {}", path.display()), e))?;
    Ok(read == 4 && magic == ZIP_MAGIC)
}

/// Write a source (directory or zip) into a tar file rooted at `target`
pub fn write_source_tar(
    src: &Path,
    target: &str,
    uid: u64,
    gid: u64,
    rule: ModeRule,
    out: &Path,
) -> PackResult<()> {
    let file =
        File::create(out).map_err(|e| PackError::io(format!("creating {}", out.display()), e))?;
    let mut writer = LayerWriter::new(BufWriter::new(file), uid, gid).with_mode_rule(rule);

    if src.is_dir() {
        writer.add_dir_tree(src, target)?;
    } else if is_zip(src)? {
        writer.add_zip(src, target)?;
    } else if src.exists() {
        return Err(PackError::invalid(format!(
            "{} must be a directory or a zip file",
            src.display()
        )));
    } else {
        return Err(PackError::PathNotFound(src.to_path_buf()));
    }

    let mut buffered = writer.finish()?;
    std::io::Write::flush(&mut buffered)
        .map_err(|e| PackError::io(format!("flushing {}", out.display()), e))
}

/// Write a tar containing exactly one file (plus its parent directories)
pub fn write_single_file_tar(
    target: &str,
    contents: &[u8],
    uid: u64,
    gid: u64,
    out: &Path,
) -> PackResult<()> {
    let file =
        File::create(out).map_err(|e| PackError::io(format!("creating {}", out.display()), e))?;
    let mut writer = LayerWriter::new(BufWriter::new(file), uid, gid);
    writer.add_file(target, contents, 0o644)?;
    let mut buffered = writer.finish()?;
    std::io::Write::flush(&mut buffered)
        .map_err(|e| PackError::io(format!("flushing {}", out.display()), e))
}
