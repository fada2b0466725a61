//! Deterministic tar writer
//!
//! Identical trees written with identical ownership produce identical bytes:
//! every header has `mtime = 0`, the supplied uid/gid, empty user and group
//! names, forward-slash paths, and entries sorted by name within each
//! directory. Parent directories of a target path are synthesized before
//! any child entry.

use crate::error::{PackError, PackResult};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tar::{EntryType, Header};
use walkdir::WalkDir;

/// Maximum number of links followed while resolving a symlink chain
pub const MAX_SYMLINK_DEPTH: usize = 40;

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;
const EXEC_MODE: u32 = 0o755;

/// Buildpack entry points that must always be executable
const BUILDPACK_ENTRYPOINTS: &[&str] = &["bin/build", "bin/detect", "bin/generate"];

/// How regular-file modes are derived from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRule {
    /// `0644`, plus whatever executable bits the source file carries
    Source,
    /// `0755` for buildpack entry points and any file with an exec bit, else `0644`
    Buildpack,
}

impl ModeRule {
    fn file_mode(self, relative: &str, source_mode: u32) -> u32 {
        match self {
            ModeRule::Source => FILE_MODE | (source_mode & 0o111),
            ModeRule::Buildpack => {
                if source_mode & 0o111 != 0 || BUILDPACK_ENTRYPOINTS.contains(&relative) {
                    EXEC_MODE
                } else {
                    FILE_MODE
                }
            }
        }
    }
}

/// Writes layer tarballs with normalized headers
pub struct LayerWriter<W: Write> {
    builder: tar::Builder<W>,
    uid: u64,
    gid: u64,
    mode_rule: ModeRule,
    written_dirs: BTreeSet<String>,
}

impl<W: Write> LayerWriter<W> {
    /// Create a writer whose entries are owned by `uid:gid`
    pub fn new(inner: W, uid: u64, gid: u64) -> Self {
        let mut builder = tar::Builder::new(inner);
        builder.follow_symlinks(false);
        Self {
            builder,
            uid,
            gid,
            mode_rule: ModeRule::Source,
            written_dirs: BTreeSet::new(),
        }
    }

    pub fn with_mode_rule(mut self, rule: ModeRule) -> Self {
        self.mode_rule = rule;
        self
    }

    /// Emit a directory entry (and any missing parents)
    pub fn add_dir(&mut self, target: &str) -> PackResult<()> {
        let target = normalize_path(target);
        if target.is_empty() {
            return Ok(());
        }
        self.ensure_parents(&target)?;
        self.write_dir_entry(&target)
    }

    /// Emit a directory entry owned by `uid:gid` rather than the writer's owner
    pub fn add_dir_owned(&mut self, target: &str, uid: u64, gid: u64) -> PackResult<()> {
        let target = normalize_path(target);
        if target.is_empty() {
            return Ok(());
        }
        self.ensure_parents(&target)?;
        if !self.written_dirs.insert(target.clone()) {
            return Ok(());
        }
        let mut header = self.header(EntryType::Directory, DIR_MODE, 0);
        header.set_uid(uid);
        header.set_gid(gid);
        self.append(header, &target, None, io::empty())
            .map_err(|e| PackError::io(format!("writing directory {} to tar", target), e))
    }

    /// Emit a regular file with the given contents
    pub fn add_file(&mut self, target: &str, contents: &[u8], mode: u32) -> PackResult<()> {
        self.add_reader(target, contents.len() as u64, mode, contents)
    }

    /// Emit a regular file streamed from `reader`
    pub fn add_reader(
        &mut self,
        target: &str,
        size: u64,
        mode: u32,
        reader: impl Read,
    ) -> PackResult<()> {
        let target = normalize_path(target);
        self.ensure_parents(&target)?;
        let header = self.header(EntryType::Regular, mode, size);
        self.append(header, &target, None, reader)
            .map_err(|e| PackError::io(format!("writing {} to tar", target), e))
    }

    /// Emit a symlink, preserving its target string verbatim
    pub fn add_symlink(&mut self, target: &str, link: &str) -> PackResult<()> {
        let target = normalize_path(target);
        self.ensure_parents(&target)?;
        let header = self.header(EntryType::Symlink, 0o777, 0);
        self.append(header, &target, Some(link), io::empty())
            .map_err(|e| PackError::io(format!("writing symlink {} to tar", target), e))
    }

    /// Copy a directory tree from disk so it lands at `target` in the archive
    pub fn add_dir_tree(&mut self, src: &Path, target: &str) -> PackResult<()> {
        let base = normalize_path(target);
        self.add_dir(&base)?;

        let walker = WalkDir::new(src)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1);

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
                match e.into_io_error() {
                    Some(io_err) => PackError::io(format!("walking {}", path.display()), io_err),
                    None => PackError::SymlinkLoop(path),
                }
            })?;
            let path = entry.path();
            let relative = relative_slash_path(src, path)?;
            let archive_path = join_archive_path(&base, &relative);

            let metadata = fs::symlink_metadata(path)
                .map_err(|e| PackError::io(format!("reading metadata of {}", path.display()), e))?;
            let file_type = metadata.file_type();

            if file_type.is_dir() {
                self.add_dir(&archive_path)?;
            } else if file_type.is_symlink() {
                resolve_symlink_chain(path)?;
                let link = fs::read_link(path)
                    .map_err(|e| PackError::io(format!("reading link {}", path.display()), e))?;
                let link = link.to_string_lossy().replace('\\', "/");
                self.add_symlink(&archive_path, &link)?;
            } else if file_type.is_file() {
                let mode = self.mode_rule.file_mode(&relative, source_mode(&metadata));
                let file = File::open(path)
                    .map_err(|e| PackError::io(format!("opening {}", path.display()), e))?;
                self.add_reader(&archive_path, metadata.len(), mode, file)?;
            }
        }

        Ok(())
    }

    /// Copy the contents of a zip file so it lands at `target` in the archive
    pub fn add_zip(&mut self, zip_path: &Path, target: &str) -> PackResult<()> {
        let base = normalize_path(target);
        self.add_dir(&base)?;

        let file = File::open(zip_path)
            .map_err(|e| PackError::io(format!("opening {}", zip_path.display()), e))?;
        let mut archive = zip::ZipArchive::new(file).map_err(|e| {
            PackError::io(
                format!("reading zip {}", zip_path.display()),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })?;

        // Zip central directories are not ordered; sort for determinism.
        let mut names: Vec<(String, usize)> = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index(index).map_err(|e| zip_error(zip_path, e))?;
            if let Some(name) = entry.enclosed_name() {
                names.push((name.to_string_lossy().replace('\\', "/"), index));
            }
        }
        names.sort();

        for (relative, index) in names {
            let mut entry = archive.by_index(index).map_err(|e| zip_error(zip_path, e))?;
            let relative = normalize_path(&relative);
            if relative.is_empty() {
                continue;
            }
            let archive_path = join_archive_path(&base, &relative);
            let unix_mode = entry.unix_mode().unwrap_or(FILE_MODE);

            if entry.is_dir() {
                self.add_dir(&archive_path)?;
                continue;
            }

            let mut contents = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut contents)
                .map_err(|e| PackError::io(format!("reading {} from zip", relative), e))?;

            if unix_mode & 0o170000 == 0o120000 {
                let link = String::from_utf8_lossy(&contents).to_string();
                self.add_symlink(&archive_path, &link)?;
            } else {
                let mode = self.mode_rule.file_mode(&relative, unix_mode);
                self.add_file(&archive_path, &contents, mode)?;
            }
        }

        Ok(())
    }

    /// Finish the archive and return the underlying writer
    pub fn finish(self) -> PackResult<W> {
        self.builder
            .into_inner()
            .map_err(|e| PackError::io("finishing tar archive", e))
    }

    fn ensure_parents(&mut self, target: &str) -> PackResult<()> {
        let mut prefix = String::new();
        let components: Vec<&str> = target.split('/').collect();
        for component in &components[..components.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            self.write_dir_entry(&prefix.clone())?;
        }
        Ok(())
    }

    fn write_dir_entry(&mut self, path: &str) -> PackResult<()> {
        if !self.written_dirs.insert(path.to_string()) {
            return Ok(());
        }
        let header = self.header(EntryType::Directory, DIR_MODE, 0);
        self.append(header, path, None, io::empty())
            .map_err(|e| PackError::io(format!("writing directory {} to tar", path), e))
    }

    /// Append one entry. Names that do not fit the ustar name and prefix
    /// fields travel in a PAX extended header, with the ustar field holding
    /// a truncated copy for readers that ignore PAX.
    fn append(
        &mut self,
        mut header: Header,
        path: &str,
        link: Option<&str>,
        data: impl Read,
    ) -> io::Result<()> {
        let mut extensions: Vec<(&str, &[u8])> = Vec::new();
        if header.set_path(path).is_err() {
            extensions.push(("path", path.as_bytes()));
            fill_truncated(&mut header.as_old_mut().name, path);
        }
        if let Some(link) = link {
            if header.set_link_name(link).is_err() {
                extensions.push(("linkpath", link.as_bytes()));
                fill_truncated(&mut header.as_old_mut().linkname, link);
            }
        }
        if !extensions.is_empty() {
            self.builder.append_pax_extensions(extensions)?;
        }
        header.set_cksum();
        self.builder.append(&header, data)
    }

    fn header(&self, kind: EntryType, mode: u32, size: u64) -> Header {
        let mut header = Header::new_ustar();
        header.set_entry_type(kind);
        header.set_mode(mode);
        header.set_size(size);
        header.set_mtime(0);
        header.set_uid(self.uid);
        header.set_gid(self.gid);
        header
    }
}

/// Normalize an archive path: forward slashes, no leading or trailing
/// separators, no empty or `.` components.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn fill_truncated(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
    field[len..].fill(0);
}

fn join_archive_path(base: &str, relative: &str) -> String {
    if base.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", base, relative)
    }
}

fn relative_slash_path(root: &Path, path: &Path) -> PackResult<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        PackError::Internal(format!(
            "{} is not inside {}",
            path.display(),
            root.display()
        ))
    })?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Follow a symlink chain until it leaves symlink territory
///
/// Dangling links are fine; chains longer than [`MAX_SYMLINK_DEPTH`] are not.
pub fn resolve_symlink_chain(path: &Path) -> PackResult<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_SYMLINK_DEPTH {
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = fs::read_link(&current).map_err(|e| {
                    PackError::io(format!("reading link {}", current.display()), e)
                })?;
                current = if target.is_absolute() {
                    target
                } else {
                    current
                        .parent()
                        .map(|p| p.join(&target))
                        .unwrap_or(target)
                };
            }
            _ => return Ok(current),
        }
    }
    Err(PackError::SymlinkLoop(path.to_path_buf()))
}

#[cfg(unix)]
fn source_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn source_mode(_metadata: &fs::Metadata) -> u32 {
    FILE_MODE
}

fn zip_error(path: &Path, e: zip::result::ZipError) -> PackError {
    PackError::io(
        format!("reading zip {}", path.display()),
        io::Error::new(io::ErrorKind::InvalidData, e),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_tree(root: &Path) {
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("b.txt"), "bee").unwrap();
        fs::write(root.join("a.txt"), "ay").unwrap();
        fs::write(root.join("src/main.js"), "console.log(1)").unwrap();
        fs::write(root.join("src/nested/z"), "zed").unwrap();
    }

    fn tar_of(src: &Path, target: &str, uid: u64, gid: u64) -> Vec<u8> {
        let mut writer = LayerWriter::new(Vec::new(), uid, gid);
        writer.add_dir_tree(src, target).unwrap();
        writer.finish().unwrap()
    }

    fn entries(bytes: &[u8]) -> Vec<(String, Header)> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string(),
                    e.header().clone(),
                )
            })
            .collect()
    }

    #[test]
    fn identical_trees_produce_identical_bytes() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        write_tree(one.path());
        write_tree(two.path());

        let first = tar_of(one.path(), "/workspace", 1000, 1000);
        let second = tar_of(two.path(), "/workspace", 1000, 1000);
        assert_eq!(first, second);

        let other_owner = tar_of(two.path(), "/workspace", 0, 0);
        assert_ne!(first, other_owner);
    }

    #[test]
    fn parents_are_synthesized_first_and_entries_sorted() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());

        let bytes = tar_of(dir.path(), "/cnb/buildpacks/example_node/1.0.0", 0, 0);
        let names: Vec<String> = entries(&bytes).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "cnb",
                "cnb/buildpacks",
                "cnb/buildpacks/example_node",
                "cnb/buildpacks/example_node/1.0.0",
                "cnb/buildpacks/example_node/1.0.0/a.txt",
                "cnb/buildpacks/example_node/1.0.0/b.txt",
                "cnb/buildpacks/example_node/1.0.0/src",
                "cnb/buildpacks/example_node/1.0.0/src/main.js",
                "cnb/buildpacks/example_node/1.0.0/src/nested",
                "cnb/buildpacks/example_node/1.0.0/src/nested/z",
            ]
        );
    }

    #[test]
    fn headers_are_normalized() {
        let dir = TempDir::new().unwrap();
        write_tree(dir.path());

        for (name, header) in entries(&tar_of(dir.path(), "workspace", 1000, 1001)) {
            assert_eq!(header.mtime().unwrap(), 0, "{}", name);
            assert_eq!(header.uid().unwrap(), 1000);
            assert_eq!(header.gid().unwrap(), 1001);
            assert_eq!(header.username().unwrap().unwrap_or(""), "");
            assert_eq!(header.groupname().unwrap().unwrap_or(""), "");
            let expected = if header.entry_type().is_dir() { 0o755 } else { 0o644 };
            assert_eq!(header.mode().unwrap() & 0o777, expected, "{}", name);
        }
    }

    #[cfg(unix)]
    #[test]
    fn exec_bits_propagate_and_symlinks_are_kept() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("run.sh"), "#!/bin/sh").unwrap();
        fs::set_permissions(dir.path().join("run.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("run.sh", dir.path().join("start")).unwrap();

        let bytes = tar_of(dir.path(), "", 0, 0);
        let mut archive = tar::Archive::new(bytes.as_slice());
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().to_string();
            match path.as_str() {
                "run.sh" => assert_eq!(entry.header().mode().unwrap() & 0o777, 0o755),
                "start" => {
                    assert_eq!(entry.header().entry_type(), EntryType::Symlink);
                    assert_eq!(
                        entry.link_name().unwrap().unwrap().to_string_lossy(),
                        "run.sh"
                    );
                }
                other => panic!("unexpected entry {}", other),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loops_are_rejected() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink("b", dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink("a", dir.path().join("b")).unwrap();

        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        let err = writer.add_dir_tree(dir.path(), "app").unwrap_err();
        assert!(matches!(err, PackError::SymlinkLoop(_)));
    }

    #[test]
    fn buildpack_entrypoints_are_executable() {
        assert_eq!(ModeRule::Buildpack.file_mode("bin/detect", 0o644), 0o755);
        assert_eq!(ModeRule::Buildpack.file_mode("bin/build", 0o600), 0o755);
        assert_eq!(ModeRule::Buildpack.file_mode("buildpack.toml", 0o600), 0o644);
        assert_eq!(ModeRule::Buildpack.file_mode("lib/helper", 0o744), 0o755);
        assert_eq!(ModeRule::Source.file_mode("lib/helper", 0o744), 0o744);
        assert_eq!(ModeRule::Source.file_mode("lib/helper", 0o600), 0o644);
        assert_eq!(ModeRule::Source.file_mode("lib/helper", 0o700), 0o744);
    }

    #[test]
    fn normalize_path_handles_separators() {
        assert_eq!(normalize_path("/cnb//lifecycle/"), "cnb/lifecycle");
        assert_eq!(normalize_path("C:\\app\\src"), "C:/app/src");
        assert_eq!(normalize_path("./a/./b"), "a/b");
        assert_eq!(normalize_path("/"), "");
    }

    #[test]
    fn single_files_get_parents() {
        let mut writer = LayerWriter::new(Vec::new(), 0, 0);
        writer
            .add_file("/cnb/order.toml", b"[[order]]\n", 0o644)
            .unwrap();
        let bytes = writer.finish().unwrap();
        let names: Vec<String> = entries(&bytes).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["cnb", "cnb/order.toml"]);
    }

    #[test]
    fn long_names_use_pax_records_on_ustar_headers() {
        let deep = format!("layers/{}/{}", "a".repeat(120), "b".repeat(150));
        let target = format!("/workspace/{}", "t".repeat(160));
        let mut writer = LayerWriter::new(Vec::new(), 1000, 1000);
        writer.add_file(&format!("{}/data.txt", deep), b"x", 0o644).unwrap();
        writer.add_symlink("link", &target).unwrap();
        let bytes = writer.finish().unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            assert!(entry.header().as_ustar().is_some());
            assert!(entry.header().as_gnu().is_none());
            let name = entry.path().unwrap().to_string_lossy().trim_end_matches('/').to_string();
            if name == "link" {
                let link = entry.link_name().unwrap().unwrap();
                assert_eq!(link.to_string_lossy(), target);
            }
            seen.push(name);
        }
        assert!(seen.contains(&format!("{}/data.txt", deep)));
        assert!(seen.contains(&deep));
        assert!(seen.contains(&"link".to_string()));
    }
}
