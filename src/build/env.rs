//! Build-time environment from `--env-file` and `--env`

use crate::error::{PackError, PackResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parse one `KEY=VALUE` entry; a bare `KEY` takes its value from the host
pub fn parse_env_var(item: &str) -> PackResult<(String, String)> {
    let (key, value) = match item.split_once('=') {
        Some((key, value)) => (key.to_string(), value.to_string()),
        None => (item.to_string(), std::env::var(item).unwrap_or_default()),
    };
    if key.trim().is_empty() {
        return Err(PackError::invalid(format!("invalid env entry '{}': missing name", item)));
    }
    Ok((key, value))
}

/// Read an env file: one entry per line, blank lines skipped
pub fn read_env_file(path: &Path) -> PackResult<BTreeMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| PackError::io(format!("reading env file {}", path.display()), e))?;
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_env_var)
        .collect()
}

/// Env files in order, then explicit entries on top
pub fn merge_env(files: &[PathBuf], explicit: &BTreeMap<String, String>) -> PackResult<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for file in files {
        env.extend(read_env_file(file)?);
    }
    env.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn bare_keys_inherit_from_host() {
        std::env::set_var("PACK_TEST_INHERITED", "from-host");
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("build.env");
        std::fs::write(&file, "A=1\n\n  PACK_TEST_INHERITED  \nB=x=y\nPACK_TEST_MISSING_VAR\n").unwrap();

        let env = read_env_file(&file).unwrap();
        std::env::remove_var("PACK_TEST_INHERITED");

        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "x=y");
        assert_eq!(env["PACK_TEST_INHERITED"], "from-host");
        assert_eq!(env["PACK_TEST_MISSING_VAR"], "");
    }

    #[test]
    fn explicit_entries_win() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("a.env");
        let second = temp.path().join("b.env");
        std::fs::write(&first, "A=file\nB=first\n").unwrap();
        std::fs::write(&second, "B=second\n").unwrap();

        let explicit = BTreeMap::from([("A".to_string(), "flag".to_string())]);
        let env = merge_env(&[first, second], &explicit).unwrap();
        assert_eq!(env["A"], "flag");
        assert_eq!(env["B"], "second");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_env_file(Path::new("/nonexistent/pack.env")).unwrap_err();
        assert!(matches!(err, PackError::Io { .. }));
        assert!(parse_env_var("=value").is_err());
    }
}
