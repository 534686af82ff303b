//! `.wire` file discovery and parsing
//!
//! Cucumber finds its wire server through a small YAML document, normally
//! `features/step_definitions/cucumber.wire`:
//!
//! ```yaml
//! host: localhost
//! port: 3902
//! ```
//!
//! or, for a Unix domain socket:
//!
//! ```yaml
//! unix: /tmp/cucumber.sock
//! ```
//!
//! Cucumber also reads other keys (e.g. `timeout`); those are ignored here.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

use super::WireEndpoint;

/// Extension identifying a wire config file
pub const WIRE_EXTENSION: &str = "wire";

/// Keys of a `.wire` document this crate understands
#[derive(Debug, Deserialize)]
struct WireDocument {
    host: Option<String>,
    port: Option<u16>,
    unix: Option<PathBuf>,
}

/// Find the single `.wire` file in the tree rooted at `root`
///
/// Directories are descended, but symlinked directories are not followed.
/// Symlinks to files resolve to their target, and it is the target that must
/// carry the `.wire` extension. Several distinct matches are an error rather
/// than a pick that would depend on directory ordering.
pub fn find_wire_config(root: &Path) -> Result<PathBuf> {
    if !root.exists() {
        return Err(Error::ConfigNotFound {
            root: root.to_path_buf(),
        });
    }

    let mut found = Vec::new();
    collect_wire_files(root, true, &mut found)?;
    found.sort();
    found.dedup();

    match found.len() {
        0 => Err(Error::ConfigNotFound {
            root: root.to_path_buf(),
        }),
        1 => Ok(found.remove(0)),
        _ => Err(Error::ConfigAmbiguous(format!(
            "found {} .wire files under {}: {}. Pass --config to choose one",
            found.len(),
            root.display(),
            found
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

fn collect_wire_files(path: &Path, is_root: bool, found: &mut Vec<PathBuf>) -> Result<()> {
    // The root itself may be a symlinked directory; nothing below it is followed
    let metadata = if is_root {
        fs::metadata(path)?
    } else {
        match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", path.display(), e);
                return Ok(());
            }
        }
    };

    if metadata.is_dir() {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) if !is_root => {
                tracing::debug!("Skipping unreadable directory {}: {}", path.display(), e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            collect_wire_files(&entry?.path(), false, found)?;
        }
        return Ok(());
    }

    let file_path = if metadata.file_type().is_symlink() {
        match fs::canonicalize(path) {
            Ok(target) => target,
            // Dangling link
            Err(_) => return Ok(()),
        }
    } else {
        path.to_path_buf()
    };

    if file_path.is_file() && file_path.extension().is_some_and(|ext| ext == WIRE_EXTENSION) {
        found.push(file_path);
    }
    Ok(())
}

/// Parse a `.wire` file into the endpoint it describes
pub fn parse_wire_config(path: &Path) -> Result<WireEndpoint> {
    let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    parse_wire_document(path, &content)
}

fn parse_wire_document(path: &Path, content: &str) -> Result<WireEndpoint> {
    if content.trim().is_empty() {
        return Err(Error::config_invalid(path, "file is empty"));
    }

    let document: WireDocument = serde_yaml::from_str(content)
        .map_err(|e| Error::config_invalid(path, e.to_string()))?;

    match document {
        WireDocument {
            unix: Some(unix_path),
            host: Some(host),
            port,
        } => Err(Error::ConfigAmbiguous(format!(
            "both unix path '{}' and TCP host {}:{} defined in {}. Only one is supported",
            unix_path.display(),
            host,
            port.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string()),
            path.display()
        ))),
        WireDocument {
            unix: Some(unix_path),
            ..
        } => unix_endpoint(path, unix_path),
        WireDocument {
            host: Some(host),
            port: Some(port),
            ..
        } => Ok(WireEndpoint::Tcp { host, port }),
        WireDocument { host: Some(_), .. } => {
            Err(Error::config_invalid(path, "'host' is set but 'port' is missing"))
        }
        WireDocument { .. } => Err(Error::config_invalid(
            path,
            "expected either 'unix' or 'host' and 'port'",
        )),
    }
}

#[cfg(unix)]
fn unix_endpoint(path: &Path, unix_path: PathBuf) -> Result<WireEndpoint> {
    if unix_path.as_os_str().is_empty() {
        return Err(Error::config_invalid(path, "'unix' path is empty"));
    }
    Ok(WireEndpoint::Unix { path: unix_path })
}

#[cfg(not(unix))]
fn unix_endpoint(path: &Path, unix_path: PathBuf) -> Result<WireEndpoint> {
    Err(Error::config_invalid(
        path,
        format!(
            "Unix paths are unsupported on this system: '{}'",
            unix_path.display()
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(content: &str) -> Result<WireEndpoint> {
        parse_wire_document(Path::new("cucumber.wire"), content)
    }

    #[test]
    fn test_parse_tcp() {
        let endpoint = parse("host: localhost\nport: 3902\n").unwrap();
        assert_eq!(endpoint, WireEndpoint::tcp("localhost", 3902));
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_unix() {
        let endpoint = parse("unix: /tmp/cucumber.sock\n").unwrap();
        assert_eq!(endpoint, WireEndpoint::unix("/tmp/cucumber.sock"));
    }

    #[test]
    fn test_parse_ignores_cucumber_timeouts() {
        let endpoint = parse("host: 127.0.0.1\nport: 3902\ntimeout:\n  invoke: 120\n").unwrap();
        assert_eq!(endpoint, WireEndpoint::tcp("127.0.0.1", 3902));
    }

    #[test]
    fn test_parse_both_is_ambiguous() {
        let err = parse("unix: /tmp/cucumber.sock\nhost: localhost\nport: 3902\n").unwrap_err();
        assert!(matches!(err, Error::ConfigAmbiguous(_)), "{err}");
    }

    #[test]
    fn test_parse_neither_is_invalid() {
        assert!(matches!(
            parse("timeout:\n  invoke: 5\n"),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_parse_host_without_port_is_invalid() {
        assert!(matches!(parse("host: localhost\n"), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn test_parse_port_out_of_range_is_invalid() {
        assert!(matches!(
            parse("host: localhost\nport: 70000\n"),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_parse_empty_is_invalid() {
        assert!(matches!(parse("  \n"), Err(Error::ConfigInvalid { .. })));
    }

    #[test]
    fn test_find_none() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("step_definitions")).unwrap();
        fs::write(dir.path().join("login.feature"), "Feature: Login\n").unwrap();

        assert!(matches!(
            find_wire_config(dir.path()),
            Err(Error::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_find_missing_root() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            find_wire_config(&dir.path().join("nope")),
            Err(Error::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_find_single_nested() {
        let dir = tempdir().unwrap();
        let steps = dir.path().join("step_definitions");
        fs::create_dir_all(&steps).unwrap();
        fs::write(steps.join("cucumber.wire"), "host: localhost\nport: 3902\n").unwrap();
        fs::write(steps.join("notes.txt"), "not a wire file").unwrap();

        let found = find_wire_config(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "cucumber.wire");
        assert_eq!(
            found.canonicalize().unwrap(),
            steps.join("cucumber.wire").canonicalize().unwrap()
        );
    }

    #[test]
    fn test_find_root_is_the_file() {
        let dir = tempdir().unwrap();
        let wire = dir.path().join("cucumber.wire");
        fs::write(&wire, "host: localhost\nport: 3902\n").unwrap();

        assert_eq!(find_wire_config(&wire).unwrap(), wire);
    }

    #[test]
    fn test_find_several_is_ambiguous() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/one.wire"), "").unwrap();
        fs::write(dir.path().join("b/two.wire"), "").unwrap();

        let err = find_wire_config(dir.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigAmbiguous(_)), "{err}");
        assert!(err.to_string().contains("one.wire"));
        assert!(err.to_string().contains("two.wire"));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_resolves_symlink_to_target() {
        let dir = tempdir().unwrap();
        let shared = dir.path().join("shared");
        let features = dir.path().join("features");
        fs::create_dir_all(&shared).unwrap();
        fs::create_dir_all(&features).unwrap();
        let target = shared.join("cucumber.wire");
        fs::write(&target, "host: localhost\nport: 3902\n").unwrap();
        std::os::unix::fs::symlink(&target, features.join("cucumber.wire")).unwrap();

        let found = find_wire_config(&features).unwrap();
        assert_eq!(found, target.canonicalize().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_skips_dangling_symlink() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.wire"), dir.path().join("x.wire"))
            .unwrap();

        assert!(matches!(
            find_wire_config(dir.path()),
            Err(Error::ConfigNotFound { .. })
        ));
    }
}
