//! Unit discovery: configuration root detection and leaf enumeration.
//!
//! Arguments follow the cue loader conventions: `dir/...` walks recursively,
//! anything else names exactly one directory. No arguments means `./...`.

use super::error::StxError;
use super::types::ConfigurationUnit;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Directory marking the configuration root.
pub const MODULE_MARKER: &str = "cue.mod";

const RECURSIVE_SUFFIX: &str = "...";

/// Nearest ancestor of `start` (inclusive) containing `cue.mod`.
pub fn find_root(start: &Path) -> Result<PathBuf, StxError> {
    start
        .ancestors()
        .find(|dir| dir.join(MODULE_MARKER).is_dir())
        .map(Path::to_path_buf)
        .ok_or_else(|| StxError::Discovery(start.to_path_buf()))
}

fn package_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*package\s+([A-Za-z_][A-Za-z0-9_]*)\s*$")
            .unwrap_or_else(|e| unreachable!("package regex: {e}"))
    })
}

/// The `package` clause of a CUE source, if any.
pub fn package_clause(source: &str) -> Option<&str> {
    package_regex()
        .captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Whether `dir` directly holds a `.cue` file declaring `package`.
pub fn dir_has_package(dir: &Path, package: &str) -> Result<bool, StxError> {
    let pattern = format!(
        "{}/*.cue",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let paths = glob::glob(&pattern).map_err(|e| StxError::Usage(e.to_string()))?;
    for path in paths.flatten() {
        if !path.is_file() {
            continue;
        }
        let source = std::fs::read_to_string(&path)?;
        if package_clause(&source) == Some(package) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Collect leaf directories under `dir` holding the package. Returns whether
/// anything in the subtree matched.
fn collect_leaves(dir: &Path, package: &str, out: &mut Vec<PathBuf>) -> Result<bool, StxError> {
    let mut children: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name != MODULE_MARKER && !name.starts_with('.')
        })
        .map(|e| e.path())
        .collect();
    children.sort();

    let mut matched = false;
    for child in &children {
        matched |= collect_leaves(child, package, out)?;
    }
    if matched {
        return Ok(true);
    }
    if dir_has_package(dir, package)? {
        out.push(dir.to_path_buf());
        return Ok(true);
    }
    Ok(false)
}

/// Operator-facing path: `./rel` under the working directory, else absolute.
pub fn display_path(dir: &Path, cwd: &Path) -> String {
    match dir.strip_prefix(cwd) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => format!("./{}", rel.display()),
        Err(_) => dir.display().to_string(),
    }
}

/// Discover the configuration units named by `args` relative to `cwd`.
pub fn discover(
    cwd: &Path,
    args: &[String],
    package: &str,
) -> Result<Vec<ConfigurationUnit>, StxError> {
    let cwd = cwd.canonicalize()?;
    let root = find_root(&cwd)?;

    let default_args = [format!("./{}", RECURSIVE_SUFFIX)];
    let args = if args.is_empty() { &default_args[..] } else { args };

    let mut dirs = Vec::new();
    for arg in args {
        let (base, recursive) = match arg.strip_suffix(RECURSIVE_SUFFIX) {
            Some(prefix) => (if prefix.is_empty() { "." } else { prefix }, true),
            None => (arg.as_str(), false),
        };
        let base = cwd.join(base);
        let base = base
            .canonicalize()
            .map_err(|e| StxError::Usage(format!("{}: {}", arg, e)))?;
        if !base.is_dir() {
            return Err(StxError::Usage(format!("{} is not a directory", arg)));
        }
        if recursive {
            collect_leaves(&base, package, &mut dirs)?;
        } else if dir_has_package(&base, package)? {
            dirs.push(base);
        } else {
            tracing::warn!("{}: no .cue files in package {}", arg, package);
        }
    }

    let mut units = BTreeMap::new();
    for dir in dirs {
        let display = display_path(&dir, &cwd);
        let unit_root = find_root(&dir).unwrap_or_else(|_| root.clone());
        units.entry(display.clone()).or_insert(ConfigurationUnit {
            dir,
            root: unit_root,
            display_path: display,
            package: package.to_string(),
        });
    }
    tracing::debug!(count = units.len(), root = %root.display(), "discovered units");
    Ok(units.into_values().collect())
}
