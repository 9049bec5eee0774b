//! Artifact paths: where rendered templates and captured outputs land.
//!
//! Rendered templates: `<root>/<yml-path>/<profile>/<stack>.cfn.yml`.
//! Captured outputs: `<root>/<outputs-path>/<sanitized relative dir>/<stack>.out.cue`,
//! where the relative dir is the nearest ancestor owning a `template.cfn.cue`
//! (or the unit itself), relative to the configuration root.

use super::error::StxError;
use super::types::{ConfigurationUnit, Stack};
use std::path::{Component, Path, PathBuf};

/// File marking the directory that owns a stack's template.
pub const TEMPLATE_MARKER: &str = "template.cfn.cue";

pub const TEMPLATE_SUFFIX: &str = ".cfn.yml";
pub const OUTPUTS_SUFFIX: &str = ".out.cue";
pub const OVERRIDES_SUFFIX: &str = ".overrides.json";

/// Strip characters not allowed in CUE package and directory names.
pub fn sanitize_segment(segment: &str) -> String {
    segment.chars().filter(|c| *c != '-' && *c != ' ').collect()
}

/// Sanitize every segment of a relative path.
pub fn sanitize_relative(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(sanitize_segment(&s.to_string_lossy())),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Package name for an outputs file: the directory basename reduced to
/// ASCII alphanumerics and `_`.
pub fn package_name(dir: &Path) -> String {
    let base = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let name: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        "outputs".to_string()
    } else {
        name
    }
}

/// Nearest directory from `dir` up to `root` (inclusive) containing `marker`;
/// `dir` itself when no ancestor has one.
pub fn find_template_dir(dir: &Path, root: &Path, marker: &str) -> PathBuf {
    for ancestor in dir.ancestors() {
        if !ancestor.starts_with(root) {
            break;
        }
        if ancestor.join(marker).is_file() {
            return ancestor.to_path_buf();
        }
    }
    dir.to_path_buf()
}

/// `dir` relative to `root`; empty when `dir` is the root or outside it.
pub fn relative_to_root(dir: &Path, root: &Path) -> PathBuf {
    dir.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Create `dir` and its parents; succeeds when it already exists.
pub fn ensure_dir(dir: &Path) -> Result<(), StxError> {
    std::fs::create_dir_all(dir).map_err(|source| StxError::ArtifactWrite {
        path: dir.to_path_buf(),
        source,
    })
}

/// Write bytes to `path`, creating its directory first.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), StxError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    std::fs::write(path, bytes).map_err(|source| StxError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves output locations under one configuration root.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub yml_path: String,
    pub outputs_path: String,
    pub template_marker: String,
}

impl ArtifactPaths {
    pub fn new(yml_path: impl Into<String>, outputs_path: impl Into<String>) -> Self {
        Self {
            yml_path: yml_path.into(),
            outputs_path: outputs_path.into(),
            template_marker: TEMPLATE_MARKER.to_string(),
        }
    }

    /// Directory for a stack's rendered template (not created).
    pub fn template_dir(&self, root: &Path, stack: &Stack) -> PathBuf {
        normalize(&root.join(&self.yml_path).join(&stack.profile))
    }

    /// Path of a stack's rendered template, with its directory created.
    pub fn template_file(&self, root: &Path, stack: &Stack) -> Result<PathBuf, StxError> {
        let dir = self.template_dir(root, stack);
        ensure_dir(&dir)?;
        Ok(dir.join(format!("{}{}", stack.name, TEMPLATE_SUFFIX)))
    }

    /// Sidecar holding resolved parameter overrides next to the template.
    pub fn overrides_file(&self, root: &Path, stack: &Stack) -> Result<PathBuf, StxError> {
        let dir = self.template_dir(root, stack);
        ensure_dir(&dir)?;
        Ok(dir.join(format!("{}{}", stack.name, OVERRIDES_SUFFIX)))
    }

    /// Directory for a unit's captured outputs (not created).
    pub fn outputs_dir(&self, unit: &ConfigurationUnit) -> PathBuf {
        let owner = find_template_dir(&unit.dir, &unit.root, &self.template_marker);
        let relative = sanitize_relative(&relative_to_root(&owner, &unit.root));
        normalize(&unit.root.join(&self.outputs_path)).join(relative)
    }

    /// Path of a stack's outputs file, with its directory created.
    pub fn outputs_file(&self, unit: &ConfigurationUnit, stack: &Stack) -> Result<PathBuf, StxError> {
        let dir = self.outputs_dir(unit);
        ensure_dir(&dir)?;
        Ok(dir.join(format!("{}{}", stack.name, OUTPUTS_SUFFIX)))
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
