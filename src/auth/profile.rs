//! AWS shared config file (`~/.aws/config`): profile sections.

use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// The keys of a `[profile x]` section that credential brokering reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileSection {
    pub name: String,
    pub mfa_serial: Option<String>,
    pub source_profile: Option<String>,
    pub region: Option<String>,
}

impl ProfileSection {
    pub fn requires_mfa(&self) -> bool {
        self.mfa_serial.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Profile whose token generates the MFA code.
    pub fn mfa_source(&self) -> &str {
        match self.source_profile.as_deref() {
            Some(src) if !src.is_empty() => src,
            _ => &self.name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AwsConfigFile {
    sections: FxHashMap<String, ProfileSection>,
}

impl AwsConfigFile {
    /// Location honoring `AWS_CONFIG_FILE`, else `~/.aws/config`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(p) = std::env::var_os("AWS_CONFIG_FILE") {
            return Some(PathBuf::from(p));
        }
        dirs::home_dir().map(|h| h.join(".aws").join("config"))
    }

    pub fn load_default() -> Result<Self, String> {
        let path = Self::default_path().ok_or("cannot locate home directory for .aws/config")?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        Ok(Self::parse(&content))
    }

    /// Parse INI content. `[default]` and `[profile name]` headers are
    /// recognized; other sections (`[sso-session x]`) are ignored.
    pub fn parse(content: &str) -> Self {
        let mut sections = FxHashMap::default();
        let mut current: Option<ProfileSection> = None;

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if let Some(done) = current.take() {
                    sections.insert(done.name.clone(), done);
                }
                let header = header.trim();
                let name = if header == "default" {
                    Some("default")
                } else {
                    header.strip_prefix("profile ").map(str::trim)
                };
                current = name.map(|n| ProfileSection {
                    name: n.to_string(),
                    ..Default::default()
                });
                continue;
            }
            let Some(section) = current.as_mut() else {
                continue;
            };
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim() {
                "mfa_serial" => section.mfa_serial = Some(value),
                "source_profile" => section.source_profile = Some(value),
                "region" => section.region = Some(value),
                _ => {}
            }
        }
        if let Some(done) = current {
            sections.insert(done.name.clone(), done);
        }

        Self { sections }
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileSection> {
        self.sections.get(name)
    }
}
