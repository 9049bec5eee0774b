//! Operator settings: built-in defaults, `~/.stx/config.stx.yaml`, then
//! `<root>/config.stx.yaml`, deep-merged in that order.

use super::error::StxError;
use serde::Deserialize;
use serde_yaml_ng::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file name, both at the configuration root and under `~/.stx/`.
pub const SETTINGS_FILE: &str = "config.stx.yaml";

const DEFAULTS: &str = r#"
Auth:
  AwsVault:
    Enabled: false
    Command: aws-vault
  Ykman:
    Enabled: false
    Command: ykman
Export:
  YmlPath: ./yml
Save:
  OutputsPath: cue.mod/usr/cfn.out
Cue:
  Command: cue
  Package: cfn
Aws:
  Command: aws
Sops:
  Command: sops
Timeouts:
  ExternalSeconds: 120
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    pub auth: AuthSettings,
    pub export: ExportSettings,
    pub save: SaveSettings,
    pub cue: CueSettings,
    pub aws: CommandSettings,
    pub sops: CommandSettings,
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthSettings {
    pub aws_vault: ToolSettings,
    pub ykman: ToolSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ToolSettings {
    pub enabled: bool,
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportSettings {
    /// Relative to the configuration root
    pub yml_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SaveSettings {
    /// Relative to the configuration root
    pub outputs_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CueSettings {
    pub command: String,
    /// Package filter for discovery
    pub package: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandSettings {
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeoutSettings {
    pub external_seconds: u64,
}

impl TimeoutSettings {
    pub fn external(&self) -> Duration {
        Duration::from_secs(self.external_seconds)
    }
}

impl Settings {
    /// Load defaults overlaid by the home file and the root-local file.
    pub fn load(root: &Path) -> Result<Self, StxError> {
        let mut layers = Vec::new();
        if let Some(home) = home_settings_path() {
            if let Some(layer) = read_layer(&home)? {
                tracing::debug!(path = %home.display(), "loaded home settings");
                layers.push(layer);
            }
        }
        let local = root.join(SETTINGS_FILE);
        if let Some(layer) = read_layer(&local)? {
            tracing::debug!(path = %local.display(), "loaded local settings");
            layers.push(layer);
        }
        Self::from_layers(&layers)
    }

    /// Merge YAML layers over the built-in defaults.
    pub fn from_layers(layers: &[Value]) -> Result<Self, StxError> {
        let mut merged: Value = serde_yaml_ng::from_str(DEFAULTS)
            .map_err(|e| StxError::Config(format!("built-in defaults: {}", e)))?;
        for layer in layers {
            merge(&mut merged, layer.clone());
        }
        serde_yaml_ng::from_value(merged).map_err(|e| StxError::Config(e.to_string()))
    }
}

fn home_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".stx").join(SETTINGS_FILE))
}

fn read_layer(path: &Path) -> Result<Option<Value>, StxError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| StxError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let value: Value = serde_yaml_ng::from_str(&content)
        .map_err(|e| StxError::Config(format!("{}: {}", path.display(), e)))?;
    // An empty file parses as null and contributes nothing.
    Ok((!value.is_null()).then_some(value))
}

/// Deep-merge `overlay` into `base`. Mappings merge key by key; anything else
/// is replaced.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, other) => *slot = other,
    }
}
