//! Shared data model: configuration units, stacks and operator filter flags.
//!
//! Stack records deserialize from the evaluated `Stacks.<name>` struct using the
//! CUE field names (`Name`, `Profile`, ...), so every type here keeps PascalCase
//! serde names.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Configuration units
// ============================================================================

/// One discovered directory evaluated independently into a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationUnit {
    /// Absolute directory holding the unit's `.cue` files
    pub dir: PathBuf,

    /// Configuration root (nearest ancestor holding `cue.mod`)
    pub root: PathBuf,

    /// Path shown to operators, relative to the working directory
    pub display_path: String,

    /// Declared `package` clause
    pub package: String,
}

impl fmt::Display for ConfigurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_path)
    }
}

// ============================================================================
// Stacks
// ============================================================================

/// Decoded value of `Stacks.<label>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stack {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub profile: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub environment: String,

    #[serde(default)]
    pub region_code: String,

    /// Secrets file (relative to the unit) → override definition
    #[serde(default)]
    pub overrides: IndexMap<String, Override>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub tags: IndexMap<String, String>,

    #[serde(default)]
    pub tags_enabled: bool,

    /// Shell commands run after outputs are saved
    #[serde(default)]
    pub hooks: Vec<String>,
}

/// Parameter overrides sourced from a sops-encrypted dotenv file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Override {
    /// Profile whose credentials decrypt the file
    #[serde(default)]
    pub sops_profile: String,

    /// Template parameter name → secret key in the decrypted file
    #[serde(default)]
    pub map: IndexMap<String, String>,
}

// ============================================================================
// Operator flags
// ============================================================================

/// Filter flags shared by every command driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    pub environment: Option<String>,
    pub profile: Option<String>,
    pub region_code: Option<String>,

    /// Regex over stack labels
    pub stacks: Option<String>,

    /// Dotted path that must exist under the stack
    pub has: Option<String>,

    /// Regex over unit display paths
    pub exclude: Option<String>,
}
