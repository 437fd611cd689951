//! Engine configuration.
//!
//! Roots, retention and exclusion rules are explicit configuration handed to
//! the engine at construction. Loaded from a TOML file with serde defaults
//! for everything except the two root directories.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding one subdirectory per project.
    pub projects_root: PathBuf,

    /// Directory holding per-project backup subdirectories
    /// (archives, sidecars and the metadata log).
    pub backups_root: PathBuf,

    /// Maximum archives kept on disk per project.
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    /// Path fragments excluded from scheduled (bulk) snapshots.
    /// Interactive snapshots archive everything.
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Directory names under `projects_root` that are never treated as
    /// projects by the bulk driver.
    #[serde(default = "default_reserved_projects")]
    pub reserved_projects: Vec<String>,
}

fn default_max_snapshots() -> usize {
    7
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".git".to_string(),
        "node_modules".to_string(),
        "vendor".to_string(),
        ".env".to_string(),
    ]
}

fn default_reserved_projects() -> Vec<String> {
    vec!["admin".to_string(), "Projects-Manager".to_string()]
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Configuration rooted at the given base directory, using defaults
    /// for everything else.
    pub fn with_roots(projects_root: impl Into<PathBuf>, backups_root: impl Into<PathBuf>) -> Self {
        Config {
            projects_root: projects_root.into(),
            backups_root: backups_root.into(),
            max_snapshots: default_max_snapshots(),
            exclude_patterns: default_exclude_patterns(),
            reserved_projects: default_reserved_projects(),
        }
    }
}
