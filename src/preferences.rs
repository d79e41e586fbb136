//! Persisted UI preferences.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Whether the job panel shows per-job details.
    pub panel_expanded: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            panel_expanded: true,
        }
    }
}

pub fn default_path() -> Option<PathBuf> {
    crate::config::app_config_dir().map(|d| d.join("preferences.json"))
}

/// Load preferences, falling back to defaults when the file is missing or unreadable.
pub fn load_from(path: &Path) -> Preferences {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable preferences");
            Preferences::default()
        }),
        Err(_) => Preferences::default(),
    }
}

pub fn save_to(path: &Path, prefs: &Preferences) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(prefs)?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn load() -> Preferences {
    default_path().map(|p| load_from(&p)).unwrap_or_default()
}

pub fn save(prefs: &Preferences) -> Result<()> {
    let path = default_path().context("no config directory available")?;
    save_to(&path, prefs)
}
