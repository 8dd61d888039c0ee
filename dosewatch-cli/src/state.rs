use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// `$DOSEWATCH_HOME`, or `~/.dosewatch` when unset.
pub fn dosewatch_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("DOSEWATCH_HOME") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".dosewatch"))
}

pub fn ensure_dosewatch_home() -> Result<PathBuf> {
    let dir = dosewatch_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn state_path(configured: Option<&str>) -> Result<PathBuf> {
    Ok(resolve_state_path(&ensure_dosewatch_home()?, configured))
}

/// `configured` if set (relative paths hang off `home`), else `home/state.json`.
fn resolve_state_path(home: &Path, configured: Option<&str>) -> PathBuf {
    match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(p) => home.join(p),
        None => home.join("state.json"),
    }
}
