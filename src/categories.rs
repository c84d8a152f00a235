use crate::config::AppConfig;
use std::path::{Path, PathBuf};

/// Where the next batch will be written, in precedence order:
/// default category, then the last used folder, then the base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetChoice {
    Category(String, PathBuf),
    LastUsed(PathBuf),
    BasePath(PathBuf),
}

impl TargetChoice {
    pub fn path(&self) -> &Path {
        match self {
            TargetChoice::Category(_, path) => path,
            TargetChoice::LastUsed(path) => path,
            TargetChoice::BasePath(path) => path,
        }
    }

    pub fn label(&self) -> String {
        match self {
            TargetChoice::Category(name, _) => format!("[{name}]"),
            TargetChoice::LastUsed(_) => "[Last Used]".to_string(),
            TargetChoice::BasePath(_) => "[Base Path]".to_string(),
        }
    }
}

pub fn effective_target(config: &AppConfig) -> TargetChoice {
    if let Some(name) = config.default_category.as_deref() {
        if let Some(path) = config.categories.get(name) {
            return TargetChoice::Category(name.to_string(), path.clone());
        }
    }
    if let Some(path) = config.last_used_path.as_ref() {
        return TargetChoice::LastUsed(path.clone());
    }
    TargetChoice::BasePath(config.download_path.clone())
}

/// Adds or replaces a category. Blank names are rejected.
pub fn add(config: &mut AppConfig, name: &str, path: PathBuf) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    config.categories.insert(name.to_string(), path);
    true
}

/// Renames a category; the default marker follows the rename.
pub fn rename(config: &mut AppConfig, old: &str, new: &str) -> bool {
    let new = new.trim();
    if new.is_empty() || !config.categories.contains_key(old) {
        return false;
    }
    if let Some(path) = config.categories.remove(old) {
        config.categories.insert(new.to_string(), path);
    }
    if config.default_category.as_deref() == Some(old) {
        config.default_category = Some(new.to_string());
    }
    true
}

/// Removes a category; clears the default marker if it pointed here.
pub fn remove(config: &mut AppConfig, name: &str) -> bool {
    if config.categories.remove(name).is_none() {
        return false;
    }
    if config.default_category.as_deref() == Some(name) {
        config.default_category = None;
    }
    true
}

pub fn set_default(config: &mut AppConfig, name: &str) -> bool {
    if !config.categories.contains_key(name) {
        return false;
    }
    config.default_category = Some(name.to_string());
    true
}
