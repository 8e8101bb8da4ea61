//! # Settings Loader
//!
//! Centralized settings loading for the report parsers. Settings live in a JSON
//! file (`settings.json` by default) holding the pivot currency, the report time
//! zone and the external rate provider configuration.
//!
//! ## Features
//!
//! - Load settings from specified file paths
//! - Load settings from default location (`settings.json`)
//! - Handle optional settings gracefully
//! - Environment overrides (`PIVOT_CURRENCY`, `REPORT_ZONE`, `RATE_PROVIDER_URL`),
//!   read from a `.env` file when one is present
//!
//! ## Usage Examples
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! # fn main() -> anyhow::Result<()> {
//! // Load settings from a specific path
//! let settings = settings_loader::load_settings("config/my_settings.json")?;
//!
//! // Explicit path, then settings.json, then built-in defaults; env overrides applied last
//! let path = Some(PathBuf::from("settings.json"));
//! let settings = settings_loader::load_effective_settings(path.as_ref())?;
//! # Ok(())
//! # }
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use models::Settings;
use tracing::{debug, info};

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

/// Loads settings from a JSON file
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Reading settings file: {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("Parsing settings JSON in {}", path.display()))?;
    Ok(settings)
}

/// Loads settings from a default location (settings.json in the current directory)
pub fn load_default_settings() -> Result<Settings> {
    load_settings(DEFAULT_SETTINGS_FILE)
}

/// Loads settings from an optional path, returning None if no path is provided
pub fn load_optional_settings(path: Option<&PathBuf>) -> Result<Option<Settings>> {
    match path {
        Some(settings_path) => Ok(Some(load_settings(settings_path)?)),
        None => Ok(None),
    }
}

/// Tries to load settings from the provided path, falling back to default location if the path is None
/// or if the file doesn't exist. Returns None only if no settings file is found anywhere.
pub fn load_settings_with_fallback(path: Option<&PathBuf>) -> Result<Option<Settings>> {
    if let Some(settings_path) = path {
        match load_settings(settings_path) {
            Ok(settings) => return Ok(Some(settings)),
            Err(e) => {
                info!("Settings at {} unusable ({e:#}), trying {DEFAULT_SETTINGS_FILE}", settings_path.display());
            }
        }
    }

    if !default_settings_exist() {
        return Ok(None);
    }
    match load_default_settings() {
        Ok(settings) => Ok(Some(settings)),
        Err(e) => {
            info!("Default settings unusable ({e:#}), using built-in defaults");
            Ok(None)
        }
    }
}

/// Settings a binary should run with: file (explicit or default), else built-in
/// defaults, with environment overrides applied on top.
pub fn load_effective_settings(path: Option<&PathBuf>) -> Result<Settings> {
    // A missing .env is the normal case.
    let _ = dotenvy::dotenv();

    let mut settings = load_settings_with_fallback(path)?.unwrap_or_default();
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Overrides individual fields from `PIVOT_CURRENCY`, `REPORT_ZONE` and `RATE_PROVIDER_URL`.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(pivot) = non_empty_var("PIVOT_CURRENCY") {
        debug!("PIVOT_CURRENCY override: {pivot}");
        settings.pivot_currency = pivot.to_uppercase();
    }
    if let Some(zone) = non_empty_var("REPORT_ZONE") {
        debug!("REPORT_ZONE override: {zone}");
        settings.report_zone = zone;
    }
    if let Some(url) = non_empty_var("RATE_PROVIDER_URL") {
        debug!("RATE_PROVIDER_URL override: {url}");
        settings.rate_provider.base_url = url;
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Checks if a settings file exists at the given path
pub fn settings_file_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists() && path.as_ref().is_file()
}

/// Checks if the default settings file (settings.json) exists
pub fn default_settings_exist() -> bool {
    settings_file_exists(DEFAULT_SETTINGS_FILE)
}
