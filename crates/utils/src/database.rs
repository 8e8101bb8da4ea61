use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};
use tracing::info;

/// Top level array holding extracted portfolio properties.
pub const PROPERTIES_KEY: &str = "portfolio_properties";

/// Resolves `database_path` to a `database.json` file when a directory (or a
/// path without a `.json` extension) is given.
fn resolve_database_path(path: &Path) -> PathBuf {
    if path.is_dir() || (!path.exists() && !path.to_string_lossy().ends_with(".json")) {
        path.join("database.json")
    } else {
        path.to_path_buf()
    }
}

/// Ensures that database.json exists at the specified path.
/// If it doesn't exist or is invalid JSON, it is initialized with an empty
/// `portfolio_properties` array. A `template.json` next to it, when present,
/// provides the `engine_version`.
///
/// # Example
/// ```no_run
/// use utils::ensure_database_exists;
///
/// let db_path = ensure_database_exists("../../database").unwrap();
/// println!("Database ready at: {:?}", db_path);
/// ```
pub fn ensure_database_exists<P: AsRef<Path>>(database_path: P) -> Result<PathBuf> {
    let db_path = resolve_database_path(database_path.as_ref());

    let needs_initialization = match File::open(&db_path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            serde_json::from_str::<serde_json::Value>(&contents).is_err()
        }
        Err(_) => true,
    };

    if needs_initialization {
        initialize_database(&db_path)?;
    }

    Ok(db_path)
}

fn initialize_database(db_path: &Path) -> Result<()> {
    let engine_version = db_path
        .parent()
        .map(|dir| dir.join("template.json"))
        .and_then(|template| std::fs::read_to_string(template).ok())
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
        .and_then(|template| template.get("engine_version").cloned())
        .unwrap_or_else(|| serde_json::json!("0.1"));

    let minimal_db = serde_json::json!({
        "engine_version": engine_version,
        PROPERTIES_KEY: []
    });

    write_database(db_path, &minimal_db)?;
    info!("Initialized database.json with empty structure at {:?}", db_path);

    Ok(())
}

/// Reads the database.json file and returns it as a serde_json::Value.
/// Ensures the database exists before reading.
pub fn read_database<P: AsRef<Path>>(database_path: P) -> Result<serde_json::Value> {
    let db_path = ensure_database_exists(database_path)?;

    let mut file = File::open(&db_path)
        .with_context(|| format!("Cannot open database at {:?}", db_path))?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    serde_json::from_str(&contents)
        .with_context(|| format!("Database at {:?} is not valid JSON", db_path))
}

/// Writes a serde_json::Value to the database.json file.
pub fn write_database<P: AsRef<Path>>(
    database_path: P,
    value: &serde_json::Value,
) -> Result<PathBuf> {
    let db_path = resolve_database_path(database_path.as_ref());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&db_path)
        .with_context(|| format!("Cannot create database file at {:?}", db_path))?;

    let formatted = serde_json::to_string_pretty(value)?;
    file.write_all(formatted.as_bytes())?;

    Ok(db_path)
}
