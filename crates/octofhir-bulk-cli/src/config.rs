use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use octofhir_bulk_client::config::loader::DEFAULT_SETTINGS_FILE;
use octofhir_bulk_client::{BulkSettings, load_settings};

fn home_settings_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".octofhir").join("bulk.toml"))
}

/// Picks the settings file to read.
///
/// 1. `--config` / `OCTOFHIR_BULK_CONFIG`
/// 2. `./octofhir-bulk.toml`
/// 3. `~/.octofhir/bulk.toml`
pub fn settings_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(DEFAULT_SETTINGS_FILE);
    if local.exists() {
        return Some(local);
    }
    home_settings_path().filter(|path| path.exists())
}

pub fn load(cli_path: Option<&Path>) -> Result<BulkSettings> {
    if let Some(path) = cli_path
        && !path.exists()
    {
        anyhow::bail!("Settings file not found: {}", path.display());
    }
    let path = settings_path(cli_path);
    tracing::debug!(path = ?path, "Resolved settings file");
    load_settings(path.as_deref()).context("Failed to load settings")
}

pub fn resolve_export_url(cli_url: Option<&str>, settings: &BulkSettings) -> Result<String> {
    // 1. --export-url flag / OCTOFHIR_BULK_EXPORT_URL env
    if let Some(url) = cli_url {
        return Ok(url.to_string());
    }
    // 2. export.url from settings
    if let Some(url) = &settings.export.url {
        return Ok(url.clone());
    }
    anyhow::bail!(
        "No export URL configured. Use --export-url, set OCTOFHIR_BULK_EXPORT_URL, or add export.url to the settings file"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_export_url_wins() {
        let mut settings = BulkSettings::default();
        settings.export.url = Some("https://from-settings/$export".into());
        assert_eq!(
            resolve_export_url(Some("https://from-cli/$export"), &settings).unwrap(),
            "https://from-cli/$export"
        );
        assert_eq!(
            resolve_export_url(None, &settings).unwrap(),
            "https://from-settings/$export"
        );
        assert!(resolve_export_url(None, &BulkSettings::default()).is_err());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(load(Some(&missing)).is_err());

        let present = dir.path().join("bulk.toml");
        std::fs::write(&present, "[export]\nurl = \"https://fhir.example.com/$export\"\n").unwrap();
        let settings = load(Some(&present)).unwrap();
        assert_eq!(
            settings.export.url.as_deref(),
            Some("https://fhir.example.com/$export")
        );
    }
}
