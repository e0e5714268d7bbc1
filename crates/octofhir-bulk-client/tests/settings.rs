//! Environment overrides for settings files.
//!
//! Kept in its own test binary: environment variables are process-wide.

use std::time::Duration;

use octofhir_bulk_client::load_settings;

#[test]
fn environment_overrides_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("octofhir-bulk.toml");
    std::fs::write(
        &path,
        r#"
[client]
client_id = "from-file"
strict_ssl = true

[export]
url = "https://fhir.example.com/$export"
poll_interval = "5s"
"#,
    )
    .unwrap();

    // SAFETY: this is the only test in this binary.
    unsafe {
        std::env::set_var("OCTOFHIR_BULK__CLIENT__CLIENT_ID", "from-env");
        std::env::set_var("OCTOFHIR_BULK__CLIENT__STRICT_SSL", "false");
        std::env::set_var("OCTOFHIR_BULK__EXPORT__POLL_INTERVAL", "250ms");
    }

    let settings = load_settings(Some(&path)).unwrap();
    assert_eq!(settings.client.client_id, "from-env");
    assert!(!settings.client.strict_ssl);
    assert_eq!(settings.export.poll_interval, Duration::from_millis(250));
    assert_eq!(
        settings.export.url.as_deref(),
        Some("https://fhir.example.com/$export")
    );
    assert_eq!(settings.base_dir.as_deref(), Some(dir.path()));

    let config = settings.client_config().unwrap();
    assert!(!config.strict_ssl);
    assert_eq!(config.client_id, "from-env");
}
