use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_bulk_client::ResponseDescriptor;
use serde_json::Value;

use crate::cli::{DownloadArgs, ExportArgs, KickoffArgs, OutputFormat, ParamArgs};
use crate::client::BulkContext;
use crate::output::{print_manifest, print_outcome, print_response, print_state, print_success};

fn parse_overrides(raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("--overrides must be a JSON object"),
        None => Ok(Value::Null),
    }
}

pub async fn kickoff(ctx: &BulkContext, args: &KickoffArgs, format: OutputFormat) -> Result<()> {
    let overrides = parse_overrides(args.overrides.as_deref())?;
    let mut export = ctx.orchestrator(&args.params)?;

    let response = export.kick_off(overrides).await?;
    print_response("Kick-off", response, format);
    export
        .expect_successful_kick_off()
        .context("Kick-off was not accepted")?;
    print_outcome(
        format,
        &format!("Export accepted by {}", export.export_url().as_str().cyan()),
    );

    if args.cancel
        && let Some(response) = export.cancel_if_started().await?
    {
        print_response("Cancel", response, format);
    }
    if matches!(format, OutputFormat::Table) {
        print_state(export.state());
    }
    Ok(())
}

pub async fn export(ctx: &BulkContext, args: &ExportArgs, format: OutputFormat) -> Result<()> {
    let mut export = ctx.orchestrator(&args.params)?;

    export.kick_off(Value::Null).await?;
    export
        .expect_successful_kick_off()
        .context("Kick-off was not accepted")?;
    tracing::info!(url = %export.export_url(), "Export started, waiting for completion");

    let response = export.wait_for_export().await?;
    if !response.is_success() {
        print_response("Status", response, format);
        anyhow::bail!("Export failed with status {}", response.status);
    }
    let manifest = export.manifest()?;
    print_manifest(&manifest, format);
    Ok(())
}

/// Writes the body exactly as the server sent it.
fn save_body(response: &ResponseDescriptor, path: &Path) -> Result<usize> {
    let bytes = response.body_bytes();
    fs::write(path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(bytes.len())
}

pub async fn download(ctx: &BulkContext, args: &DownloadArgs) -> Result<()> {
    let mut export = ctx.orchestrator(&args.params)?;
    let response = export.download_file_at(args.index, args.skip_auth).await?;

    if !response.is_success() {
        anyhow::bail!(
            "Download of file #{} failed with status {}",
            args.index,
            response.status
        );
    }
    match &args.output {
        Some(path) => {
            let written = save_body(&response, path)?;
            print_success(&format!(
                "Saved file #{} ({written} bytes) to {}",
                args.index,
                path.display()
            ));
        }
        None => {
            std::io::stdout().write_all(&response.body_bytes())?;
        }
    }
    Ok(())
}

pub async fn cancel(ctx: &BulkContext, params: &ParamArgs, format: OutputFormat) -> Result<()> {
    let mut export = ctx.orchestrator(params)?;

    let response = export.kick_off(Value::Null).await?;
    print_response("Kick-off", response, format);

    match export.cancel_if_started().await? {
        Some(response) => {
            print_response("Cancel", response, format);
            if response.status != 202 {
                anyhow::bail!("Cancel request returned {}", response.status);
            }
            print_outcome(format, "Export cancelled");
        }
        None => anyhow::bail!("The export was not started, nothing to cancel"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides() {
        assert!(parse_overrides(None).unwrap().is_null());
        let value = parse_overrides(Some(r#"{"headers":{"prefer":null}}"#)).unwrap();
        assert!(value["headers"]["prefer"].is_null());
        assert!(parse_overrides(Some("{not json")).is_err());
    }

    #[test]
    fn test_save_body_keeps_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patient.ndjson");
        let response = ResponseDescriptor {
            raw: vec![b'{', b'}', b'\n', 0xff],
            ..ResponseDescriptor::new(200).with_text("{}\n\u{fffd}")
        };

        assert_eq!(save_body(&response, &path).unwrap(), 4);
        assert_eq!(std::fs::read(&path).unwrap(), vec![b'{', b'}', b'\n', 0xff]);
    }
}
