//! Conformance checks against a Bulk Data `$export` endpoint.
//!
//! Every check runs on its own orchestrator so a failed step never leaks
//! session state into the next one.

use anyhow::{Context, Result};
use colored::Colorize;
use octofhir_bulk_client::expect;
use serde::Serialize;
use serde_json::{Value, json};

use crate::cli::{OutputFormat, ParamArgs};
use crate::client::BulkContext;
use crate::output::{print_error, print_success, print_value};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub name: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckOutcome {
    fn from_result(name: &'static str, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                name,
                passed: true,
                message: None,
            },
            Err(e) => Self {
                name,
                passed: false,
                message: Some(format!("{e:#}")),
            },
        }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self {
            name,
            passed: true,
            message: Some(format!("skipped: {reason}")),
        }
    }
}

async fn kick_off_accepted(ctx: &BulkContext) -> Result<()> {
    let mut export = ctx.orchestrator(&ParamArgs::default())?;
    export.kick_off(Value::Null).await?;
    let result = export.expect_successful_kick_off();
    export.cancel_if_started().await?;
    result?;
    Ok(())
}

async fn missing_prefer_rejected(ctx: &BulkContext) -> Result<()> {
    let mut export = ctx.orchestrator(&ParamArgs::default())?;
    export
        .kick_off(json!({ "headers": { "prefer": null } }))
        .await?;
    let result = export.expect_failed_kick_off();
    export.cancel_if_started().await?;
    result?;
    Ok(())
}

async fn missing_token_rejected(ctx: &BulkContext) -> Result<()> {
    let mut export = ctx.orchestrator(&ParamArgs::default())?;
    let response = export
        .kick_off(json!({ "headers": { "authorization": null } }))
        .await?;
    let result = expect::status_code(response, 401);
    export.cancel_if_started().await?;
    result?;
    Ok(())
}

/// Runs an export to completion, returning `requiresAccessToken`.
async fn export_completes(ctx: &BulkContext) -> Result<bool> {
    let mut export = ctx.orchestrator(&ParamArgs::default())?;
    export.kick_off(Value::Null).await?;
    export.expect_successful_kick_off()?;
    let response = export.wait_for_export().await?;
    expect::status_code(response, 200)?;
    let manifest = export.manifest().context("Completed export has no manifest")?;
    tracing::info!(
        files = manifest.output.len(),
        resources = manifest.total_count(),
        "Export completed"
    );
    Ok(manifest.requires_access_token)
}

async fn cancel_accepted(ctx: &BulkContext) -> Result<()> {
    let mut export = ctx.orchestrator(&ParamArgs::default())?;
    export.kick_off(Value::Null).await?;
    export.expect_successful_kick_off()?;
    let response = export.cancel().await?;
    expect::status_code(response, 202)?;
    Ok(())
}

async fn download_without_token_rejected(ctx: &BulkContext) -> Result<()> {
    let mut export = ctx.orchestrator(&ParamArgs::default())?;
    let response = export.download_file_at(0, true).await?;
    expect::status_at_least(&response, 400)?;
    Ok(())
}

async fn download_succeeds(ctx: &BulkContext) -> Result<()> {
    let mut export = ctx.orchestrator(&ParamArgs::default())?;
    let response = export.download_file_at(0, false).await?;
    expect::status_code(&response, 200)?;
    Ok(())
}

pub async fn run_checks(ctx: &BulkContext) -> Result<Vec<CheckOutcome>> {
    ctx.export_url()?;
    let mut outcomes = Vec::new();

    outcomes.push(CheckOutcome::from_result(
        "kick-off is accepted",
        kick_off_accepted(ctx).await,
    ));
    outcomes.push(CheckOutcome::from_result(
        "kick-off without prefer header is rejected",
        missing_prefer_rejected(ctx).await,
    ));

    let auth_name = "kick-off without access token is rejected";
    if ctx.config.requires_auth {
        outcomes.push(CheckOutcome::from_result(
            auth_name,
            missing_token_rejected(ctx).await,
        ));
    } else {
        outcomes.push(CheckOutcome::skipped(auth_name, "server is open"));
    }

    let completed = export_completes(ctx).await;
    let export_ok = completed.is_ok();
    let requires_token = completed.as_ref().is_ok_and(|required| *required);
    outcomes.push(CheckOutcome::from_result(
        "export completes",
        completed.map(|_| ()),
    ));

    outcomes.push(CheckOutcome::from_result(
        "cancel is accepted",
        cancel_accepted(ctx).await,
    ));

    let no_token_name = "download without access token is rejected";
    if !export_ok {
        outcomes.push(CheckOutcome::skipped(no_token_name, "export did not complete"));
    } else if ctx.config.requires_auth && requires_token {
        outcomes.push(CheckOutcome::from_result(
            no_token_name,
            download_without_token_rejected(ctx).await,
        ));
    } else {
        outcomes.push(CheckOutcome::skipped(
            no_token_name,
            "manifest does not require an access token",
        ));
    }

    let download_name = "download succeeds";
    if export_ok {
        outcomes.push(CheckOutcome::from_result(
            download_name,
            download_succeeds(ctx).await,
        ));
    } else {
        outcomes.push(CheckOutcome::skipped(download_name, "export did not complete"));
    }

    Ok(outcomes)
}

fn report(outcomes: &[CheckOutcome], format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_value(outcomes) {
            Ok(value) => print_value(&value),
            Err(e) => print_error(&format!("Cannot render check results: {e}")),
        },
        OutputFormat::Table => {
            for outcome in outcomes {
                match (&outcome.message, outcome.passed) {
                    (None, _) => print_success(outcome.name),
                    (Some(message), true) => {
                        println!("{} {} ({})", "-".yellow(), outcome.name, message.dimmed());
                    }
                    (Some(message), false) => {
                        print_error(&format!("{}: {message}", outcome.name));
                    }
                }
            }
        }
    }
}

pub async fn check(ctx: &BulkContext, format: OutputFormat) -> Result<()> {
    let outcomes = run_checks(ctx).await?;
    report(&outcomes, format);

    let failed = outcomes.iter().filter(|outcome| !outcome.passed).count();
    if failed > 0 {
        anyhow::bail!("{failed} check(s) failed");
    }
    if matches!(format, OutputFormat::Table) {
        print_success(&format!("All {} checks passed", outcomes.len()));
    }
    Ok(())
}
