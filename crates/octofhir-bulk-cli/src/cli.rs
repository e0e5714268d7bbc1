use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "octofhir-bulk")]
#[command(about = "OctoFHIR Bulk Data client: run and check $export against any FHIR server")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to ./octofhir-bulk.toml, then ~/.octofhir/bulk.toml)
    #[arg(short, long, global = true, env = "OCTOFHIR_BULK_CONFIG")]
    pub config: Option<PathBuf>,

    /// $export endpoint (overrides export.url from the settings file)
    #[arg(short, long, global = true, env = "OCTOFHIR_BULK_EXPORT_URL")]
    pub export_url: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request an access token from the token endpoint
    Token(TokenArgs),
    /// Start an export and check that the server accepted it
    Kickoff(KickoffArgs),
    /// Run an export to completion and print its manifest
    Export(ExportArgs),
    /// Run an export and download one of its files
    Download(DownloadArgs),
    /// Start an export and cancel it right away
    Cancel(ParamArgs),
    /// Run the conformance checks against the export endpoint
    Check,
    /// Inspect the effective settings
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct TokenArgs {
    /// Print the full token instead of a preview
    #[arg(long)]
    pub show: bool,
}

/// Standard `$export` parameters.
#[derive(clap::Args, Default)]
pub struct ParamArgs {
    /// Resource types to export (repeatable or comma separated)
    #[arg(long = "type", value_delimiter = ',')]
    pub types: Vec<String>,
    /// Only resources updated after this instant (RFC 3339)
    #[arg(long)]
    pub since: Option<String>,
    /// Output format requested from the server
    #[arg(long)]
    pub output_format: Option<String>,
    /// `_typeFilter` query (repeatable)
    #[arg(long)]
    pub type_filter: Vec<String>,
}

#[derive(clap::Args)]
pub struct KickoffArgs {
    #[command(flatten)]
    pub params: ParamArgs,
    /// Request overrides as JSON, e.g. '{"headers":{"prefer":null}}'
    #[arg(long)]
    pub overrides: Option<String>,
    /// Cancel the export after a successful kick-off
    #[arg(long)]
    pub cancel: bool,
}

#[derive(clap::Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub params: ParamArgs,
}

#[derive(clap::Args)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub params: ParamArgs,
    /// Index of the file in the manifest output list
    #[arg(long, default_value_t = 0)]
    pub index: usize,
    /// Do not send the access token with the download request
    #[arg(long)]
    pub skip_auth: bool,
    /// Write the file here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective settings (secrets omitted)
    Show,
}
