mod cli;
mod client;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands, ConfigCommands, OutputFormat};
use client::BulkContext;
use output::{print_error, print_value};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    let settings = config::load(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    observability::init_tracing_with_level(&level);

    if let Commands::Config(args) = &cli.command {
        match args.command {
            ConfigCommands::Show => match format {
                OutputFormat::Json => print_value(&serde_json::to_value(&settings)?),
                OutputFormat::Table => {
                    let text = toml::to_string_pretty(&settings)
                        .context("Failed to render settings as TOML")?;
                    print!("{text}");
                }
            },
        }
        return Ok(());
    }

    let export_url = match &cli.command {
        Commands::Token(_) => None,
        _ => Some(config::resolve_export_url(cli.export_url.as_deref(), &settings)?),
    };
    let ctx = BulkContext::new(settings, export_url)?;

    match &cli.command {
        Commands::Token(args) => commands::auth::token(&ctx, args, format).await?,
        Commands::Kickoff(args) => commands::export::kickoff(&ctx, args, format).await?,
        Commands::Export(args) => commands::export::export(&ctx, args, format).await?,
        Commands::Download(args) => commands::export::download(&ctx, args).await?,
        Commands::Cancel(params) => commands::export::cancel(&ctx, params, format).await?,
        Commands::Check => commands::check::check(&ctx, format).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}
