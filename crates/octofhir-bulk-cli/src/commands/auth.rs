use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

use crate::cli::{OutputFormat, TokenArgs};
use crate::client::BulkContext;
use crate::output::{preview, print_success, print_value};

pub async fn token(ctx: &BulkContext, args: &TokenArgs, format: OutputFormat) -> Result<()> {
    if !ctx.config.requires_auth {
        println!(
            "{}",
            "client.requires_auth is false; requesting a token anyway".yellow()
        );
    }
    let token = ctx
        .authorizer()
        .authorize(&ctx.config)
        .await
        .with_context(|| format!("Token request to {} failed", ctx.config.token_endpoint))?;

    let shown = if args.show {
        token.as_str().to_string()
    } else {
        preview(token.as_str())
    };
    match format {
        OutputFormat::Json => print_value(&json!({
            "tokenEndpoint": ctx.config.token_endpoint,
            "clientId": ctx.config.client_id,
            "accessToken": shown,
        })),
        OutputFormat::Table => {
            print_success(&format!(
                "Obtained access token from {}",
                ctx.config.token_endpoint.cyan()
            ));
            println!("{}: {}", "Client".cyan(), ctx.config.client_id);
            println!("{}: Bearer (token: {})", "Auth".cyan(), shown);
        }
    }
    Ok(())
}
