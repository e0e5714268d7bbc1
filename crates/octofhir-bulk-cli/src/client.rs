use std::sync::Arc;

use anyhow::{Context, Result};
use octofhir_bulk_client::{
    Authorizer, BulkSettings, ClientConfig, ExportOrchestrator, ExportParameters, ReqwestTransport,
    Transport,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cli::ParamArgs;

/// Everything a command needs to talk to the export server.
pub struct BulkContext {
    pub settings: BulkSettings,
    pub config: Arc<ClientConfig>,
    pub export_url: Option<String>,
    transport: Arc<dyn Transport>,
}

impl BulkContext {
    pub fn new(settings: BulkSettings, export_url: Option<String>) -> Result<Self> {
        let config = settings
            .client_config()
            .context("Invalid client settings")?;
        let transport = ReqwestTransport::with_timeout(settings.client.request_timeout)
            .context("Failed to create HTTP client")?;
        Ok(Self {
            settings,
            config: Arc::new(config),
            export_url,
            transport: Arc::new(transport),
        })
    }

    pub fn authorizer(&self) -> Authorizer {
        Authorizer::new(Arc::clone(&self.transport))
    }

    pub fn export_url(&self) -> Result<&str> {
        self.export_url
            .as_deref()
            .context("No export URL configured. Use --export-url or set export.url")
    }

    /// Fresh orchestrator, i.e. a new export session with its own token.
    pub fn orchestrator(&self, params: &ParamArgs) -> Result<ExportOrchestrator> {
        let orchestrator = ExportOrchestrator::new(
            Arc::clone(&self.config),
            self.export_url()?,
            Arc::clone(&self.transport),
        )?
        .with_options(self.settings.export_options())
        .with_parameters(&to_parameters(params)?)?;
        Ok(orchestrator)
    }
}

pub fn to_parameters(args: &ParamArgs) -> Result<ExportParameters> {
    let mut params = ExportParameters::new();
    for resource_type in &args.types {
        params = params.resource_type(resource_type.trim());
    }
    for filter in &args.type_filter {
        params = params.type_filter(filter.as_str());
    }
    if let Some(format) = &args.output_format {
        params = params.output_format(format.as_str());
    }
    if let Some(since) = &args.since {
        let since = OffsetDateTime::parse(since, &Rfc3339)
            .with_context(|| format!("--since must be an RFC 3339 instant, got {since}"))?;
        params = params.since(since);
    }
    Ok(params)
}
