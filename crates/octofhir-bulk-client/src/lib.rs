//! # octofhir-bulk-client
//!
//! Conformance client for FHIR Bulk Data Access (`$export`) servers.
//!
//! This crate provides:
//! - SMART Backend Services authorization (client credentials with a signed
//!   JWT client assertion)
//! - The export state machine: kick-off, polling, download and cancel
//! - Conformance expectations on the server's responses
//!
//! ## Modules
//!
//! - [`auth`] - Private keys, client assertions and the token exchange
//! - [`export`] - Export session, orchestrator, manifest and parameters
//! - [`http`] - Transport contract and the `reqwest` transport
//! - [`request`] - Deep-merge request builder
//! - [`expect`] - Response expectations
//! - [`log`] - Request/response logging
//! - [`config`] - Client configuration and settings loading
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use octofhir_bulk_client::{ClientConfig, ExportOrchestrator, ReqwestTransport};
//! use serde_json::Value;
//!
//! # async fn run() -> octofhir_bulk_client::BulkResult<()> {
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let mut export = ExportOrchestrator::new(
//!     Arc::new(ClientConfig::open()),
//!     "https://fhir.example.com/$export",
//!     transport,
//! )?;
//! export.kick_off(Value::Null).await?;
//! export.expect_successful_kick_off()?;
//! let manifest = {
//!     export.wait_for_export().await?;
//!     export.manifest()?
//! };
//! println!("{} file(s)", manifest.output.len());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod expect;
pub mod export;
pub mod http;
pub mod log;
pub mod request;

pub use auth::{AccessToken, Authorizer, PrivateKey, SigningAlgorithm};
pub use config::{BulkSettings, ClientConfig, ExportOptions, load_settings};
pub use error::BulkError;
pub use expect::AssertionFailure;
pub use export::{ExportManifest, ExportOrchestrator, ExportParameters, ExportState};
pub use http::{ReqwestTransport, RequestDescriptor, ResponseDescriptor, Transport, TransportError};
pub use log::{ExchangeLog, MemoryExchangeLog, TracingExchangeLog};

/// Type alias for bulk client results.
pub type BulkResult<T> = Result<T, BulkError>;
