//! Bulk Data `$export` flow.

pub mod manifest;
pub mod orchestrator;
pub mod params;
pub mod session;

pub use manifest::{ExportManifest, ManifestEntry, output_url};
pub use orchestrator::ExportOrchestrator;
pub use params::ExportParameters;
pub use session::{Exchange, ExportSession, ExportState, StatusTarget};
