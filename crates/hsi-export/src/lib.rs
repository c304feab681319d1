//! Exporters for HSI anomaly events

pub mod jsonl;
pub mod record;

pub use jsonl::{JsonlExporter, JsonlExporterConfig};
pub use record::EventRecord;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by exporters
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Exporter not open: {0}")]
    NotOpen(String),
}

pub type ExportResult<T> = std::result::Result<T, ExportError>;

/// A destination for anomaly event records
#[async_trait]
pub trait EventExporter: Send + Sync {
    fn name(&self) -> &str;

    async fn export(&self, record: &EventRecord) -> ExportResult<()>;

    async fn flush(&self) -> ExportResult<()>;
}
