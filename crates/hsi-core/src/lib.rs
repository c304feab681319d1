//! HSI Core - HTTP/1.x section inspection
//!
//! This crate holds the protocol side of the inspector:
//!
//! - **Sections**: request line, status line, header block, body, chunk head
//!   and trailer parsing over borrowed chunk bytes
//! - **Flow**: per-direction state deciding which section comes next
//! - **Transactions**: request/response pairing for pipelined flows
//! - **Events**: infraction masks and the anomaly events derived from them
//! - **Inspector**: chunk dispatch and detection buffer output

pub mod buffers;
pub mod config;
pub mod error;
pub mod events;
pub mod field;
pub mod flow;
pub mod inspector;
pub mod metrics;
pub mod normalize;
pub mod section;
pub mod test_io;
pub mod transaction;

// Re-export commonly used types
pub use buffers::{BufferId, DetectionBuffers, InspectionBufferType};
pub use config::{ConfigLoader, HsiConfig, InspectSettings};
pub use error::{InspectError, InspectResult};
pub use events::{AnomalyEvent, EventCode, EventSink, Infractions};
pub use field::Field;
pub use flow::{FlowData, SectionType, SourceId};
pub use inspector::{
    Chunk, Disposition, FlowSession, Inspector, InspectorId, SectionBuffer, Session,
    HTTP_INSPECTOR_ID,
};
pub use metrics::{create_metrics, InspectMetrics, SharedMetrics};
pub use section::{HttpVersion, MessageSection, MethodId};
pub use test_io::{TestInput, TestOutput, TestStep};
pub use transaction::{RequestSummary, StatusSummary, Transaction, TransactionQueue};

/// Sensor version
pub const SENSOR_VERSION: &str = env!("CARGO_PKG_VERSION");
