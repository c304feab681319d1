//! JSONL file exporter

use crate::{EventExporter, EventRecord, ExportError, ExportResult};
use async_trait::async_trait;
use hsi_core::config::JsonlExportConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// JSONL exporter configuration
#[derive(Debug, Clone)]
pub struct JsonlExporterConfig {
    /// Output file path
    pub path: PathBuf,

    /// Whether to append to existing file
    pub append: bool,

    /// Pretty print JSON (not recommended for large files)
    pub pretty: bool,

    /// Flush after each write
    pub flush_each: bool,
}

impl Default for JsonlExporterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/hsi-events.jsonl"),
            append: true,
            pretty: false,
            flush_each: true,
        }
    }
}

impl From<&JsonlExportConfig> for JsonlExporterConfig {
    fn from(config: &JsonlExportConfig) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            append: config.append,
            pretty: config.pretty,
            flush_each: config.flush_each,
        }
    }
}

/// JSONL file exporter
pub struct JsonlExporter {
    config: JsonlExporterConfig,
    writer: Option<Mutex<BufWriter<File>>>,
    events_written: AtomicU64,
}

impl JsonlExporter {
    pub fn new(config: JsonlExporterConfig) -> Self {
        Self {
            config,
            writer: None,
            events_written: AtomicU64::new(0),
        }
    }

    /// Creates the exporter and opens its file
    pub fn open(config: JsonlExporterConfig) -> ExportResult<Self> {
        let mut exporter = Self::new(config);
        exporter.ensure_writer()?;
        Ok(exporter)
    }

    fn ensure_writer(&mut self) -> ExportResult<()> {
        if self.writer.is_none() {
            if let Some(parent) = self.config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = if self.config.append {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.config.path)?
            } else {
                File::create(&self.config.path)?
            };

            self.writer = Some(Mutex::new(BufWriter::new(file)));
            info!("JSONL exporter writing to: {:?}", self.config.path);
        }
        Ok(())
    }

    pub fn events_written(&self) -> u64 {
        self.events_written.load(Ordering::Relaxed)
    }

    /// Flushes and closes the file
    pub fn shutdown(&mut self) -> ExportResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.into_inner().flush()?;
        }
        Ok(())
    }

    fn write_record(&self, record: &EventRecord) -> ExportResult<()> {
        let json = if self.config.pretty {
            serde_json::to_string_pretty(record)?
        } else {
            serde_json::to_string(record)?
        };

        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| ExportError::NotOpen(self.config.path.display().to_string()))?;
        let mut w = writer.lock();
        writeln!(w, "{}", json)?;
        if self.config.flush_each {
            w.flush()?;
        }

        self.events_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl EventExporter for JsonlExporter {
    fn name(&self) -> &str {
        "jsonl-exporter"
    }

    async fn export(&self, record: &EventRecord) -> ExportResult<()> {
        self.write_record(record)
    }

    async fn flush(&self) -> ExportResult<()> {
        if let Some(writer) = &self.writer {
            writer.lock().flush()?;
        }
        Ok(())
    }
}
