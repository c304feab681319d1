//! Inspection workers
//!
//! Chunks are sharded by flow key so one worker sees every chunk of a flow,
//! in order. Each worker owns its own inspector and flow table.

use crate::flow_table::{FlowKey, FlowTable};
use anyhow::Context;
use hsi_core::{
    Chunk, InspectSettings, Inspector, SectionBuffer, SharedMetrics, SourceId, TestOutput,
};
use hsi_export::{EventExporter, EventRecord};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Work for one worker
#[derive(Debug)]
pub enum WorkItem {
    /// Reassembled bytes of one flow direction
    Data {
        key: FlowKey,
        /// Test case the bytes belong to, when replaying
        test: Option<i64>,
        source: SourceId,
        data: Vec<u8>,
        end_of_stream: bool,
    },
    /// The flow is gone; drop its state
    Release(FlowKey),
}

impl WorkItem {
    fn key(&self) -> &FlowKey {
        match self {
            WorkItem::Data { key, .. } | WorkItem::Release(key) => key,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    /// Items buffered per worker before `submit` waits
    pub queue_depth: usize,
    pub settings: InspectSettings,
    /// Per-test-case dump file prefix; only honored with a single worker
    pub test_output: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 1024,
            settings: InspectSettings::default(),
            test_output: None,
        }
    }
}

/// What the workers did, summed at shutdown
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub chunks: u64,
    pub events: u64,
    pub events_exported: u64,
    pub flows_released: u64,
    pub flows_failed: u64,
}

impl WorkerReport {
    fn merge(&mut self, other: WorkerReport) {
        self.chunks += other.chunks;
        self.events += other.events;
        self.events_exported += other.events_exported;
        self.flows_released += other.flows_released;
        self.flows_failed += other.flows_failed;
    }
}

pub struct WorkerPool {
    senders: Vec<mpsc::Sender<WorkItem>>,
    handles: Vec<JoinHandle<anyhow::Result<WorkerReport>>>,
}

impl WorkerPool {
    pub fn spawn(
        config: WorkerConfig,
        metrics: SharedMetrics,
        exporter: Option<Arc<dyn EventExporter>>,
    ) -> Self {
        let workers = config.workers.max(1);
        if config.test_output.is_some() && workers > 1 {
            warn!(workers, "Test output needs a single worker, ignoring it");
        }

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
            let mut inspector = Inspector::new(config.settings.clone()).with_metrics(metrics.clone());
            if workers == 1 {
                if let Some(prefix) = &config.test_output {
                    inspector = inspector.with_test_output(TestOutput::new(prefix.clone()));
                }
            }
            handles.push(tokio::spawn(run_worker(id, rx, inspector, exporter.clone())));
            senders.push(tx);
        }
        info!(workers, "Inspection workers started");

        Self { senders, handles }
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    pub async fn submit(&self, item: WorkItem) -> anyhow::Result<()> {
        let shard = item.key().shard(self.senders.len());
        self.senders[shard]
            .send(item)
            .await
            .map_err(|_| anyhow::anyhow!("Worker {} stopped", shard))
    }

    /// Closes the queues and waits for every worker to drain
    pub async fn shutdown(self) -> anyhow::Result<WorkerReport> {
        drop(self.senders);
        let mut report = WorkerReport::default();
        for handle in self.handles {
            report.merge(handle.await??);
        }
        info!(?report, "Inspection workers stopped");
        Ok(report)
    }
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<WorkItem>,
    mut inspector: Inspector,
    exporter: Option<Arc<dyn EventExporter>>,
) -> anyhow::Result<WorkerReport> {
    let mut table = FlowTable::new();
    let mut report = WorkerReport::default();

    while let Some(item) = rx.recv().await {
        let (key, test, source, data, end_of_stream) = match item {
            WorkItem::Release(key) => {
                if table.remove(&key) {
                    report.flows_released += 1;
                }
                continue;
            }
            WorkItem::Data {
                key,
                test,
                source,
                data,
                end_of_stream,
            } => (key, test, source, data, end_of_stream),
        };

        if let (Some(number), Some(recorder)) = (test, inspector.recorder_mut()) {
            recorder.set_test_number(number);
        }

        report.chunks += 1;
        let chunk = Chunk {
            source,
            buffer: SectionBuffer::from(data),
            end_of_stream,
        };
        match inspector.process(chunk, table.session(key)) {
            Ok(disposition) => trace!(worker = id, flow = %key, %disposition, "Chunk processed"),
            Err(e) if e.is_diagnostic() => {
                return Err(e).with_context(|| format!("worker {} flow {}", id, key));
            }
            Err(e) => {
                warn!(worker = id, flow = %key, error = %e, "Dropping flow state");
                table.remove(&key);
                report.flows_failed += 1;
            }
        }

        for event in inspector.take_events() {
            report.events += 1;
            debug!(worker = id, flow = %key, code = %event.code, "Anomaly event");
            if let Some(exporter) = &exporter {
                let record = EventRecord::new(key.to_string(), &event).with_test(test);
                match exporter.export(&record).await {
                    Ok(()) => report.events_exported += 1,
                    Err(e) => warn!("Error exporting to {}: {}", exporter.name(), e),
                }
            }
        }

        if end_of_stream && table.release_if_finished(&key) {
            report.flows_released += 1;
        }
    }

    if let Some(recorder) = inspector.recorder_mut() {
        recorder.finish()?;
    }
    if let Some(exporter) = &exporter {
        if let Err(e) = exporter.flush().await {
            warn!("Error flushing {}: {}", exporter.name(), e);
        }
    }
    debug!(worker = id, flows = table.len(), "Worker drained");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsi_core::create_metrics;
    use std::sync::atomic::Ordering;

    fn data(key: FlowKey, source: SourceId, bytes: &[u8], end_of_stream: bool) -> WorkItem {
        WorkItem::Data {
            key,
            test: None,
            source,
            data: bytes.to_vec(),
            end_of_stream,
        }
    }

    #[tokio::test]
    async fn test_pool_processes_flows() {
        let metrics = create_metrics();
        let pool = WorkerPool::spawn(
            WorkerConfig {
                workers: 3,
                ..Default::default()
            },
            metrics.clone(),
            None,
        );
        assert_eq!(pool.workers(), 3);

        for seq in 0..4 {
            let key = FlowKey::synthetic(seq);
            pool.submit(data(key, SourceId::Client, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n", true))
                .await
                .unwrap();
            pool.submit(data(key, SourceId::Server, b"HTTP/1.1 204 No Content\r\n\r\n", true))
                .await
                .unwrap();
        }

        let report = pool.shutdown().await.unwrap();
        assert_eq!(report.chunks, 8);
        assert_eq!(report.events, 0);
        assert_eq!(report.flows_released, 4);
        assert_eq!(metrics.flows_created.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_pool_counts_events() {
        let pool = WorkerPool::spawn(WorkerConfig::default(), create_metrics(), None);
        let key = FlowKey::synthetic(9);
        pool.submit(data(
            key,
            SourceId::Client,
            b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 1\r\n\r\nx",
            false,
        ))
        .await
        .unwrap();
        pool.submit(WorkItem::Release(key)).await.unwrap();

        let report = pool.shutdown().await.unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(report.flows_released, 1);
    }
}
