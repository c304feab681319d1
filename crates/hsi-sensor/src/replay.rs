//! Feeding recorded test traffic through the workers

use crate::flow_table::FlowKey;
use crate::workers::{WorkItem, WorkerPool};
use hsi_core::{TestInput, TestStep};
use tracing::debug;

/// Counts from one replay run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub tests: u64,
    pub chunks: u64,
    pub octets: u64,
}

/// Submits every step of `input`. Each test case runs on a fresh flow.
pub async fn replay(input: TestInput, pool: &WorkerPool) -> anyhow::Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    let mut seq = 0u32;
    let mut key = FlowKey::synthetic(seq);
    let mut test = None;

    for step in input {
        match step {
            TestStep::Begin(number) => {
                pool.submit(WorkItem::Release(key)).await?;
                seq = seq.wrapping_add(1);
                key = FlowKey::synthetic(seq);
                test = Some(number);
                stats.tests += 1;
                debug!(test = number, flow = %key, "Starting test case");
            }
            TestStep::Chunk {
                source,
                data,
                end_of_stream,
            } => {
                stats.chunks += 1;
                stats.octets += data.len() as u64;
                pool.submit(WorkItem::Data {
                    key,
                    test,
                    source,
                    data,
                    end_of_stream,
                })
                .await?;
            }
        }
    }
    pool.submit(WorkItem::Release(key)).await?;

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::WorkerConfig;
    use hsi_core::create_metrics;
    use tempfile::TempDir;

    const SCRIPT: &str = "\
$test 1
GET /a HTTP/1.1
Host: example.com

$server
HTTP/1.1 200 OK
Content-Length: 5

hello\\
$test 2
$client
GET /b HTTP/1.1
Content-Length: 1
Content-Length: 2

";

    #[tokio::test]
    async fn test_replay_writes_per_test_files() {
        let dir = TempDir::new().unwrap();
        let prefix = format!("{}/nhttp_out_", dir.path().display());
        let pool = WorkerPool::spawn(
            WorkerConfig {
                workers: 1,
                test_output: Some(prefix.clone()),
                ..Default::default()
            },
            create_metrics(),
            None,
        );

        let stats = replay(TestInput::parse(SCRIPT).unwrap(), &pool).await.unwrap();
        let report = pool.shutdown().await.unwrap();

        assert_eq!(stats.tests, 2);
        assert_eq!(stats.chunks, 3);
        assert_eq!(report.chunks, 3);
        // MULTIPLE_CONTENT_LENGTH and CONFLICTING_CONTENT_LENGTH
        assert_eq!(report.events, 2);

        let first = std::fs::read_to_string(format!("{}1.txt", prefix)).unwrap();
        assert!(first.contains("HTTP message request:"));
        assert!(first.contains("HTTP message body:"));
        let second = std::fs::read_to_string(format!("{}2.txt", prefix)).unwrap();
        assert!(second.contains("HTTP message header:"));
        assert!(!second.contains("HTTP message body:"));
    }
}
