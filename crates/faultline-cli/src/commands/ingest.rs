use super::{load_config, occurrence_counter};
use clap::Args;
use colored::Colorize;
use faultline_database::establish_connection;
use faultline_error_tracking::{ErrorIngestionService, IngestWorker};
use faultline_queue::{IngestMessage, IngestQueue, MessageMeta, TracingDeadLetterSink};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Args)]
pub struct IngestCommand {
    /// Database connection URL
    #[arg(long, env = "FAULTLINE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Project the events belong to
    #[arg(long)]
    pub project_id: i32,

    /// File with one JSON event payload per line, `-` reads stdin
    #[arg(long, default_value = "-")]
    pub file: PathBuf,

    /// Message priority, 1-10 (higher is processed first)
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub priority: u8,
}

/// Lines read from the input
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct FeedSummary {
    pub queued: u64,
    pub invalid: u64,
}

impl IngestCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.ingest())
    }

    async fn ingest(self) -> anyhow::Result<()> {
        let config = load_config(self.database_url.clone());
        let db = establish_connection(&config.database).await?;
        let counter = occurrence_counter(&config).await;

        let ingestion = Arc::new(ErrorIngestionService::with_counter(db, counter));
        let (queue, receiver) = IngestQueue::create_channel(config.ingest.workers * 64);
        let worker = Arc::new(IngestWorker::new(
            ingestion,
            &queue,
            receiver,
            Arc::new(TracingDeadLetterSink),
        ));
        let workers = worker.start(config.ingest.workers, CancellationToken::new());

        let summary = if self.file.as_os_str() == "-" {
            feed(BufReader::new(tokio::io::stdin()), &queue, self.project_id, self.priority).await?
        } else {
            let file = tokio::fs::File::open(&self.file).await?;
            feed(BufReader::new(file), &queue, self.project_id, self.priority).await?
        };

        // Workers exit once the last producer is gone and the queue is empty
        drop(queue);
        for handle in workers {
            handle.await?;
        }

        info!(
            project_id = self.project_id,
            queued = summary.queued,
            invalid = summary.invalid,
            "Ingestion finished"
        );
        println!(
            "{} Processed {} events ({} invalid lines skipped)",
            "✓".bright_green(),
            summary.queued.to_string().bright_white(),
            summary.invalid
        );
        Ok(())
    }
}

/// Queue every JSON object line of `reader` as a store-event message
pub(crate) async fn feed<R>(
    reader: R,
    queue: &IngestQueue,
    project_id: i32,
    priority: u8,
) -> anyhow::Result<FeedSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = FeedSummary::default();
    let mut lines = reader.lines();
    let mut line_no: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let payload = match serde_json::from_str::<Value>(&line) {
            Ok(payload @ Value::Object(_)) => payload,
            Ok(_) => {
                warn!(line = line_no, "Skipping line, event payload must be a JSON object");
                summary.invalid += 1;
                continue;
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping line with invalid JSON");
                summary.invalid += 1;
                continue;
            }
        };

        let message =
            IngestMessage::store_event(project_id, payload, MessageMeta::new(priority, None));
        queue.send(message).await?;
        summary.queued += 1;
    }

    debug!(lines = line_no, "Input exhausted");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_skips_blank_and_invalid_lines() {
        let input = b"{\"message\": \"boom\"}\n\nnot json\n[1, 2]\n{\"message\": \"again\"}\n";
        let (queue, mut receiver) = IngestQueue::create_channel(8);

        let summary = feed(&input[..], &queue, 3, 7).await.unwrap();
        assert_eq!(summary, FeedSummary { queued: 2, invalid: 2 });

        drop(queue);
        let mut received = Vec::new();
        while let Some(message) = receiver.recv().await {
            received.push(message);
        }
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|m| m.project_id() == 3));
        assert!(received.iter().all(|m| m.meta().priority == 7));
    }
}
