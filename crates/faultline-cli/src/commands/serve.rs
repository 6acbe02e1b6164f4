use super::{load_config, occurrence_counter};
use clap::Args;
use faultline_database::establish_connection;
use faultline_error_tracking::{ErrorIngestionService, IngestWorker};
use faultline_notifications::{
    ChannelRegistry, DispatcherRepositories, NotificationDispatcher, Resilience,
};
use faultline_queue::{IngestQueue, TracingDeadLetterSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Args)]
pub struct ServeCommand {
    /// Database connection URL
    #[arg(long, env = "FAULTLINE_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Capacity of the ingress queue
    #[arg(long, default_value_t = 1024, env = "FAULTLINE_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Read JSON-encoded ingest messages from stdin, one per line
    #[arg(long)]
    pub ingest_stdin: bool,

    /// Seconds to wait for in-flight work after Ctrl+C
    #[arg(long, default_value_t = 30, env = "FAULTLINE_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout_secs: u64,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let result = rt.block_on(self.serve());
        // A pending stdin read sits on a blocking thread
        rt.shutdown_timeout(Duration::from_secs(1));
        result
    }

    async fn serve(self) -> anyhow::Result<()> {
        let config = load_config(self.database_url.clone());
        let db = establish_connection(&config.database).await?;
        let counter = occurrence_counter(&config).await;

        let ingestion = Arc::new(ErrorIngestionService::with_counter(db.clone(), counter));
        let (queue, receiver) = IngestQueue::create_channel(self.queue_capacity);
        let worker = Arc::new(IngestWorker::new(
            ingestion,
            &queue,
            receiver,
            Arc::new(TracingDeadLetterSink),
        ));

        let token = CancellationToken::new();
        let ingress = worker.start(config.ingest.workers, token.child_token());

        let dispatcher = NotificationDispatcher::new(
            DispatcherRepositories::sea_orm(db.clone(), config.dispatcher.claim_timeout),
            ChannelRegistry::with_defaults()?,
            Resilience::from_config(&config.resilience),
            config.dispatcher.clone(),
        );
        let dispatcher_handle = dispatcher.start_with_token(token.child_token());

        let feeder = self
            .ingest_stdin
            .then(|| tokio::spawn(feed_stdin(queue.clone(), token.child_token())));
        // Without a producer the workers would exit as soon as the feeder does
        let _producer = queue;

        info!(
            ingest_workers = config.ingest.workers,
            dispatcher_workers = config.dispatcher.workers,
            interval_secs = config.dispatcher.interval.as_secs(),
            "Faultline is running, press Ctrl+C to stop"
        );

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received, draining in-flight work");
        token.cancel();

        let timeout = Duration::from_secs(self.shutdown_timeout_secs);
        let drain = async {
            if let Err(e) = dispatcher_handle.stop().await {
                warn!(error = %e, "Dispatcher task ended abnormally");
            }
            join_all_logged("ingress worker", ingress).await;
            if let Some(feeder) = feeder {
                join_all_logged("stdin feeder", vec![feeder]).await;
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => info!("Shutdown complete"),
            Err(_) => warn!("Shutdown timeout exceeded ({:?}), forcing exit", timeout),
        }
        Ok(())
    }
}

async fn join_all_logged(what: &str, handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(task = what, error = %e, "Task ended abnormally");
        }
    }
}

/// Forward stdin lines into the ingress queue until EOF or cancellation
async fn feed_stdin(queue: IngestQueue, token: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut forwarded: u64 = 0;

    loop {
        let line = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match queue.send_json(&line).await {
                Ok(()) => forwarded += 1,
                Err(e) => warn!(error = %e, "Dropping unreadable ingest message"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
    debug!(forwarded, "Stdin feeder finished");
}
