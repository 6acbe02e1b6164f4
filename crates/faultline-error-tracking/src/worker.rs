//! Ingress worker: drains the priority queue into the ingestion service.

use crate::services::{ErrorIngestionService, ErrorTrackingError};
use async_trait::async_trait;
use faultline_queue::{
    DeadLetterReason, DeadLetterSink, IngestMessage, IngestQueue, IngestReceiver,
    WeakIngestQueue,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processes one raw payload for a project
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, project_id: i32, payload: &Value) -> Result<(), ErrorTrackingError>;
}

#[async_trait]
impl EventProcessor for ErrorIngestionService {
    async fn process(&self, project_id: i32, payload: &Value) -> Result<(), ErrorTrackingError> {
        self.ingest(project_id, payload).await.map(|_| ())
    }
}

/// Shared by every worker task; the receiver is polled by one task at a time
/// so strict priority holds across the pool.
pub struct IngestWorker {
    processor: Arc<dyn EventProcessor>,
    receiver: Mutex<IngestReceiver>,
    requeue: WeakIngestQueue,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl IngestWorker {
    pub fn new(
        processor: Arc<dyn EventProcessor>,
        queue: &IngestQueue,
        receiver: IngestReceiver,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            processor,
            receiver: Mutex::new(receiver),
            requeue: queue.downgrade(),
            dead_letters,
        }
    }

    /// Spawn `workers` tasks that consume until the token is cancelled or
    /// every producer is gone. A message being handled when the token fires
    /// is finished first.
    pub fn start(self: Arc<Self>, workers: usize, token: CancellationToken) -> Vec<JoinHandle<()>> {
        let workers = workers.max(1);
        info!(workers, "Starting ingress workers");
        (0..workers)
            .map(|worker_id| {
                let worker = self.clone();
                let token = token.clone();
                tokio::spawn(async move { worker.run(worker_id, token).await })
            })
            .collect()
    }

    async fn run(&self, worker_id: usize, token: CancellationToken) {
        loop {
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(worker_id, "Ingress worker cancelled");
                    break;
                }
                message = async { self.receiver.lock().await.recv().await } => message,
            };

            match message {
                Some(message) => self.handle(message).await,
                None => {
                    debug!(worker_id, "Ingress queue closed");
                    break;
                }
            }
        }
    }

    /// Process one message, requeueing or dead-lettering on failure
    pub async fn handle(&self, message: IngestMessage) {
        if message.meta().is_expired() {
            self.dead_letters
                .dead_letter(message, DeadLetterReason::Expired, "deadline passed")
                .await;
            return;
        }

        match message {
            IngestMessage::StoreEvent(store) => {
                let project_id = store.project_id;
                if let Err(e) = self.processor.process(project_id, &store.payload).await {
                    self.on_failure(IngestMessage::StoreEvent(store), e).await;
                }
            }
            IngestMessage::Envelope(envelope) => {
                let project_id = envelope.project_id;
                let mut transient = Vec::new();
                let mut last_error = None;

                for payload in envelope.payloads {
                    match self.processor.process(project_id, &payload).await {
                        Ok(()) => {}
                        Err(e) if e.is_retryable() => {
                            transient.push(payload);
                            last_error = Some(e);
                        }
                        Err(e) => {
                            let single =
                                IngestMessage::envelope(project_id, vec![payload], envelope.meta.clone());
                            self.on_failure(single, e).await;
                        }
                    }
                }

                // Only the payloads that failed transiently go around again
                if let Some(e) = last_error {
                    let retry = IngestMessage::envelope(project_id, transient, envelope.meta);
                    self.on_failure(retry, e).await;
                }
            }
        }
    }

    async fn on_failure(&self, message: IngestMessage, error: ErrorTrackingError) {
        if !error.is_retryable() {
            let reason = match error {
                ErrorTrackingError::Normalize(_) => DeadLetterReason::Malformed,
                _ => DeadLetterReason::Rejected,
            };
            self.dead_letters
                .dead_letter(message, reason, &error.to_string())
                .await;
            return;
        }

        if !message.meta().can_retry() {
            self.dead_letters
                .dead_letter(message, DeadLetterReason::RetriesExhausted, &error.to_string())
                .await;
            return;
        }

        // Never wait for capacity here: every consumer blocking on a full
        // band would stall the pool.
        let Some(queue) = self.requeue.upgrade() else {
            self.dead_letters
                .dead_letter(
                    message,
                    DeadLetterReason::RetriesExhausted,
                    "queue shut down before requeue",
                )
                .await;
            return;
        };

        let retry_count = message.meta().retry_count + 1;
        match queue.try_requeue(message) {
            Ok(()) => {
                warn!(retry_count, "Requeued ingress message after transient failure: {}", error);
            }
            Err((queue_error, message)) => {
                error!("Failed to requeue ingress message: {}", queue_error);
                self.dead_letters
                    .dead_letter(
                        message,
                        DeadLetterReason::RetriesExhausted,
                        &format!("{}; requeue failed: {}", error, queue_error),
                    )
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::NormalizeError;
    use faultline_queue::MessageMeta;
    use sea_orm::DbErr;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Behaves according to the payload's `event_id`
    #[derive(Default)]
    struct MockProcessor {
        calls: std::sync::Mutex<Vec<String>>,
        /// fail this many times before succeeding, per event id
        flaky: std::sync::Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl EventProcessor for MockProcessor {
        async fn process(&self, _project_id: i32, payload: &Value) -> Result<(), ErrorTrackingError> {
            let id = payload["event_id"].as_str().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(id.clone());
            match id.as_str() {
                "malformed" => Err(NormalizeError::MissingEventId.into()),
                "rejected" => Err(ErrorTrackingError::ProjectNotFound(1)),
                "transient" => Err(DbErr::Custom("connection reset".to_string()).into()),
                _ => {
                    let mut flaky = self.flaky.lock().unwrap();
                    match flaky.get_mut(&id) {
                        Some(remaining) if *remaining > 0 => {
                            *remaining -= 1;
                            Err(DbErr::Custom("connection reset".to_string()).into())
                        }
                        _ => Ok(()),
                    }
                }
            }
        }
    }

    #[derive(Default)]
    struct MockSink {
        letters: std::sync::Mutex<Vec<(IngestMessage, DeadLetterReason)>>,
    }

    #[async_trait]
    impl DeadLetterSink for MockSink {
        async fn dead_letter(&self, message: IngestMessage, reason: DeadLetterReason, _detail: &str) {
            self.letters.lock().unwrap().push((message, reason));
        }
    }

    impl MockSink {
        fn reasons(&self) -> Vec<DeadLetterReason> {
            self.letters.lock().unwrap().iter().map(|(_, r)| *r).collect()
        }
    }

    fn store(id: &str, meta: MessageMeta) -> IngestMessage {
        IngestMessage::store_event(1, json!({ "event_id": id }), meta)
    }

    fn setup() -> (Arc<MockProcessor>, Arc<MockSink>, IngestQueue, IngestWorker) {
        let processor = Arc::new(MockProcessor::default());
        let sink = Arc::new(MockSink::default());
        let (queue, receiver) = IngestQueue::create_channel(16);
        let worker = IngestWorker::new(processor.clone(), &queue, receiver, sink.clone());
        (processor, sink, queue, worker)
    }

    #[tokio::test]
    async fn test_expired_message_is_dead_lettered_unprocessed() {
        let (processor, sink, _queue, worker) = setup();
        let mut meta = MessageMeta::new(5, None);
        meta.deadline = 1;

        worker.handle(store("ok", meta)).await;

        assert!(processor.calls.lock().unwrap().is_empty());
        assert_eq!(sink.reasons(), vec![DeadLetterReason::Expired]);
    }

    #[tokio::test]
    async fn test_malformed_and_rejected_are_not_retried() {
        let (_processor, sink, _queue, worker) = setup();

        worker.handle(store("malformed", MessageMeta::new(5, None))).await;
        worker.handle(store("rejected", MessageMeta::new(5, None))).await;

        assert_eq!(
            sink.reasons(),
            vec![DeadLetterReason::Malformed, DeadLetterReason::Rejected]
        );
        let letters = sink.letters.lock().unwrap();
        assert!(letters.iter().all(|(m, _)| m.meta().retry_count == 0));
    }

    #[tokio::test]
    async fn test_transient_failure_is_requeued_until_exhausted() {
        let (processor, sink, _queue, worker) = setup();
        let meta = MessageMeta::new(9, None).with_max_retries(2);

        worker.handle(store("transient", meta)).await;
        let retried = worker.receiver.lock().await.recv().await.unwrap();
        assert_eq!(retried.meta().retry_count, 1);
        assert!(sink.reasons().is_empty());

        worker.handle(retried).await;
        let retried = worker.receiver.lock().await.recv().await.unwrap();
        assert_eq!(retried.meta().retry_count, 2);

        worker.handle(retried).await;
        assert_eq!(sink.reasons(), vec![DeadLetterReason::RetriesExhausted]);
        assert_eq!(processor.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_envelope_requeues_only_transient_payloads() {
        let (processor, sink, _queue, worker) = setup();
        let envelope = IngestMessage::envelope(
            1,
            vec![
                json!({"event_id": "ok-1"}),
                json!({"event_id": "transient"}),
                json!({"event_id": "malformed"}),
                json!({"event_id": "ok-2"}),
            ],
            MessageMeta::new(5, None),
        );

        worker.handle(envelope).await;

        assert_eq!(
            *processor.calls.lock().unwrap(),
            vec!["ok-1", "transient", "malformed", "ok-2"]
        );
        assert_eq!(sink.reasons(), vec![DeadLetterReason::Malformed]);

        let retried = worker.receiver.lock().await.recv().await.unwrap();
        match retried {
            IngestMessage::Envelope(envelope) => {
                assert_eq!(envelope.payloads, vec![json!({"event_id": "transient"})]);
                assert_eq!(envelope.meta.retry_count, 1);
            }
            other => panic!("expected envelope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops_when_producers_leave() {
        let (processor, sink, queue, worker) = setup();
        processor
            .flaky
            .lock()
            .unwrap()
            .insert("flaky".to_string(), 1);

        for id in ["a", "b", "flaky", "c"] {
            queue.send(store(id, MessageMeta::new(5, None))).await.unwrap();
        }

        let handles = Arc::new(worker).start(3, CancellationToken::new());

        // wait until the flaky message has gone around twice, then close the queue
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if processor.calls.lock().unwrap().len() >= 5 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("workers did not drain the queue");
        drop(queue);

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("worker did not stop")
                .unwrap();
        }

        let mut calls = processor.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["a", "b", "c", "flaky", "flaky"]);
        assert!(sink.reasons().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_idle_workers() {
        let (_processor, _sink, _queue, worker) = setup();
        let token = CancellationToken::new();
        let handles = Arc::new(worker).start(2, token.clone());

        token.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("worker ignored cancellation")
                .unwrap();
        }
    }
}
