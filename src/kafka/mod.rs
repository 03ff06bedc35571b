// Broker verification engine: connectivity, produce, and bounded consume
// checks against the shared Kafka handles.

mod consume;

use async_trait::async_trait;
use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::FutureRecord;
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::health::{DependencyCheck, ProbeError, ProbeResults};
use crate::registry::ConnectionRegistry;
use consume::{race_consumption, run_consume_loop, ConsumeEvents, ConsumeOutcome, SignalingHandler};

const PRODUCE_PAYLOAD: &str = "produce within the health check";
const TOPIC_POLL_RETRIES: u32 = 5;
const TOPIC_POLL_DELAY: Duration = Duration::from_secs(2);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(5);
const CONSUME_DEADLINE: Duration = Duration::from_secs(10);
const CLEANUP_GRACE: Duration = Duration::from_secs(5);

/// Point-in-time view of the cluster, extracted from a metadata call.
struct ClusterSnapshot {
    brokers: Vec<String>,
    topics: Vec<String>,
}

/// Verifies the message broker round trip: topology through the admin handle,
/// a durable produce, and a deadline-bounded consume.
pub struct BrokerVerifier {
    registry: Arc<ConnectionRegistry>,
    topic: String,
}

impl BrokerVerifier {
    pub fn new(registry: Arc<ConnectionRegistry>, topic: String) -> Self {
        Self { registry, topic }
    }

    /// Topology check: succeeds iff the admin metadata call returns a
    /// non-empty broker set.
    pub async fn check_connectivity(&self) -> bool {
        let snapshot = match self.cluster_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to describe Kafka cluster: {}", e);
                return false;
            }
        };
        if snapshot.brokers.is_empty() {
            error!("Kafka metadata call returned an empty broker set");
            return false;
        }
        info!(
            "KafkaConnection : Kafka health check successful: found {} broker(s)",
            snapshot.brokers.len()
        );
        true
    }

    /// Sends one synthetic message with acks=all and the client-side retry
    /// budget configured on the shared producer.
    pub async fn check_produce(&self) -> bool {
        let producer = match self.registry.broker_producer().await {
            Ok(producer) => producer,
            Err(e) => {
                error!("{}", e);
                return false;
            }
        };

        let record = FutureRecord::<(), str>::to(&self.topic).payload(PRODUCE_PAYLOAD);
        match producer.send(record, Timeout::After(PRODUCE_TIMEOUT)).await {
            Ok((partition, offset)) => {
                info!(
                    "KafkaProduce : Message sent to partition {} with offset {}",
                    partition, offset
                );
                true
            }
            Err((e, _)) => {
                error!("Error sending message to Kafka topic {}: {}", self.topic, e);
                false
            }
        }
    }

    /// Bounded consume check: waits for the topic to exist, then races an
    /// independent consumption loop against the deadline. Every exit path
    /// cancels the loop and reclaims its task.
    pub async fn check_consume(&self) -> bool {
        match self.consume_inner().await {
            Ok(()) => {
                info!("Consumer received at least one message");
                true
            }
            Err(e @ (ProbeError::TopicNotFound { .. } | ProbeError::TimedOut)) => {
                warn!("{}", e);
                false
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    async fn consume_inner(&self) -> Result<(), ProbeError> {
        let consumer = self.registry.broker_consumer().await?;

        // Concurrent consume checks over the one shared consumer group handle
        // are undefined behavior upstream; serialize them here.
        let _slot = self.registry.consume_guard().lock().await;

        self.await_topic().await?;

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let (received_tx, received_rx) = mpsc::channel(1);
        let events: Arc<dyn ConsumeEvents> = Arc::new(SignalingHandler::new(ready_tx, received_tx));

        let mut loop_task = tokio::spawn(run_consume_loop(
            consumer,
            self.topic.clone(),
            events,
            cancel.child_token(),
        ));

        let outcome =
            race_consumption(ready_rx, received_rx, &mut loop_task, CONSUME_DEADLINE).await;

        // Tear the attempt down no matter which branch of the race fired, so
        // no task or consumer-group membership outlives the call.
        cancel.cancel();
        if !loop_task.is_finished()
            && tokio::time::timeout(CLEANUP_GRACE, &mut loop_task).await.is_err()
        {
            warn!("Consume loop did not stop within the grace period, aborting it");
            loop_task.abort();
        }

        match outcome {
            ConsumeOutcome::Received => Ok(()),
            ConsumeOutcome::TimedOut => Err(ProbeError::TimedOut),
            ConsumeOutcome::LoopFailed(msg) => Err(ProbeError::LoopError(msg)),
        }
    }

    async fn await_topic(&self) -> Result<(), ProbeError> {
        poll_for_topic(&self.topic, || self.topic_exists()).await
    }

    async fn topic_exists(&self) -> Result<bool, ProbeError> {
        let snapshot = self.cluster_snapshot().await?;
        Ok(snapshot.topics.iter().any(|name| name == &self.topic))
    }

    async fn cluster_snapshot(&self) -> Result<ClusterSnapshot, ProbeError> {
        let admin = self.registry.broker_admin().await?;
        fetch_cluster_snapshot(admin).await
    }
}

/// Existence gate: one initial check plus a fixed retry budget with a fixed
/// inter-attempt delay, so a just-created topic has time to propagate before
/// we subscribe. Takes the topic lister as a closure so the budget arithmetic
/// is testable without a broker.
async fn poll_for_topic<F, Fut>(topic: &str, mut list: F) -> Result<(), ProbeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool, ProbeError>>,
{
    if list().await? {
        return Ok(());
    }
    warn!(
        "Topic '{}' does not exist yet. Waiting for it to be created.",
        topic
    );
    for attempt in 1..=TOPIC_POLL_RETRIES {
        tokio::time::sleep(TOPIC_POLL_DELAY).await;
        if list().await? {
            info!("Topic '{}' found after {} retries.", topic, attempt);
            return Ok(());
        }
    }
    Err(ProbeError::TopicNotFound {
        topic: topic.to_string(),
        attempts: TOPIC_POLL_RETRIES,
    })
}

/// The librdkafka metadata call blocks its thread for up to the timeout, so
/// it runs on the blocking pool and only plain data crosses back.
async fn fetch_cluster_snapshot(
    admin: Arc<AdminClient<DefaultClientContext>>,
) -> Result<ClusterSnapshot, ProbeError> {
    tokio::task::spawn_blocking(move || {
        let metadata = admin
            .inner()
            .fetch_metadata(None, METADATA_TIMEOUT)
            .map_err(|e| ProbeError::ProbeFailed(e.to_string()))?;
        Ok(ClusterSnapshot {
            brokers: metadata
                .brokers()
                .iter()
                .map(|b| format!("{}:{}", b.host(), b.port()))
                .collect(),
            topics: metadata
                .topics()
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
        })
    })
    .await
    .map_err(|e| ProbeError::ProbeFailed(format!("metadata task failed: {}", e)))?
}

#[async_trait]
impl DependencyCheck for BrokerVerifier {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn check(&self) -> ProbeResults {
        ProbeResults::from([
            ("connection", self.check_connectivity().await),
            ("produce", self.check_produce().await),
            ("consume", self.check_consume().await),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_topic_gate_gives_up_after_exhausting_the_retry_budget() {
        let calls = AtomicUsize::new(0);
        let start = tokio::time::Instant::now();

        let result = poll_for_topic("healthcheck", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        })
        .await;

        match result {
            Err(ProbeError::TopicNotFound { topic, attempts }) => {
                assert_eq!(topic, "healthcheck");
                assert_eq!(attempts, TOPIC_POLL_RETRIES);
            }
            other => panic!("expected TopicNotFound, got {:?}", other),
        }
        // One initial check plus five retries, two seconds apart.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(start.elapsed(), TOPIC_POLL_DELAY * TOPIC_POLL_RETRIES);
    }

    #[tokio::test(start_paused = true)]
    async fn test_topic_gate_proceeds_when_topic_appears_mid_budget() {
        let calls = AtomicUsize::new(0);

        let result = poll_for_topic("healthcheck", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(attempt == 3) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_topic_gate_passes_immediately_when_topic_exists() {
        let calls = AtomicUsize::new(0);
        let start = tokio::time::Instant::now();

        let result = poll_for_topic("healthcheck", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(true) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_topic_gate_surfaces_lister_errors() {
        let result = poll_for_topic("healthcheck", || async {
            Err(ProbeError::ProbeFailed("metadata call failed".to_string()))
        })
        .await;

        match result {
            Err(ProbeError::ProbeFailed(msg)) => assert!(msg.contains("metadata call failed")),
            other => panic!("expected ProbeFailed, got {:?}", other),
        }
    }
}
