// Consumption side of the broker verification engine: an independently
// scheduled loop that subscribes to the target topic, plus the race that
// decides the check against a cancellable deadline.

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Callbacks observed by the consumption loop.
pub(crate) trait ConsumeEvents: Send + Sync {
    /// Called once after the subscription is in place.
    fn on_setup(&self);
    /// Called for every delivered message, after it has been committed.
    fn on_message(&self, topic: &str, partition: i32, offset: i64);
    /// Called when the loop exits, on every path.
    fn on_cleanup(&self);
}

/// Forwards loop events onto the signaling channels of one consume attempt.
/// Channel capacity is 1 and sends never block, so at most one "received"
/// signal is ever buffered: the first message wins.
pub(crate) struct SignalingHandler {
    ready: mpsc::Sender<()>,
    received: mpsc::Sender<()>,
}

impl SignalingHandler {
    pub(crate) fn new(ready: mpsc::Sender<()>, received: mpsc::Sender<()>) -> Self {
        Self { ready, received }
    }
}

impl ConsumeEvents for SignalingHandler {
    fn on_setup(&self) {
        let _ = self.ready.try_send(());
    }

    fn on_message(&self, topic: &str, partition: i32, offset: i64) {
        debug!(
            "KafkaConsume : Message received: topic={} partition={} offset={}",
            topic, partition, offset
        );
        let _ = self.received.try_send(());
    }

    fn on_cleanup(&self) {}
}

/// Runs until cancelled or until the underlying receive fails. Every delivered
/// message is committed so it is not redelivered on the next check.
pub(crate) async fn run_consume_loop(
    consumer: Arc<StreamConsumer>,
    topic: String,
    events: Arc<dyn ConsumeEvents>,
    cancel: CancellationToken,
) -> Result<(), KafkaError> {
    if let Err(e) = consumer.subscribe(&[&topic]) {
        events.on_cleanup();
        return Err(e);
    }
    events.on_setup();

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            delivery = consumer.recv() => match delivery {
                Ok(message) => {
                    if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                        warn!("Failed to commit consumed message: {}", e);
                    }
                    events.on_message(message.topic(), message.partition(), message.offset());
                }
                Err(e) => break Err(e),
            },
        }
    };

    events.on_cleanup();
    consumer.unsubscribe();
    result
}

/// Outcome of one consumption race.
#[derive(Debug, PartialEq)]
pub(crate) enum ConsumeOutcome {
    Received,
    TimedOut,
    LoopFailed(String),
}

/// Races the consumption loop against the deadline. First completion wins:
/// a received signal, the elapsed deadline, or the loop exiting on its own
/// (which before any message can only mean a hard error).
///
/// The deadline is armed immediately and rearmed once when the subscription
/// reports ready, so consumer-group join time does not eat into the
/// message-wait window. Total wait is bounded by twice the deadline.
pub(crate) async fn race_consumption(
    mut ready: mpsc::Receiver<()>,
    mut received: mpsc::Receiver<()>,
    loop_task: &mut JoinHandle<Result<(), KafkaError>>,
    deadline: Duration,
) -> ConsumeOutcome {
    let timeout = tokio::time::sleep(deadline);
    tokio::pin!(timeout);
    let mut setup_seen = false;

    loop {
        tokio::select! {
            maybe_ready = ready.recv(), if !setup_seen => {
                setup_seen = true;
                if maybe_ready.is_some() {
                    debug!("Consumer session ready, rearming the deadline");
                    timeout.as_mut().reset(tokio::time::Instant::now() + deadline);
                }
            }
            Some(_) = received.recv() => return ConsumeOutcome::Received,
            _ = &mut timeout => return ConsumeOutcome::TimedOut,
            joined = &mut *loop_task => {
                return match joined {
                    Ok(Ok(())) => ConsumeOutcome::LoopFailed(
                        "consume loop exited before a decision".to_string(),
                    ),
                    Ok(Err(e)) => ConsumeOutcome::LoopFailed(e.to_string()),
                    Err(e) => ConsumeOutcome::LoopFailed(format!("consume task panicked: {}", e)),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn pending_loop(cancel: CancellationToken) -> JoinHandle<Result<(), KafkaError>> {
        tokio::spawn(async move {
            cancel.cancelled().await;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_race_resolves_when_message_received() {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let (received_tx, received_rx) = mpsc::channel(1);
        let mut task = pending_loop(cancel.clone());

        let handler = SignalingHandler::new(ready_tx, received_tx);
        handler.on_setup();
        handler.on_message("healthcheck", 0, 42);

        let start = Instant::now();
        let outcome =
            race_consumption(ready_rx, received_rx, &mut task, Duration::from_secs(30)).await;
        assert_eq!(outcome, ConsumeOutcome::Received);
        assert!(start.elapsed() < Duration::from_secs(1));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_race_times_out_without_message() {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let (_received_tx, received_rx) = mpsc::channel(1);
        let mut task = pending_loop(cancel.clone());

        let _ = ready_tx.try_send(());

        let outcome =
            race_consumption(ready_rx, received_rx, &mut task, Duration::from_millis(50)).await;
        assert_eq!(outcome, ConsumeOutcome::TimedOut);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_race_reports_loop_error() {
        let (_ready_tx, ready_rx) = mpsc::channel(1);
        let (_received_tx, received_rx) = mpsc::channel(1);
        let mut task: JoinHandle<Result<(), KafkaError>> = tokio::spawn(async {
            Err(KafkaError::Subscription("broker rejected the topic".to_string()))
        });

        let outcome =
            race_consumption(ready_rx, received_rx, &mut task, Duration::from_secs(30)).await;
        match outcome {
            ConsumeOutcome::LoopFailed(msg) => assert!(msg.contains("broker rejected")),
            other => panic!("expected LoopFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_signal_rearms_the_deadline() {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let (_received_tx, received_rx) = mpsc::channel(1);
        let mut task = pending_loop(cancel.clone());

        // Subscription becomes ready partway through the initial deadline.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let _ = ready_tx.try_send(());
        });

        let start = tokio::time::Instant::now();
        let outcome =
            race_consumption(ready_rx, received_rx, &mut task, Duration::from_millis(100)).await;
        assert_eq!(outcome, ConsumeOutcome::TimedOut);

        // The message-wait window restarts at the ready signal: 60ms of
        // joining plus the full 100ms deadline.
        assert_eq!(start.elapsed(), Duration::from_millis(160));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_first_message_wins_and_later_signals_are_dropped() {
        let (ready_tx, _ready_rx) = mpsc::channel(1);
        let (received_tx, mut received_rx) = mpsc::channel(1);
        let handler = SignalingHandler::new(ready_tx, received_tx);

        handler.on_message("healthcheck", 0, 1);
        handler.on_message("healthcheck", 0, 2);
        handler.on_message("healthcheck", 1, 7);

        assert!(received_rx.recv().await.is_some());
        assert!(received_rx.try_recv().is_err());
    }
}
