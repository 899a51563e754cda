//! Non-blocking metrics publication

use tokio::sync::broadcast;
use tracing::trace;

use loadstorm_core::ExecutionMetrics;

/// Single-writer, multi-reader publisher for live `ExecutionMetrics`.
///
/// Delivery is bounded: a subscriber that falls behind sees a `Lagged`
/// notification and loses the oldest events; the publisher never blocks.
#[derive(Debug, Clone)]
pub struct MetricsPublisher {
    tx: broadcast::Sender<ExecutionMetrics>,
}

impl MetricsPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish one snapshot; a send with no subscribers is not an error.
    pub fn publish(&self, metrics: ExecutionMetrics) {
        if let Err(e) = self.tx.send(metrics) {
            trace!("no metrics subscribers: {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionMetrics> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MetricsPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadstorm_core::ExecutionStatus;

    #[tokio::test]
    async fn test_subscriber_receives_published_metrics() {
        let publisher = MetricsPublisher::new(8);
        let mut rx = publisher.subscribe();

        publisher.publish(ExecutionMetrics::new("t-1", ExecutionStatus::Running));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.test_id, "t-1");
        assert_eq!(received.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_panic() {
        let publisher = MetricsPublisher::new(8);
        publisher.publish(ExecutionMetrics::new("t-2", ExecutionStatus::Pending));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_drops_oldest() {
        let publisher = MetricsPublisher::new(2);
        let mut rx = publisher.subscribe();

        for i in 0..5 {
            let mut m = ExecutionMetrics::new(format!("t-{}", i), ExecutionStatus::Running);
            m.requests_completed = i;
            publisher.publish(m);
        }

        // The first receive reports the lag; subsequent receives see the
        // newest retained events.
        assert!(matches!(
            rx.recv().await,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_))
        ));
        let next = rx.recv().await.unwrap();
        assert_eq!(next.requests_completed, 3);
    }
}
