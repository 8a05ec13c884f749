use crate::config::{KafkaConfig, TriggerConfig};
use crate::error::IndexError;
use crate::events::BucketNotification;
use crate::extractor::Extractor;
use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use futures::future::join_all;
use futures::{FutureExt, StreamExt};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pause before a deferred notification is read again
const REDELIVERY_PAUSE: Duration = Duration::from_secs(5);

const SEEK_TIMEOUT: Duration = Duration::from_secs(10);

type PartitionKey = (String, i32);

/// What became of one consumed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every created object in the notification was indexed
    Indexed,
    /// Failed in a way a redelivery cannot fix; committed past
    Rejected,
    /// Transient failure outlived the retry budget; must be read again
    Deferred,
}

impl Outcome {
    pub fn of(result: &Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::Indexed,
            Err(e) => match e.downcast_ref::<IndexError>() {
                Some(err) if err.is_transient() => Outcome::Deferred,
                _ => Outcome::Rejected,
            },
        }
    }
}

/// Position and outcome of a processed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub outcome: Outcome,
}

/// Offsets to commit and partitions to rewind after a batch
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchPlan {
    /// Next offset to consume, per partition
    pub commits: BTreeMap<PartitionKey, i64>,
    /// Offset of the first deferred message, per partition
    pub rewinds: BTreeMap<PartitionKey, i64>,
}

/// Decide commits for a batch given in consumption order.
///
/// A partition is committed up to its first deferred message only. That
/// message and everything after it in the same partition is read again.
pub fn plan_batch(deliveries: &[Delivery]) -> BatchPlan {
    let mut plan = BatchPlan::default();

    for delivery in deliveries {
        let key = (delivery.topic.clone(), delivery.partition);
        if plan.rewinds.contains_key(&key) {
            continue;
        }
        match delivery.outcome {
            Outcome::Indexed | Outcome::Rejected => {
                plan.commits.insert(key, delivery.offset + 1);
            }
            Outcome::Deferred => {
                plan.rewinds.insert(key, delivery.offset);
            }
        }
    }

    plan
}

/// Kafka consumer for bucket notifications
pub struct NotificationConsumer {
    consumer: StreamConsumer,
    extractor: Extractor,
    concurrency: usize,
    max_retry_elapsed: Duration,
}

impl NotificationConsumer {
    /// Create a consumer subscribed to the notification topic
    pub fn new(
        config: &KafkaConfig,
        trigger: &TriggerConfig,
        extractor: Extractor,
    ) -> Result<Self> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string());

        // Configure SSL if enabled
        if config.ssl_enabled {
            client_config.set("security.protocol", "SASL_SSL");
            if let Some(ref ca_location) = config.ssl_ca_location {
                client_config.set("ssl.ca.location", ca_location);
            }
        }

        // Configure SASL if credentials provided
        if let (Some(ref username), Some(ref password)) =
            (&config.sasl_username, &config.sasl_password)
        {
            client_config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", username)
                .set("sasl.password", password);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.topic])
            .context("Failed to subscribe to notification topic")?;

        info!(
            topic = %config.topic,
            group = %config.consumer_group,
            concurrency = trigger.concurrency,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            extractor,
            concurrency: trigger.concurrency.max(1),
            max_retry_elapsed: trigger.max_retry_elapsed(),
        })
    }

    /// Consume until `shutdown` is cancelled.
    ///
    /// Messages are taken in batches of up to `concurrency` and processed
    /// concurrently; offsets are committed once the whole batch settles.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting notification consumer");

        let mut message_stream = self.consumer.stream();

        loop {
            let first = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = message_stream.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            let mut batch = Vec::with_capacity(self.concurrency);
            let mut pending = Some(first);
            while let Some(message_result) = pending.take() {
                match message_result {
                    Ok(message) => batch.push(message),
                    Err(e) => {
                        error!(error = %e, "Kafka consumer error");
                        metrics::counter!("indexer.kafka.errors").increment(1);
                    }
                }
                if batch.len() < self.concurrency {
                    pending = message_stream.next().now_or_never().flatten();
                }
            }

            if batch.is_empty() {
                continue;
            }

            let results = join_all(batch.iter().map(|m| self.process_message(m))).await;
            let deliveries: Vec<Delivery> = batch
                .iter()
                .zip(&results)
                .map(|(message, result)| {
                    let outcome = Outcome::of(result);
                    if let Err(e) = result {
                        error!(
                            error = %e,
                            partition = message.partition(),
                            offset = message.offset(),
                            ?outcome,
                            "Failed to process message"
                        );
                    }
                    Delivery {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                        outcome,
                    }
                })
                .collect();

            self.settle(&plan_batch(&deliveries), &deliveries, &shutdown).await;
        }

        info!("Notification consumer stopped");
        Ok(())
    }

    /// Commit what the batch completed and rewind deferred partitions
    async fn settle(
        &self,
        plan: &BatchPlan,
        deliveries: &[Delivery],
        shutdown: &CancellationToken,
    ) {
        for delivery in deliveries {
            let counter = match delivery.outcome {
                Outcome::Indexed => "indexer.messages.processed",
                Outcome::Rejected => "indexer.messages.failed",
                Outcome::Deferred => "indexer.messages.deferred",
            };
            metrics::counter!(counter).increment(1);
        }

        if !plan.commits.is_empty() {
            let mut offsets = TopicPartitionList::new();
            for ((topic, partition), next) in &plan.commits {
                if let Err(e) =
                    offsets.add_partition_offset(topic, *partition, Offset::Offset(*next))
                {
                    warn!(
                        error = %e,
                        topic = %topic,
                        partition = *partition,
                        "Invalid commit offset"
                    );
                }
            }
            if let Err(e) = self.consumer.commit(&offsets, CommitMode::Async) {
                warn!(error = %e, "Failed to commit offset");
            }
        }

        if plan.rewinds.is_empty() {
            return;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(REDELIVERY_PAUSE) => {}
        }

        for ((topic, partition), offset) in &plan.rewinds {
            match self
                .consumer
                .seek(topic, *partition, Offset::Offset(*offset), SEEK_TIMEOUT)
            {
                Ok(()) => info!(
                    topic = %topic,
                    partition = *partition,
                    offset = *offset,
                    "Rewound partition for redelivery"
                ),
                Err(e) => error!(
                    error = %e,
                    topic = %topic,
                    partition = *partition,
                    offset = *offset,
                    "Failed to rewind partition"
                ),
            }
        }
    }

    /// Process a single Kafka message
    #[instrument(
        skip(self, message),
        fields(partition = message.partition(), offset = message.offset())
    )]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let payload = message.payload().context("Message has no payload")?;

        let notification: BucketNotification = serde_json::from_slice(payload)
            .context("Failed to deserialize bucket notification")?;

        debug!(records = notification.records.len(), "Received bucket notification");

        let indexed = with_retry(self.max_retry_elapsed, || {
            self.extractor.handle_notification(&notification)
        })
        .await?;

        debug!(indexed = indexed.len(), "Bucket notification processed");
        Ok(())
    }
}

/// Retry `operation` while it fails with a transient error.
///
/// Permanent failures (missing object, undecodable image, bad key) return
/// immediately.
pub async fn with_retry<T, F, Fut>(
    max_elapsed: Duration,
    mut operation: F,
) -> Result<T, IndexError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, IndexError>>,
{
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(200),
        max_interval: Duration::from_secs(10),
        max_elapsed_time: Some(max_elapsed),
        ..Default::default()
    };

    backoff::future::retry(policy, || {
        let attempt = operation();
        async move {
            attempt.await.map_err(|e| {
                if e.is_transient() {
                    warn!(error = %e, "Transient extraction failure, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    })
    .await
}
