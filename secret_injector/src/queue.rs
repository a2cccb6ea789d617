//! Notification queue abstraction
//!
//! Several mappings may poll the same queue. A message is only removed once a
//! reconcile cycle has acted on it, so anything left behind is redelivered
//! after its visibility timeout.

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Parameters of a single non-blocking poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_messages: i32,
    pub visibility_timeout: Duration,
    pub wait_time: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            visibility_timeout: Duration::from_secs(2),
            wait_time: Duration::ZERO,
        }
    }
}

/// One message received from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Receives up to `options.max_messages` messages without blocking
    async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<QueueMessage>>;

    /// Deletes every message in `messages` in one batch
    async fn delete_batch(&self, messages: &[QueueMessage]) -> Result<()>;
}

#[cfg(feature = "sqs")]
pub use sqs::SqsQueue;

#[cfg(feature = "sqs")]
mod sqs {
    use async_trait::async_trait;
    use aws_sdk_sqs::Client;
    use aws_sdk_sqs::config::Region;
    use aws_sdk_sqs::types::DeleteMessageBatchRequestEntry;
    use tracing::{debug, warn};

    use super::{NotificationQueue, QueueMessage, ReceiveOptions};
    use crate::{Error, Result};

    const KIND: &str = "sqs messages";

    /// Amazon SQS backed notification queue
    #[derive(Debug, Clone)]
    pub struct SqsQueue {
        client: Client,
        queue_url: String,
    }

    impl SqsQueue {
        /// Loads AWS credentials from the default provider chain
        pub async fn connect(queue_url: impl Into<String>, region: Option<String>) -> Self {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region));
            }
            let config = loader.load().await;

            Self {
                client: Client::new(&config),
                queue_url: queue_url.into(),
            }
        }
    }

    fn secs(d: std::time::Duration) -> i32 {
        i32::try_from(d.as_secs()).unwrap_or(i32::MAX)
    }

    #[async_trait]
    impl NotificationQueue for SqsQueue {
        async fn receive(&self, options: &ReceiveOptions) -> Result<Vec<QueueMessage>> {
            let output = self
                .client
                .receive_message()
                .queue_url(&self.queue_url)
                .max_number_of_messages(options.max_messages)
                .visibility_timeout(secs(options.visibility_timeout))
                .wait_time_seconds(secs(options.wait_time))
                .send()
                .await
                .map_err(|err| Error::fetch(KIND, err))?;

            let messages = output
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| {
                    Some(QueueMessage {
                        message_id: m.message_id?,
                        receipt_handle: m.receipt_handle?,
                        body: m.body.unwrap_or_default(),
                    })
                })
                .collect::<Vec<_>>();

            debug!(count = messages.len(), "received messages");
            Ok(messages)
        }

        async fn delete_batch(&self, messages: &[QueueMessage]) -> Result<()> {
            let entries = messages
                .iter()
                .map(|m| {
                    DeleteMessageBatchRequestEntry::builder()
                        .id(&m.message_id)
                        .receipt_handle(&m.receipt_handle)
                        .build()
                        .map_err(|err| Error::fetch(KIND, err))
                })
                .collect::<Result<Vec<_>>>()?;

            let output = self
                .client
                .delete_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|err| Error::fetch(KIND, err))?;

            for failed in output.failed() {
                warn!(message_id = %failed.id(), code = %failed.code(), "failed to delete message");
            }

            Ok(())
        }
    }
}
