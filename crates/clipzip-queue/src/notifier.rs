//! Outcome notifications.

use async_trait::async_trait;
use tracing::debug;

use clipzip_models::OutcomeNotification;

use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueConfig, BODY_FIELD};

/// Delivers outcome notifications to the downstream consumer.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, notification: &OutcomeNotification) -> QueueResult<()>;
}

/// Appends notifications to a capped Redis stream.
pub struct RedisNotifier {
    client: redis::Client,
    stream: String,
    max_len: usize,
}

impl RedisNotifier {
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            stream: config.notifications_stream.clone(),
            max_len: config.notifications_max_len,
        })
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[async_trait]
impl NotificationPublisher for RedisNotifier {
    async fn publish(&self, notification: &OutcomeNotification) -> QueueResult<()> {
        let payload = notification.to_json()?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;

        debug!(
            "Published {} notification as {}",
            notification.status().as_str(),
            message_id
        );
        Ok(())
    }
}
