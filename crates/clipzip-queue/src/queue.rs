//! Task input using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use clipzip_models::TaskMessage;

use crate::error::{QueueError, QueueResult};

/// Stream entry field holding the JSON payload.
pub const BODY_FIELD: &str = "body";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying inbound task messages
    pub events_stream: String,
    /// Stream receiving outcome notifications
    pub notifications_stream: String,
    /// Consumer group name
    pub consumer_group: String,
    /// This process's consumer name within the group
    pub consumer_name: String,
    /// How long a receive blocks waiting for new entries
    pub block: Duration,
    /// Pending entries idle for longer than this are reclaimed
    pub claim_min_idle: Duration,
    /// Approximate cap on the notifications stream length
    pub notifications_max_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            events_stream: "clipzip:events".to_string(),
            notifications_stream: "clipzip:notifications".to_string(),
            consumer_group: "clipzip:workers".to_string(),
            consumer_name: default_consumer_name(),
            block: Duration::from_millis(5000),
            claim_min_idle: Duration::from_secs(900), // 15 minutes
            notifications_max_len: 10_000,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            events_stream: std::env::var("QUEUE_EVENTS_STREAM").unwrap_or(defaults.events_stream),
            notifications_stream: std::env::var("QUEUE_NOTIFICATIONS_STREAM")
                .unwrap_or(defaults.notifications_stream),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            consumer_name: std::env::var("QUEUE_CONSUMER_NAME")
                .unwrap_or(defaults.consumer_name),
            block: std::env::var("QUEUE_BLOCK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.block),
            claim_min_idle: std::env::var("QUEUE_CLAIM_MIN_IDLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            notifications_max_len: std::env::var("QUEUE_NOTIFICATIONS_MAX_LEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.notifications_max_len),
        }
    }
}

fn default_consumer_name() -> String {
    format!("worker-{}", uuid::Uuid::new_v4())
}

/// One message handed out by the input channel.
///
/// Stays pending until [`TaskQueue::ack`] is called with its receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Opaque handle used to acknowledge the message
    pub receipt: String,
    /// Raw payload
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(receipt: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            receipt: receipt.into(),
            body: body.into(),
        }
    }
}

/// At-least-once input channel.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Wait for up to `max` deliveries. May return an empty batch when the
    /// long poll times out.
    async fn receive(&self, max: usize) -> QueueResult<Vec<Delivery>>;

    /// Remove a delivery so it is never handed out again.
    async fn ack(&self, receipt: &str) -> QueueResult<()>;
}

/// [`TaskQueue`] backed by a Redis Streams consumer group.
pub struct RedisTaskQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisTaskQueue {
    /// Create a new task queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.events_stream)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Append a task message to the events stream.
    pub async fn send(&self, message: &TaskMessage) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let payload = message
            .to_json()
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let message_id: String = conn
            .xadd(&self.config.events_stream, "*", &[(BODY_FIELD, payload)])
            .await?;

        debug!("Sent task for video {} as {}", message.video_id, message_id);
        Ok(message_id)
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.events_stream).await?;
        Ok(len)
    }

    /// Claim pending entries other consumers have left idle for too long.
    pub async fn claim_stale(&self, count: usize) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;
        let min_idle_ms = self.config.claim_min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.events_stream)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();

        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.events_stream)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(min_idle_ms)
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        let deliveries: Vec<Delivery> = claimed.ids.into_iter().map(into_delivery).collect();
        if !deliveries.is_empty() {
            info!("Reclaimed {} stale pending messages", deliveries.len());
        }

        Ok(deliveries)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn receive(&self, max: usize) -> QueueResult<Vec<Delivery>> {
        let stale = self.claim_stale(max).await?;
        if !stale.is_empty() {
            return Ok(stale);
        }

        let mut conn = self.connection().await?;

        // Read from consumer group; nil when the block times out
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(max)
            .arg("BLOCK")
            .arg(self.config.block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.events_stream)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::receive_failed(e.to_string()))?;

        let deliveries: Vec<Delivery> = reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|key| key.ids)
            .map(into_delivery)
            .collect();

        if !deliveries.is_empty() {
            debug!("Received {} messages", deliveries.len());
        }
        Ok(deliveries)
    }

    async fn ack(&self, receipt: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.events_stream)
            .arg(&self.config.consumer_group)
            .arg(receipt)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.events_stream)
            .arg(receipt)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", receipt);
        Ok(())
    }
}

/// Entries without a body field yield an empty payload, which fails
/// validation downstream and is acknowledged there.
fn into_delivery(entry: StreamId) -> Delivery {
    let body = match entry.map.get(BODY_FIELD) {
        Some(redis::Value::BulkString(payload)) => payload.clone(),
        Some(redis::Value::SimpleString(payload)) => payload.clone().into_bytes(),
        _ => {
            warn!("Message {} has no {} field", entry.id, BODY_FIELD);
            Vec::new()
        }
    };
    Delivery::new(entry.id, body)
}
