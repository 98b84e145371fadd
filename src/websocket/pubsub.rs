use crate::models::ChatId;
use crate::redis_client::RedisClient;
use crate::resilience::{calculate_backoff, next_backoff, RetryConfig};
use crate::websocket::ConnectionRegistry;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{AsyncCommands, RedisResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

const CHANNEL_PREFIX: &str = "chat:";

fn channel_for_chat(chat_id: &ChatId) -> String {
    format!("{CHANNEL_PREFIX}{chat_id}")
}

/// Cross-instance side of the fan-out.
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    async fn publish(&self, chat_id: &ChatId, payload: &str) -> RedisResult<()>;
}

#[async_trait]
impl ChannelPublisher for RedisClient {
    async fn publish(&self, chat_id: &ChatId, payload: &str) -> RedisResult<()> {
        let mut conn = self.connection().await;
        conn.publish::<_, _, ()>(channel_for_chat(chat_id), payload).await
    }
}

/// Whether this instance's `chat:*` subscription is currently live.
///
/// Starts down; while down, [`super::Fanout`] also delivers to the local
/// registry because nothing would relay the Redis message back.
#[derive(Debug, Clone, Default)]
pub struct ListenerHealth(Arc<AtomicBool>);

impl ListenerHealth {
    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, up: bool) {
        self.0.store(up, Ordering::Release);
    }
}

/// Relay every `chat:*` message into the local registry for as long as the
/// process runs, resubscribing with backoff whenever the subscription ends.
pub async fn start_pubsub_listener(
    redis: RedisClient,
    registry: ConnectionRegistry,
    health: ListenerHealth,
    retry: RetryConfig,
) {
    let session_health = health.clone();
    supervise(health, retry, move || {
        relay(redis.clone(), registry.clone(), session_health.clone())
    })
    .await
}

async fn supervise<F, Fut>(health: ListenerHealth, retry: RetryConfig, mut session: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RedisResult<()>>,
{
    let mut backoff = retry.initial_backoff;
    loop {
        let started = Instant::now();
        let result = session().await;
        health.set(false);

        match result {
            Ok(()) => tracing::warn!("chat fan-out subscription ended"),
            Err(e) => tracing::error!(error = %e, "chat fan-out subscription failed"),
        }

        // a session that stayed up for a while starts the schedule over
        if started.elapsed() > retry.max_backoff {
            backoff = retry.initial_backoff;
        }
        let delay = calculate_backoff(backoff, retry.jitter);
        tracing::warn!(
            delay_ms = delay.as_millis() as u64,
            "resubscribing to chat fan-out channels"
        );
        tokio::time::sleep(delay).await;
        backoff = next_backoff(backoff, &retry);
    }
}

async fn relay(
    redis: RedisClient,
    registry: ConnectionRegistry,
    health: ListenerHealth,
) -> RedisResult<()> {
    // pub/sub needs a dedicated connection
    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.psubscribe(format!("{CHANNEL_PREFIX}*")).await?;
    health.set(true);
    tracing::info!(pattern = %format!("{CHANNEL_PREFIX}*"), "subscribed to chat fan-out channels");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    channel = %channel,
                    error = %e,
                    "dropping undecodable pub/sub payload"
                );
                continue;
            }
        };

        match channel.strip_prefix(CHANNEL_PREFIX) {
            Some(raw) if !raw.is_empty() => {
                let chat_id = ChatId::from_stored(raw.to_string());
                registry.publish(&chat_id, &payload).await;
            }
            _ => tracing::debug!(channel = %channel, "ignoring message on unexpected channel"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn channel_name_uses_chat_id() {
        let chat_id = ChatId::resolve("u2", "u1").unwrap();
        assert_eq!(channel_for_chat(&chat_id), "chat:u1_u2");
    }

    #[tokio::test]
    async fn supervisor_resubscribes_after_session_ends() {
        let health = ListenerHealth::default();
        let sessions = Arc::new(AtomicU32::new(0));
        let retry = RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: false,
            ..Default::default()
        };

        let counter = sessions.clone();
        let session_health = health.clone();
        let handle = tokio::spawn(supervise(health.clone(), retry, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            session_health.set(true);
            async move {
                if n % 2 == 0 {
                    Ok(())
                } else {
                    Err(redis::RedisError::from((redis::ErrorKind::IoError, "connection reset")))
                }
            }
        }));

        tokio::time::timeout(Duration::from_secs(2), async {
            while sessions.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn health_is_down_after_session_ends() {
        let health = ListenerHealth::default();
        assert!(!health.is_up());

        let retry = RetryConfig {
            initial_backoff: Duration::from_secs(60),
            jitter: false,
            ..Default::default()
        };
        let session_health = health.clone();
        let handle = tokio::spawn(supervise(health.clone(), retry, move || {
            session_health.set(true);
            async { Ok(()) }
        }));

        // the supervisor is now sleeping before the next attempt
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!health.is_up());
        handle.abort();
    }
}
