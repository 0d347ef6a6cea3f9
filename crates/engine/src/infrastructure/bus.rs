//! NATS event bus client.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::infrastructure::config::NatsConfig;
use crate::infrastructure::ports::{BusError, BusSubscription, EventBusPort};

/// Buffer between the broker subscription and the consuming session.
const SUBSCRIPTION_CHANNEL_BUFFER: usize = 256;

/// Event bus client backed by a NATS connection.
///
/// The underlying client reconnects on its own; in-flight messages during
/// a disconnection may be dropped, which subscribers detect through
/// version tracking.
#[derive(Clone)]
pub struct NatsEventBus {
    client: async_nats::Client,
}

impl NatsEventBus {
    /// Connect with retry logic (exponential backoff between attempts).
    pub async fn connect(config: &NatsConfig) -> Result<Self, BusError> {
        let mut attempt = 0u32;
        let base_delay = Duration::from_secs(config.retry_delay_secs);

        loop {
            match Self::try_connect(config).await {
                Ok(client) => {
                    if attempt > 0 {
                        tracing::info!(
                            attempts = attempt + 1,
                            "event bus connection established after retries"
                        );
                    } else {
                        tracing::info!(url = %config.url, "event bus connected");
                    }
                    return Ok(Self { client });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > config.max_retries {
                        tracing::error!(
                            attempts = attempt,
                            error = %e,
                            "failed to connect to event bus"
                        );
                        return Err(e);
                    }

                    let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                    tracing::warn!(
                        attempt,
                        error = %e,
                        delay_secs = delay.as_secs(),
                        "event bus connection attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn try_connect(config: &NatsConfig) -> Result<async_nats::Client, BusError> {
        let mut opts = async_nats::ConnectOptions::new();
        if let Some(name) = &config.name {
            opts = opts.name(name);
        }
        opts = opts.max_reconnects(Some(config.max_reconnects));

        opts.connect(&config.url)
            .await
            .map_err(|e| BusError::Connect(format!("{} ({})", e, config.url)))
    }
}

#[async_trait]
impl EventBusPort for NatsEventBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                message: e.to_string(),
            })
    }

    async fn subscribe(&self, subject: &str) -> Result<BusSubscription, BusError> {
        let mut subscriber =
            self.client
                .subscribe(subject.to_string())
                .await
                .map_err(|e| BusError::Subscribe {
                    subject: subject.to_string(),
                    message: e.to_string(),
                })?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(SUBSCRIPTION_CHANNEL_BUFFER);
        let forward_subject = subject.to_string();
        let forward_task = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                if tx.send(message.payload.to_vec()).await.is_err() {
                    // Receiver gone: the session ended.
                    break;
                }
            }
            tracing::debug!(subject = %forward_subject, "bus subscription stream ended");
        });

        Ok(BusSubscription::new(
            subject.to_string(),
            rx,
            Some(forward_task),
        ))
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }
}
