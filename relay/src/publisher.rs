use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use internals::{BrokerClient, ExchangeName, Message, RoutingKey, CONTENT_TYPE_TEXT};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

use crate::codec::JsonCodec;
use crate::error::PublishError;
use crate::topology::Topology;

/// Entry point for outbound traffic. Each call waits for the broker to
/// confirm the message; failures are returned to the caller as they are,
/// nothing is retried or buffered.
pub struct Publisher {
    broker: Arc<dyn BrokerClient>,
    codec: JsonCodec,
    exchange_name: ExchangeName,
    routing_key: RoutingKey,
    json_routing_key: RoutingKey,
    confirm_timeout: Duration,
}

impl Publisher {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        topology: &Topology,
        codec: JsonCodec,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            broker,
            codec,
            exchange_name: topology.exchange_name().clone(),
            routing_key: topology.plain().routing_key.clone(),
            json_routing_key: topology.json().routing_key.clone(),
            confirm_timeout,
        }
    }

    #[instrument(skip_all)]
    pub async fn send_message(&self, message: &str) -> Result<(), PublishError> {
        info!("Message sent -> {}", message);

        let message = Message::new(message.as_bytes().to_vec()).with_content_type(CONTENT_TYPE_TEXT);
        self.submit(&self.routing_key, message).await
    }

    #[instrument(skip_all)]
    pub async fn send_json_message<T>(&self, record: &T) -> Result<(), PublishError>
    where
        T: Serialize + Display + Sync,
    {
        info!("Json message sent -> {}", record);

        let payload = self.codec.encode(record)?;
        let message = Message::new(payload).with_content_type(self.codec.content_type());
        self.submit(&self.json_routing_key, message).await
    }

    async fn submit(&self, routing_key: &str, message: Message) -> Result<(), PublishError> {
        let uuid = message.uuid.clone();
        let publish = self
            .broker
            .publish(&self.exchange_name, routing_key, message);

        match timeout(self.confirm_timeout, publish).await {
            Ok(Ok(())) => {
                debug!(uuid=%uuid, routing_key=%routing_key, "publish confirmed");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error=%e, uuid=%uuid, routing_key=%routing_key, "publish failed");
                Err(PublishError::Transport(e))
            }
            Err(_) => {
                error!(
                    uuid=%uuid,
                    routing_key=%routing_key,
                    timeout=?self.confirm_timeout,
                    "publish was not confirmed in time"
                );
                Err(PublishError::ConfirmTimeout(self.confirm_timeout))
            }
        }
    }
}
