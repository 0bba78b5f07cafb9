use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;

use crate::{Delivery, ExchangeName, Message, QueueName, TransportError};

pub type DeliveryStream = ReceiverStream<Delivery>;

/// Connection to a broker with topic-exchange semantics.
///
/// One instance is shared by every component of the process, so
/// implementations synchronise internally. Declarations are idempotent.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn declare_exchange(&self, exchange_name: &ExchangeName) -> Result<(), TransportError>;

    async fn declare_queue(&self, queue_name: &QueueName) -> Result<(), TransportError>;

    async fn bind_queue(
        &self,
        queue_name: &QueueName,
        exchange_name: &ExchangeName,
        routing_key: &str,
    ) -> Result<(), TransportError>;

    /// Resolves once the broker has confirmed the message.
    async fn publish(
        &self,
        exchange_name: &ExchangeName,
        routing_key: &str,
        message: Message,
    ) -> Result<(), TransportError>;

    /// Starts an auto-ack consumer. Dropping the stream cancels it.
    async fn consume(&self, queue_name: &QueueName) -> Result<DeliveryStream, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
