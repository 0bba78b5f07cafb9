use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use internals::{
    BrokerClient, Delivery, DeliveryStream, ExchangeName, Message, QueueName, TransportError,
};
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, info_span, instrument, Instrument};

const CONSUMER_BUFFER: usize = 64;

/// [`BrokerClient`] backed by an AMQP 0-9-1 server.
///
/// One connection with one confirm-mode channel. Exchange and queues are
/// declared durable; consumers run with automatic acknowledgement.
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    #[instrument(skip_all)]
    pub async fn connect(uri: &str) -> Result<Self, TransportError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(into_transport)?;
        let channel = connection.create_channel().await.map_err(into_transport)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(into_transport)?;

        info!(channel_id = channel.id(), "connected to broker");
        Ok(Self { connection, channel })
    }
}

#[async_trait]
impl BrokerClient for AmqpBroker {
    #[instrument(skip_all, fields(exchange_name=%exchange_name))]
    async fn declare_exchange(&self, exchange_name: &ExchangeName) -> Result<(), TransportError> {
        self.channel
            .exchange_declare(
                exchange_name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(into_transport)
    }

    #[instrument(skip_all, fields(queue_name=%queue_name))]
    async fn declare_queue(&self, queue_name: &QueueName) -> Result<(), TransportError> {
        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(into_transport)
    }

    #[instrument(skip_all, fields(queue_name=%queue_name, exchange_name=%exchange_name, routing_key=%routing_key))]
    async fn bind_queue(
        &self,
        queue_name: &QueueName,
        exchange_name: &ExchangeName,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.channel
            .queue_bind(
                queue_name,
                exchange_name,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(into_transport)
    }

    #[instrument(skip_all, fields(uuid=%message.uuid, exchange_name=%exchange_name, routing_key=%routing_key))]
    async fn publish(
        &self,
        exchange_name: &ExchangeName,
        routing_key: &str,
        message: Message,
    ) -> Result<(), TransportError> {
        let confirm = self
            .channel
            .basic_publish(
                exchange_name,
                routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                properties_for(&message),
            )
            .await
            .map_err(into_transport)?
            .await
            .map_err(into_transport)?;

        if confirm.is_nack() {
            return Err(TransportError::Rejected(
                "broker refused the message".to_string(),
            ));
        }
        debug!("broker acknowledged the message");
        Ok(())
    }

    async fn consume(&self, queue_name: &QueueName) -> Result<DeliveryStream, TransportError> {
        let mut consumer = self
            .channel
            .basic_consume(
                queue_name,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(into_transport)?;

        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        let channel = self.channel.clone();
        let queue_name = queue_name.clone();
        let span = info_span!("amqp_consumer", queue_name=%queue_name);

        tokio::spawn(
            async move {
                info!("consumer started");
                let exit =
                    forward_deliveries(&mut consumer, &tx, |delivery| to_delivery(&queue_name, delivery))
                        .await;
                if exit == ConsumerExit::ReceiverDropped {
                    if let Err(e) = channel
                        .basic_cancel(consumer.tag().as_str(), BasicCancelOptions::default())
                        .await
                    {
                        error!(error=%e, "failed to cancel consumer");
                    }
                }
                info!(exit=?exit, "consumer stopped");
            }
            .instrument(span),
        );

        Ok(ReceiverStream::new(rx))
    }

    async fn close(&self) -> Result<(), TransportError> {
        info!("closing broker connection");
        self.connection
            .close(200, "OK")
            .await
            .map_err(into_transport)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerExit {
    ReceiverDropped,
    StreamEnded,
    Failed,
}

/// Pumps deliveries into `tx` until the source ends or fails, or the
/// receiving side goes away. A dropped receiver is noticed without waiting
/// for the next delivery, so nothing more is pulled off the broker.
async fn forward_deliveries<S, T, E, F>(mut source: S, tx: &mpsc::Sender<Delivery>, convert: F) -> ConsumerExit
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: Display,
    F: Fn(T) -> Delivery,
{
    loop {
        tokio::select! {
            next = source.next() => match next {
                Some(Ok(item)) => {
                    if tx.send(convert(item)).await.is_err() {
                        return ConsumerExit::ReceiverDropped;
                    }
                }
                Some(Err(e)) => {
                    error!(error=%e, "consumer failed");
                    return ConsumerExit::Failed;
                }
                None => return ConsumerExit::StreamEnded,
            },
            _ = tx.closed() => return ConsumerExit::ReceiverDropped,
        }
    }
}

fn properties_for(message: &Message) -> BasicProperties {
    let properties = BasicProperties::default()
        .with_message_id(message.uuid.clone().into())
        .with_timestamp(message.created_at.as_secs());
    match &message.content_type {
        Some(content_type) => properties.with_content_type(content_type.clone().into()),
        None => properties,
    }
}

fn to_delivery(queue_name: &QueueName, delivery: lapin::message::Delivery) -> Delivery {
    let properties = &delivery.properties;
    let message = Message {
        uuid: properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default(),
        content_type: properties
            .content_type()
            .as_ref()
            .map(|content_type| content_type.as_str().to_string()),
        created_at: properties
            .timestamp()
            .map(Duration::from_secs)
            .unwrap_or_default(),
        payload: delivery.data,
    };

    Delivery {
        queue_name: queue_name.clone(),
        delivery_tag: delivery.delivery_tag,
        routing_key: delivery.routing_key.as_str().to_string(),
        message,
    }
}

fn into_transport(e: lapin::Error) -> TransportError {
    match e {
        lapin::Error::IOError(_)
        | lapin::Error::InvalidConnectionState(_)
        | lapin::Error::InvalidChannelState(_) => TransportError::Unavailable(e.to_string()),
        _ => TransportError::Protocol(e.to_string()),
    }
}
