use std::fmt::Display;
use std::string::FromUtf8Error;
use std::sync::Arc;

use internals::{BrokerClient, Delivery, DeliveryStream, QueueName};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{error, info, info_span, warn, Instrument};

use crate::codec::JsonCodec;
use crate::error::{CodecError, SubscribeError};

type Handler = Box<dyn Fn(&Delivery) -> Result<(), DispatchError> + Send + Sync>;

#[derive(Error, Debug)]
enum DispatchError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Logs a plain-text delivery.
pub fn log_message(message: String) {
    info!("Received message -> {}", message);
}

/// Logs a decoded record.
pub fn log_json_message<T: Display>(record: T) {
    info!("Received JSON message -> {}", record);
}

/// Owns the consumers started for registered listeners.
///
/// Every registration gets its own task, so listeners run independently
/// of each other. A delivery that cannot be turned into the listener's
/// input is logged and dropped; the listener keeps consuming.
pub struct Subscriber {
    broker: Arc<dyn BrokerClient>,
    codec: JsonCodec,
    shutdown: watch::Sender<bool>,
    listeners: Vec<JoinHandle<()>>,
}

impl Subscriber {
    pub fn new(broker: Arc<dyn BrokerClient>, codec: JsonCodec) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            broker,
            codec,
            shutdown,
            listeners: Vec::new(),
        }
    }

    /// Registers a listener receiving the payload as text.
    pub async fn subscribe<F>(&mut self, queue_name: &QueueName, listener: F) -> Result<(), SubscribeError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let handler: Handler = Box::new(move |delivery: &Delivery| {
            let text = String::from_utf8(delivery.payload().to_vec())?;
            listener(text);
            Ok(())
        });
        self.register(queue_name, handler).await
    }

    /// Registers a listener receiving records decoded with the shared codec.
    pub async fn subscribe_json<T, F>(
        &mut self,
        queue_name: &QueueName,
        listener: F,
    ) -> Result<(), SubscribeError>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let codec = self.codec;
        let handler: Handler = Box::new(move |delivery: &Delivery| {
            let record: T = codec.decode_delivery(delivery)?;
            listener(record);
            Ok(())
        });
        self.register(queue_name, handler).await
    }

    async fn register(&mut self, queue_name: &QueueName, handler: Handler) -> Result<(), SubscribeError> {
        let stream = self
            .broker
            .consume(queue_name)
            .await
            .map_err(|source| SubscribeError::Transport {
                queue_name: queue_name.clone(),
                source,
            })?;

        let span = info_span!("listener", queue_name=%queue_name);
        let handle = tokio::spawn(dispatch(stream, handler, self.shutdown.subscribe()).instrument(span));
        self.listeners.push(handle);

        info!(queue_name=%queue_name, "listener registered");
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Cancels every consumer and waits for the listener tasks to finish.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for handle in self.listeners {
            if let Err(e) = handle.await {
                error!(error=%e, "listener task failed");
            }
        }
        info!("all listeners stopped");
    }
}

async fn dispatch(mut stream: DeliveryStream, handler: Handler, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(delivery) => {
                    if let Err(e) = handler(&delivery) {
                        warn!(
                            error=%e,
                            delivery_tag=delivery.delivery_tag,
                            uuid=%delivery.message.uuid,
                            "dropping message that could not be handled"
                        );
                    }
                }
                None => {
                    info!("delivery stream ended");
                    break;
                }
            },
            _ = shutdown.changed() => {
                info!("listener cancelled");
                break;
            }
        }
    }
}
