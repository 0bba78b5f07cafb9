use std::sync::Arc;

use internals::{BrokerClient, TransportError};
use tracing::{info, instrument};

use crate::codec::JsonCodec;
use crate::config::Settings;
use crate::error::RelayError;
use crate::publisher::Publisher;
use crate::subscriber::{log_json_message, log_message, Subscriber};
use crate::topology::Topology;
use crate::user::User;

/// A running relay: topology declared, publisher ready and both default
/// listeners consuming.
pub struct Relay {
    topology: Topology,
    publisher: Arc<Publisher>,
    subscriber: Subscriber,
    broker: Arc<dyn BrokerClient>,
}

impl Relay {
    #[instrument(skip_all)]
    pub async fn start(settings: &Settings, broker: Arc<dyn BrokerClient>) -> Result<Self, RelayError> {
        settings.validate()?;

        let topology = Topology::from_settings(&settings.topology);
        topology.declare(broker.as_ref()).await?;

        let codec = JsonCodec::new();
        let publisher = Arc::new(Publisher::new(
            broker.clone(),
            &topology,
            codec,
            settings.broker.confirm_timeout(),
        ));

        let mut subscriber = Subscriber::new(broker.clone(), codec);
        subscriber
            .subscribe(&topology.plain().queue_name, log_message)
            .await?;
        subscriber
            .subscribe_json::<User, _>(&topology.json().queue_name, log_json_message::<User>)
            .await?;

        info!(exchange_name=%topology.exchange_name(), "relay started");
        Ok(Self {
            topology,
            publisher,
            subscriber,
            broker,
        })
    }

    pub fn publisher(&self) -> Arc<Publisher> {
        self.publisher.clone()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn listener_count(&self) -> usize {
        self.subscriber.listener_count()
    }

    /// Stops the listeners, then closes the broker connection.
    pub async fn shutdown(self) -> Result<(), TransportError> {
        self.subscriber.shutdown().await;
        self.broker.close().await?;
        info!("relay stopped");
        Ok(())
    }
}
