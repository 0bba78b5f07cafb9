use internals::{BrokerClient, ExchangeName, QueueName, RoutingKey, TransportError};
use tracing::{info, instrument};

use crate::config::TopologySettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue_name: QueueName,
    pub routing_key: RoutingKey,
}

/// One topic exchange with the plain and the JSON queue bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    exchange_name: ExchangeName,
    plain: QueueBinding,
    json: QueueBinding,
}

impl Topology {
    pub fn from_settings(settings: &TopologySettings) -> Self {
        Self {
            exchange_name: settings.exchange_name.clone(),
            plain: QueueBinding {
                queue_name: settings.queue_name.clone(),
                routing_key: settings.routing_key.clone(),
            },
            json: QueueBinding {
                queue_name: settings.json_queue_name.clone(),
                routing_key: settings.json_routing_key.clone(),
            },
        }
    }

    pub fn exchange_name(&self) -> &ExchangeName {
        &self.exchange_name
    }

    pub fn plain(&self) -> &QueueBinding {
        &self.plain
    }

    pub fn json(&self) -> &QueueBinding {
        &self.json
    }

    pub fn bindings(&self) -> [&QueueBinding; 2] {
        [&self.plain, &self.json]
    }

    /// Queue a message published under `routing_key` is delivered to.
    pub fn queue_for(&self, routing_key: &str) -> Option<&QueueName> {
        self.bindings()
            .into_iter()
            .find(|binding| binding.routing_key == routing_key)
            .map(|binding| &binding.queue_name)
    }

    /// Declares the exchange, both queues and both bindings. Safe to run on
    /// every start.
    #[instrument(skip_all, fields(exchange_name=%self.exchange_name))]
    pub async fn declare(&self, broker: &dyn BrokerClient) -> Result<(), TransportError> {
        broker.declare_exchange(&self.exchange_name).await?;

        for binding in self.bindings() {
            broker.declare_queue(&binding.queue_name).await?;
            broker
                .bind_queue(&binding.queue_name, &self.exchange_name, &binding.routing_key)
                .await?;
            info!(
                queue_name=%binding.queue_name,
                routing_key=%binding.routing_key,
                "binding declared"
            );
        }

        Ok(())
    }
}
