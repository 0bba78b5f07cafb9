use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::*;

/// Topic exchange with exact binding-key matching.
///
/// A message is delivered to every queue bound under a key equal to its
/// routing key. Wildcard patterns are not interpreted: `orders.*` only
/// matches the literal key `orders.*`.
#[derive(Default, Debug)]
pub struct TopicExchange {
    exchange_name: ExchangeName,
    routing_map: HashMap<RoutingKey, HashSet<QueueName>>,
}

impl TopicExchange {
    pub fn new(exchange_name: ExchangeName) -> Self {
        TopicExchange {
            exchange_name,
            routing_map: HashMap::new(),
        }
    }
}

impl Exchange for TopicExchange {
    fn bind(&mut self, queue_name: &QueueName, routing_key: &str) -> Result<(), ExchangeError> {
        if routing_key.is_empty() {
            return Err(ExchangeError::EmptyRoutingKey);
        }
        if queue_name.is_empty() {
            return Err(ExchangeError::BindFail {
                reason: "queue name must not be empty".to_string(),
            });
        }

        let created = match self.routing_map.entry(routing_key.to_string()) {
            Entry::Occupied(o) => o.into_mut().insert(queue_name.clone()),
            Entry::Vacant(v) => {
                v.insert(HashSet::from([queue_name.clone()]));
                true
            }
        };

        if created {
            info!(
                exchange_name=%self.exchange_name,
                queue_name=%queue_name,
                routing_key=%routing_key,
                "queue bound"
            );
        } else {
            debug!(
                exchange_name=%self.exchange_name,
                queue_name=%queue_name,
                routing_key=%routing_key,
                "binding already declared"
            );
        }

        Ok(())
    }

    fn route(&self, routing_key: &str) -> Result<HashSet<QueueName>, ExchangeError> {
        if routing_key.is_empty() {
            return Err(ExchangeError::EmptyRoutingKey);
        }

        Ok(self
            .routing_map
            .get(routing_key)
            .cloned()
            .unwrap_or_default())
    }
}
