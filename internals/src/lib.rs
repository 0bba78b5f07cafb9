use std::time::Duration;

use uuid::Uuid;

mod broker;
mod errors;

pub use broker::{BrokerClient, DeliveryStream};
pub use errors::TransportError;

pub type QueueName = String;
pub type ExchangeName = String;
pub type RoutingKey = String;
pub type DeliveryTag = u64;

pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Clone, PartialEq, Default, Debug)]
pub struct Message {
    pub uuid: String,
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub created_at: Duration, // since UNIX_EPOCH
}

impl Message {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            payload,
            content_type: None,
            created_at: utils::current_time_duration(),
        }
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }
}

/// One message handed from a queue to a consumer.
#[derive(Clone, PartialEq, Debug)]
pub struct Delivery {
    pub queue_name: QueueName,
    pub delivery_tag: DeliveryTag,
    pub routing_key: RoutingKey,
    pub message: Message,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    pub fn content_type(&self) -> Option<&str> {
        self.message.content_type.as_deref()
    }
}
