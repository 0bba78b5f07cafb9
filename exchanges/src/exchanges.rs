use std::collections::HashSet;
use std::fmt;

pub mod types;

pub use internals::{ExchangeName, QueueName, RoutingKey};
pub use types::topic::TopicExchange;

pub type ExchangeType = dyn Exchange + Send + Sync;

#[derive(PartialEq, Debug)]
pub enum ExchangeError {
    BindFail { reason: String },
    EmptyRoutingKey,
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeError::BindFail { reason } => {
                write!(f, "binding to exchange failed: {}", reason)
            }
            ExchangeError::EmptyRoutingKey => {
                write!(f, "routing key must not be empty")
            }
        }
    }
}

impl std::error::Error for ExchangeError {}

pub trait Exchange {
    fn bind(&mut self, queue_name: &QueueName, routing_key: &str) -> Result<(), ExchangeError>;
    /// Names of the queues a message published under `routing_key` lands in.
    fn route(&self, routing_key: &str) -> Result<HashSet<QueueName>, ExchangeError>;
}
