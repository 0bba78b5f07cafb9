//! Publish and subscribe façade over a topic exchange.
//!
//! Two queues hang off one exchange: one receives plain text under its
//! routing key, the other receives JSON encoded [`User`] records under a
//! second key. [`Relay`] wires the topology, a [`Publisher`] and the two
//! default listeners on top of any [`internals::BrokerClient`].

pub mod amqp;
pub mod app;
pub mod codec;
pub mod config;
pub mod error;
pub mod publisher;
pub mod subscriber;
pub mod topology;
pub mod user;

pub use amqp::AmqpBroker;
pub use app::Relay;
pub use codec::JsonCodec;
pub use config::{BrokerSettings, Settings, TopologySettings};
pub use error::{CodecError, ConfigError, PublishError, RelayError, SubscribeError};
pub use publisher::Publisher;
pub use subscriber::Subscriber;
pub use topology::{QueueBinding, Topology};
pub use user::User;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod tests_utils;
