use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Exchange not found: '{0}'")]
    ExchangeNotFound(String),

    #[error("Queue not found: '{0}'")]
    QueueNotFound(String),

    #[error("Publish rejected by broker: {0}")]
    Rejected(String),

    #[error("Broker connection closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}
