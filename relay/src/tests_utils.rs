use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use internals::{BrokerClient, DeliveryStream, ExchangeName, Message, QueueName, TransportError};
use queues::InMemoryBroker;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use crate::codec::JsonCodec;
use crate::config::{BrokerSettings, Settings, TopologySettings};
use crate::publisher::Publisher;
use crate::topology::Topology;

const LOG_WAIT: Duration = Duration::from_secs(2);
const LOG_POLL: Duration = Duration::from_millis(10);

pub fn topology_settings() -> TopologySettings {
    TopologySettings {
        queue_name: "relay_queue".to_string(),
        json_queue_name: "relay_json_queue".to_string(),
        exchange_name: "relay_exchange".to_string(),
        routing_key: "relay_routing_key".to_string(),
        json_routing_key: "relay_json_routing_key".to_string(),
    }
}

pub fn settings() -> Settings {
    Settings {
        topology: topology_settings(),
        broker: BrokerSettings::default(),
    }
}

/// Declared topology and a publisher, without any listener draining the queues.
pub async fn setup_publisher() -> (Arc<InMemoryBroker>, Topology, Publisher) {
    let broker = Arc::new(InMemoryBroker::new());
    let topology = Topology::from_settings(&topology_settings());
    topology
        .declare(broker.as_ref())
        .await
        .expect("failed to declare topology");

    let publisher = Publisher::new(
        broker.clone(),
        &topology,
        JsonCodec::new(),
        BrokerSettings::default().confirm_timeout(),
    );
    (broker, topology, publisher)
}

/// Collects everything written by a `tracing` fmt subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Installs the capturing subscriber for the current thread. Use with a
    /// current-thread runtime so spawned tasks log into it too.
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub async fn wait_for(&self, needle: &str) -> bool {
        let deadline = tokio::time::Instant::now() + LOG_WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.contents().contains(needle) {
                return true;
            }
            tokio::time::sleep(LOG_POLL).await;
        }
        false
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Broker that accepts declarations but never confirms a publish.
pub struct StalledBroker {
    inner: InMemoryBroker,
}

impl StalledBroker {
    pub fn new() -> Self {
        Self {
            inner: InMemoryBroker::new(),
        }
    }
}

#[async_trait]
impl BrokerClient for StalledBroker {
    async fn declare_exchange(&self, exchange_name: &ExchangeName) -> Result<(), TransportError> {
        self.inner.declare_exchange(exchange_name).await
    }

    async fn declare_queue(&self, queue_name: &QueueName) -> Result<(), TransportError> {
        self.inner.declare_queue(queue_name).await
    }

    async fn bind_queue(
        &self,
        queue_name: &QueueName,
        exchange_name: &ExchangeName,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.inner
            .bind_queue(queue_name, exchange_name, routing_key)
            .await
    }

    async fn publish(&self, _: &ExchangeName, _: &str, _: Message) -> Result<(), TransportError> {
        std::future::pending().await
    }

    async fn consume(&self, queue_name: &QueueName) -> Result<DeliveryStream, TransportError> {
        self.inner.consume(queue_name).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}
