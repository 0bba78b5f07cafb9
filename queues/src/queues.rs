use async_trait::async_trait;
use exchanges::{ExchangeName, ExchangeType, TopicExchange};
use internals::{
    BrokerClient, Delivery, DeliveryStream, Message, QueueName, RoutingKey, TransportError,
};
use tokio::sync::{mpsc, watch, Notify};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub type Queue = VecDeque<(RoutingKey, Message)>;
pub type QueueContainer = HashMap<QueueName, Arc<QueueSlot>>;
pub type ExchangeContainer = HashMap<ExchangeName, Arc<RwLock<ExchangeType>>>;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const CONSUMER_BUFFER: usize = 16;

pub struct QueueSlot {
    name: QueueName,
    buffer: Mutex<Queue>,
    notify: Notify,
}

impl QueueSlot {
    fn new(name: QueueName) -> Self {
        Self {
            name,
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(
        &self,
        routing_key: &str,
        message: Message,
        capacity: usize,
    ) -> Result<(), TransportError> {
        let mut buffer = self.buffer.lock().map_err(|e| {
            error!(error=%e, queue_name=%self.name, "queue is unavailable");
            TransportError::Unavailable(format!("queue {} is unavailable", self.name))
        })?;

        if buffer.len() >= capacity {
            warn!(queue_name=%self.name, capacity, "queue is full");
            return Err(TransportError::Rejected(format!("queue {} is full", self.name)));
        }

        buffer.push_back((routing_key.to_string(), message));
        drop(buffer);

        self.notify.notify_one();
        Ok(())
    }

    fn pop(&self) -> Result<Option<(RoutingKey, Message)>, TransportError> {
        let mut buffer = self.buffer.lock().map_err(|e| {
            error!(error=%e, queue_name=%self.name, "queue is unavailable");
            TransportError::Unavailable(format!("queue {} is unavailable", self.name))
        })?;
        Ok(buffer.pop_front())
    }

    fn requeue(&self, routing_key: RoutingKey, message: Message) {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.push_front((routing_key, message));
            drop(buffer);
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process broker with topic exchanges and FIFO queues.
///
/// Used when no external broker is configured and as the broker behind the
/// test suites. `disconnect`/`reconnect` simulate a lost connection: while
/// disconnected every operation fails with [`TransportError::Unavailable`].
pub struct InMemoryBroker {
    queues: Arc<RwLock<QueueContainer>>,
    exchanges: Arc<RwLock<ExchangeContainer>>,
    queue_capacity: usize,
    connected: AtomicBool,
    next_delivery_tag: Arc<AtomicU64>,
    shutdown: watch::Sender<bool>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(queue_capacity: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queues: Arc::new(RwLock::new(QueueContainer::new())),
            exchanges: Arc::new(RwLock::new(ExchangeContainer::new())),
            queue_capacity,
            connected: AtomicBool::new(true),
            next_delivery_tag: Arc::new(AtomicU64::new(0)),
            shutdown,
        }
    }

    pub fn disconnect(&self) {
        warn!("broker connection lost");
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        info!("broker connection restored");
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !*self.shutdown.borrow()
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if *self.shutdown.borrow() {
            return Err(TransportError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("connection lost".to_string()));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(queue_name=%queue_name))]
    pub fn add_queue(&self, queue_name: &QueueName) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut queues_write = self.queues.write().map_err(|e| {
            error!(error=%e, "queues are unavailable");
            TransportError::Unavailable("queues are unavailable".to_string())
        })?;

        if queues_write.contains_key(queue_name) {
            debug!("queue already declared");
            return Ok(());
        }

        queues_write.insert(
            queue_name.to_owned(),
            Arc::new(QueueSlot::new(queue_name.to_owned())),
        );
        info!("queue declared");
        Ok(())
    }

    #[instrument(skip_all, fields(exchange_name=%exchange_name))]
    pub fn add_exchange(&self, exchange_name: &ExchangeName) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut exchanges_write = self.exchanges.write().map_err(|e| {
            error!(error=%e, "exchanges are unavailable");
            TransportError::Unavailable("exchanges are unavailable".to_string())
        })?;

        if exchanges_write.contains_key(exchange_name) {
            debug!("exchange already declared");
            return Ok(());
        }

        let exchange: Arc<RwLock<ExchangeType>> =
            Arc::new(RwLock::new(TopicExchange::new(exchange_name.to_owned())));
        exchanges_write.insert(exchange_name.to_owned(), exchange);
        info!("exchange declared");
        Ok(())
    }

    fn get_queue(&self, queue_name: &QueueName) -> Result<Arc<QueueSlot>, TransportError> {
        let queues_read = self.queues.read().map_err(|e| {
            error!(error=%e, "queues are unavailable");
            TransportError::Unavailable("queues are unavailable".to_string())
        })?;

        queues_read
            .get(queue_name)
            .cloned()
            .ok_or_else(|| TransportError::QueueNotFound(queue_name.to_owned()))
    }

    fn get_exchange(
        &self,
        exchange_name: &ExchangeName,
    ) -> Result<Arc<RwLock<ExchangeType>>, TransportError> {
        let exchanges_read = self.exchanges.read().map_err(|e| {
            error!(error=%e, "exchanges are unavailable");
            TransportError::Unavailable("exchanges are unavailable".to_string())
        })?;

        exchanges_read
            .get(exchange_name)
            .cloned()
            .ok_or_else(|| TransportError::ExchangeNotFound(exchange_name.to_owned()))
    }

    #[instrument(skip_all, fields(queue_name=%queue_name, exchange_name=%exchange_name, routing_key=%routing_key))]
    pub fn bind_queue_to_exchange(
        &self,
        queue_name: &QueueName,
        exchange_name: &ExchangeName,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let _ = self.get_queue(queue_name)?;
        let exchange = self.get_exchange(exchange_name)?;

        let mut exchange_write = exchange.write().map_err(|e| {
            error!(error=%e, "exchange is unavailable");
            TransportError::Unavailable("exchange is unavailable".to_string())
        })?;
        exchange_write.bind(queue_name, routing_key).map_err(|e| {
            error!(error=%e, "failed to bind");
            TransportError::Protocol(e.to_string())
        })?;
        Ok(())
    }

    /// Routes `message` and returns the number of queues it was pushed to.
    /// Unroutable messages are dropped.
    #[instrument(skip_all, fields(uuid=%message.uuid, exchange_name=%exchange_name, routing_key=%routing_key))]
    pub fn forward_message(
        &self,
        exchange_name: &ExchangeName,
        routing_key: &str,
        message: Message,
    ) -> Result<u32, TransportError> {
        self.ensure_connected()?;
        let exchange = self.get_exchange(exchange_name)?;

        let targets = {
            let exchange_read = exchange.read().map_err(|e| {
                error!(error=%e, "exchange is unavailable");
                TransportError::Unavailable("exchange is unavailable".to_string())
            })?;
            exchange_read.route(routing_key).map_err(|e| {
                error!(error=%e, "failed to route message");
                TransportError::Rejected(e.to_string())
            })?
        };

        if targets.is_empty() {
            warn!("no queue bound to routing key, message dropped");
            return Ok(0);
        }

        let mut pushed_counter: u32 = 0;
        for name in targets {
            let queue = self.get_queue(&name)?;
            queue.push(routing_key, message.clone(), self.queue_capacity)?;
            pushed_counter += 1;
        }

        debug!(pushed_counter, "message routed");
        Ok(pushed_counter)
    }

    /// Pops one message from the queue without starting a consumer.
    #[instrument(skip_all, fields(queue_name=%queue_name))]
    pub fn consume_one(&self, queue_name: &QueueName) -> Result<Option<Delivery>, TransportError> {
        self.ensure_connected()?;
        let queue = self.get_queue(queue_name)?;

        Ok(queue.pop()?.map(|(routing_key, message)| Delivery {
            queue_name: queue_name.to_owned(),
            delivery_tag: self.next_delivery_tag.fetch_add(1, Ordering::SeqCst) + 1,
            routing_key,
            message,
        }))
    }

    pub fn queue_len(&self, queue_name: &QueueName) -> Result<usize, TransportError> {
        Ok(self.get_queue(queue_name)?.len())
    }

    pub fn get_queues_list(&self) -> Result<Vec<QueueName>, TransportError> {
        let queues_read = self.queues.read().map_err(|e| {
            error!(error=%e, "queues are unavailable");
            TransportError::Unavailable("queues are unavailable".to_string())
        })?;
        let mut result: Vec<_> = queues_read.keys().cloned().collect();
        result.sort();
        Ok(result)
    }

    pub fn get_exchanges_list(&self) -> Result<Vec<ExchangeName>, TransportError> {
        let exchanges_read = self.exchanges.read().map_err(|e| {
            error!(error=%e, "exchanges are unavailable");
            TransportError::Unavailable("exchanges are unavailable".to_string())
        })?;
        let mut result: Vec<_> = exchanges_read.keys().cloned().collect();
        result.sort();
        Ok(result)
    }

    pub fn start_consuming_task(&self, queue_name: &QueueName) -> Result<DeliveryStream, TransportError> {
        self.ensure_connected()?;
        let queue = self.get_queue(queue_name)?;

        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        let mut shutdown = self.shutdown.subscribe();
        let delivery_tags = self.next_delivery_tag.clone();
        let queue_name = queue_name.clone();

        let span = info_span!("start_consuming_task", queue_name=%queue_name);
        span.in_scope(|| {
            info!("spawning consuming task");
        });

        tokio::spawn(
            async move {
                loop {
                    let next = match queue.pop() {
                        Ok(next) => next,
                        Err(e) => {
                            error!(error=%e, "stopping consumer");
                            break;
                        }
                    };

                    match next {
                        Some((routing_key, message)) => {
                            let delivery = Delivery {
                                queue_name: queue_name.clone(),
                                delivery_tag: delivery_tags.fetch_add(1, Ordering::SeqCst) + 1,
                                routing_key,
                                message,
                            };
                            if let Err(e) = tx.send(delivery).await {
                                let returned = e.0;
                                queue.requeue(returned.routing_key, returned.message);
                                info!("consumer cancelled");
                                break;
                            }
                        }
                        None => {
                            tokio::select! {
                                _ = queue.notify.notified() => {}
                                _ = tx.closed() => {
                                    info!("consumer cancelled");
                                    break;
                                }
                                _ = shutdown.changed() => {
                                    info!("broker closed, stopping consumer");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            .instrument(span),
        );

        Ok(ReceiverStream::new(rx))
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn declare_exchange(&self, exchange_name: &ExchangeName) -> Result<(), TransportError> {
        self.add_exchange(exchange_name)
    }

    async fn declare_queue(&self, queue_name: &QueueName) -> Result<(), TransportError> {
        self.add_queue(queue_name)
    }

    async fn bind_queue(
        &self,
        queue_name: &QueueName,
        exchange_name: &ExchangeName,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.bind_queue_to_exchange(queue_name, exchange_name, routing_key)
    }

    async fn publish(
        &self,
        exchange_name: &ExchangeName,
        routing_key: &str,
        message: Message,
    ) -> Result<(), TransportError> {
        self.forward_message(exchange_name, routing_key, message)
            .map(|_| ())
    }

    async fn consume(&self, queue_name: &QueueName) -> Result<DeliveryStream, TransportError> {
        self.start_consuming_task(queue_name)
    }

    async fn close(&self) -> Result<(), TransportError> {
        info!("closing broker");
        self.shutdown.send_replace(true);
        Ok(())
    }
}
