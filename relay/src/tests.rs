use std::sync::Arc;
use std::time::Duration;

use internals::{BrokerClient, Message, TransportError, CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT};
use queues::InMemoryBroker;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::tests_utils::*;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn text_message_lands_once_on_plain_queue() {
    let (broker, topology, publisher) = setup_publisher().await;

    publisher.send_message("hello").await.unwrap();

    let delivery = broker
        .consume_one(&topology.plain().queue_name)
        .unwrap()
        .expect("plain queue should hold the message");
    assert_eq!(delivery.payload(), b"hello");
    assert_eq!(delivery.content_type(), Some(CONTENT_TYPE_TEXT));
    assert_eq!(delivery.routing_key, "relay_routing_key");

    assert!(broker.consume_one(&topology.plain().queue_name).unwrap().is_none());
    assert_eq!(broker.queue_len(&topology.json().queue_name).unwrap(), 0);
}

#[tokio::test]
async fn record_lands_on_json_queue_and_decodes() {
    let (broker, topology, publisher) = setup_publisher().await;
    let user = User::new(7, "Ada", "Lovelace");

    publisher.send_json_message(&user).await.unwrap();

    let delivery = broker
        .consume_one(&topology.json().queue_name)
        .unwrap()
        .expect("json queue should hold the record");
    assert_eq!(delivery.content_type(), Some(CONTENT_TYPE_JSON));
    let decoded: User = JsonCodec::new().decode_delivery(&delivery).unwrap();
    assert_eq!(decoded, user);
    assert_eq!(broker.queue_len(&topology.plain().queue_name).unwrap(), 0);
}

#[tokio::test]
async fn routing_keys_are_exclusive() {
    let (broker, topology, publisher) = setup_publisher().await;

    for i in 0..5 {
        publisher.send_message(&format!("text {i}")).await.unwrap();
        publisher
            .send_json_message(&User::new(i, "Ada", "Lovelace"))
            .await
            .unwrap();
    }

    assert_eq!(broker.queue_len(&topology.plain().queue_name).unwrap(), 5);
    assert_eq!(broker.queue_len(&topology.json().queue_name).unwrap(), 5);

    while let Some(delivery) = broker.consume_one(&topology.plain().queue_name).unwrap() {
        assert_eq!(delivery.routing_key, topology.plain().routing_key);
        assert!(std::str::from_utf8(delivery.payload()).unwrap().starts_with("text"));
    }
    while let Some(delivery) = broker.consume_one(&topology.json().queue_name).unwrap() {
        assert_eq!(delivery.routing_key, topology.json().routing_key);
        let _: User = JsonCodec::new().decode_delivery(&delivery).unwrap();
    }
}

#[tokio::test]
async fn publish_fails_while_disconnected_and_recovers() {
    let (broker, topology, publisher) = setup_publisher().await;

    broker.disconnect();
    let result = publisher.send_message("lost").await;
    assert!(matches!(
        result,
        Err(PublishError::Transport(TransportError::Unavailable(_)))
    ));
    let result = publisher.send_json_message(&User::new(1, "Ada", "")).await;
    assert!(matches!(result, Err(PublishError::Transport(_))));

    broker.reconnect();
    assert_eq!(broker.queue_len(&topology.plain().queue_name).unwrap(), 0);
    assert_eq!(broker.queue_len(&topology.json().queue_name).unwrap(), 0);

    publisher.send_message("back").await.unwrap();
    let delivery = broker
        .consume_one(&topology.plain().queue_name)
        .unwrap()
        .unwrap();
    assert_eq!(delivery.payload(), b"back");
    assert_eq!(broker.queue_len(&topology.json().queue_name).unwrap(), 0);
}

#[tokio::test]
async fn unconfirmed_publish_times_out() {
    let broker = Arc::new(StalledBroker::new());
    let topology = Topology::from_settings(&topology_settings());
    topology.declare(broker.as_ref()).await.unwrap();

    let confirm_timeout = Duration::from_millis(50);
    let publisher = Publisher::new(broker, &topology, JsonCodec::new(), confirm_timeout);

    let result = publisher.send_message("stuck").await;
    assert!(matches!(result, Err(PublishError::ConfirmTimeout(t)) if t == confirm_timeout));
}

#[tokio::test]
async fn publish_is_logged() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let (_broker, _topology, publisher) = setup_publisher().await;

    publisher.send_message("hello world").await.unwrap();
    publisher
        .send_json_message(&User::new(1, "Ada", "Lovelace"))
        .await
        .unwrap();

    let contents = logs.contents();
    assert!(contents.contains("Message sent -> hello world"));
    assert!(contents.contains("Json message sent -> User{id=1, firstName='Ada', lastName='Lovelace'}"));
}

#[tokio::test]
async fn relay_start_declares_and_listens() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = Relay::start(&settings(), broker.clone()).await.unwrap();

    assert_eq!(relay.topology().exchange_name(), "relay_exchange");
    assert_eq!(relay.listener_count(), 2);
    assert_eq!(broker.get_exchanges_list().unwrap(), vec!["relay_exchange"]);
    assert_eq!(
        broker.get_queues_list().unwrap(),
        vec!["relay_json_queue", "relay_queue"]
    );

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn relay_does_not_start_with_missing_name() {
    let broker = Arc::new(InMemoryBroker::new());
    let mut settings = settings();
    settings.topology.json_routing_key = "  ".to_string();

    let result = Relay::start(&settings, broker.clone()).await;
    assert!(matches!(
        result,
        Err(RelayError::Config(ConfigError::MissingSetting("topology.json_routing_key")))
    ));
    assert!(broker.get_exchanges_list().unwrap().is_empty());
    assert!(broker.get_queues_list().unwrap().is_empty());
}

#[tokio::test]
async fn relay_does_not_start_when_broker_is_down() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.disconnect();

    let result = Relay::start(&settings(), broker).await;
    assert!(matches!(
        result,
        Err(RelayError::Transport(TransportError::Unavailable(_)))
    ));
}

#[tokio::test]
async fn default_listeners_log_what_they_receive() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let broker = Arc::new(InMemoryBroker::new());
    let relay = Relay::start(&settings(), broker.clone()).await.unwrap();
    let publisher = relay.publisher();

    publisher.send_message("hello world").await.unwrap();
    publisher
        .send_json_message(&User::new(0, "Ada", ""))
        .await
        .unwrap();

    assert!(logs.wait_for("Received message -> hello world").await);
    assert!(
        logs.wait_for("Received JSON message -> User{id=0, firstName='Ada', lastName=''}")
            .await
    );

    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn typed_listener_gets_minimal_record() {
    let broker = Arc::new(InMemoryBroker::new());
    Topology::from_settings(&topology_settings())
        .declare(broker.as_ref())
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriber = Subscriber::new(broker.clone(), JsonCodec::new());
    subscriber
        .subscribe_json::<User, _>(&"relay_json_queue".to_string(), move |user| {
            let _ = tx.send(user);
        })
        .await
        .unwrap();

    let message = Message::new(br#"{"firstName":"Ada"}"#.to_vec()).with_content_type(CONTENT_TYPE_JSON);
    broker
        .publish(&"relay_exchange".to_string(), "relay_json_routing_key", message)
        .await
        .unwrap();

    let user = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(user, User::new(0, "Ada", ""));

    subscriber.shutdown().await;
}

#[tokio::test]
async fn typed_listener_gets_record_without_first_name() {
    let (broker, topology, _publisher) = setup_publisher().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriber = Subscriber::new(broker.clone(), JsonCodec::new());
    subscriber
        .subscribe_json::<User, _>(&topology.json().queue_name, move |user| {
            let _ = tx.send(user);
        })
        .await
        .unwrap();

    let message =
        Message::new(br#"{"id":1,"lastName":"Hopper"}"#.to_vec()).with_content_type(CONTENT_TYPE_JSON);
    broker
        .publish(topology.exchange_name(), &topology.json().routing_key, message)
        .await
        .unwrap();

    let user = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(user, User::new(1, "", "Hopper"));

    subscriber.shutdown().await;
}

#[tokio::test]
async fn malformed_delivery_is_dropped_and_listener_continues() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let (broker, topology, publisher) = setup_publisher().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriber = Subscriber::new(broker.clone(), JsonCodec::new());
    subscriber
        .subscribe_json::<User, _>(&topology.json().queue_name, move |user| {
            let _ = tx.send(user);
        })
        .await
        .unwrap();

    let exchange_name = topology.exchange_name().clone();
    let json_key = topology.json().routing_key.clone();
    let payloads: [&[u8]; 2] = [b"not json", br#"{"firstName":["Grace"]}"#];
    for payload in payloads {
        let message = Message::new(payload.to_vec()).with_content_type(CONTENT_TYPE_JSON);
        broker.publish(&exchange_name, &json_key, message).await.unwrap();
    }
    let message = Message::new(br#"{"firstName":"Ada"}"#.to_vec()).with_content_type(CONTENT_TYPE_TEXT);
    broker.publish(&exchange_name, &json_key, message).await.unwrap();

    publisher
        .send_json_message(&User::new(2, "Grace", "Hopper"))
        .await
        .unwrap();

    let user = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(user, User::new(2, "Grace", "Hopper"));
    assert!(rx.try_recv().is_err());
    assert_eq!(
        logs.contents()
            .matches("dropping message that could not be handled")
            .count(),
        3
    );

    subscriber.shutdown().await;
}

#[tokio::test]
async fn non_utf8_text_is_dropped() {
    let (broker, topology, publisher) = setup_publisher().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriber = Subscriber::new(broker.clone(), JsonCodec::new());
    subscriber
        .subscribe(&topology.plain().queue_name, move |text| {
            let _ = tx.send(text);
        })
        .await
        .unwrap();

    broker
        .publish(
            topology.exchange_name(),
            &topology.plain().routing_key,
            Message::new(vec![0xff, 0xfe, 0xfd]),
        )
        .await
        .unwrap();
    publisher.send_message("still alive").await.unwrap();

    let text = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(text, "still alive");

    subscriber.shutdown().await;
}

#[tokio::test]
async fn listeners_preserve_queue_order() {
    let (broker, topology, publisher) = setup_publisher().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriber = Subscriber::new(broker.clone(), JsonCodec::new());
    subscriber
        .subscribe(&topology.plain().queue_name, move |text| {
            let _ = tx.send(text);
        })
        .await
        .unwrap();

    for i in 0..20 {
        publisher.send_message(&format!("m{i}")).await.unwrap();
    }

    for i in 0..20 {
        let text = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(text, format!("m{i}"));
    }

    subscriber.shutdown().await;
}

#[tokio::test]
async fn subscribing_to_unknown_queue_fails() {
    let (broker, _topology, _publisher) = setup_publisher().await;
    let mut subscriber = Subscriber::new(broker, JsonCodec::new());

    let result = subscriber
        .subscribe(&"missing".to_string(), |_| {})
        .await;
    assert!(matches!(
        result,
        Err(SubscribeError::Transport { ref queue_name, source: TransportError::QueueNotFound(_) })
            if queue_name == "missing"
    ));
    assert_eq!(subscriber.listener_count(), 0);
}

#[tokio::test]
async fn shutdown_stops_consuming() {
    let (broker, topology, publisher) = setup_publisher().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriber = Subscriber::new(broker.clone(), JsonCodec::new());
    subscriber
        .subscribe(&topology.plain().queue_name, move |text| {
            let _ = tx.send(text);
        })
        .await
        .unwrap();

    subscriber.shutdown().await;
    publisher.send_message("after shutdown").await.unwrap();

    assert_eq!(timeout(RECV_TIMEOUT, rx.recv()).await.unwrap(), None);
    assert_eq!(broker.queue_len(&topology.plain().queue_name).unwrap(), 1);
}
