//! Acknowledged delivery through the broker's meta protocol.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use vesper_broker::{ext::AckState, meta, Broker, BrokerConfig, ConnectResponse};
use vesper_core::{config::AckConfig, ChannelId, Message, SessionId};

fn handshake(broker: &Broker, ack: bool) -> (SessionId, Message) {
    let reply = broker
        .handshake(Message::builder(meta::HANDSHAKE).unwrap().ext("ack", ack).build())
        .unwrap();
    (reply.client_id.clone().unwrap(), reply)
}

fn connect(broker: &Broker, session: &SessionId, id: u64, ack: Value) -> ConnectResponse {
    let message = Message::builder(meta::CONNECT)
        .unwrap()
        .id(id)
        .client_id(session.clone())
        .ext("ack", ack)
        .build();
    broker.connect(message).unwrap()
}

fn publish(broker: &Broker, text: &str, lazy: bool) {
    let message = Message::builder("/chat/lobby").unwrap().data(text).lazy(lazy).build();
    broker.publish(message).unwrap();
}

fn texts(response: &ConnectResponse) -> Vec<&str> {
    response.messages.iter().filter_map(|m| m.data.as_str()).collect()
}

fn ack_of(response: &ConnectResponse) -> Option<u64> {
    response.reply.ext_value("ack").and_then(Value::as_u64)
}

fn subscribed_broker() -> (Broker, SessionId) {
    vesper_core::telemetry::try_init_for_tests();
    let broker = Broker::default();
    let (session, reply) = handshake(&broker, true);
    assert_eq!(reply.ext_value("ack"), Some(&json!(true)));
    broker.subscribe(&session, &ChannelId::parse("/chat/**").unwrap()).unwrap();
    (broker, session)
}

#[test]
fn test_lost_connect_response_is_resent() {
    let (broker, session) = subscribed_broker();

    let first = connect(&broker, &session, 1, json!(-1));
    assert!(!first.held);
    assert!(first.messages.is_empty());
    assert_eq!(ack_of(&first), Some(1));

    publish(&broker, "m1", false);
    let second = connect(&broker, &session, 2, json!(1));
    assert!(!second.held);
    assert_eq!(texts(&second), ["m1"]);
    assert_eq!(ack_of(&second), Some(2));

    // The client never saw the second response and acknowledges batch 1 again.
    let third = connect(&broker, &session, 3, json!(1));
    assert!(!third.held);
    assert_eq!(texts(&third), ["m1"]);
    assert_eq!(third.messages[0], second.messages[0]);
    assert_eq!(ack_of(&third), Some(3));

    let fourth = connect(&broker, &session, 4, json!(3));
    assert!(fourth.held);
    assert_eq!(broker.session(&session).unwrap().ack_state(), Some(AckState::Empty));
}

#[test]
fn test_partial_acknowledgement_keeps_later_batches() {
    let (broker, session) = subscribed_broker();
    connect(&broker, &session, 0, json!(-1));

    for (id, text) in [(1, "a"), (2, "b"), (3, "c")] {
        publish(&broker, text, false);
        // Acknowledge nothing so every batch stays queued.
        connect(&broker, &session, id, json!(0));
    }
    let server_session = broker.session(&session).unwrap();
    assert_eq!(server_session.queue_len(), 3);

    // Batches 2..4 carried "a", "b" and "c"; acknowledging 3 leaves "c".
    let response = connect(&broker, &session, 5, json!(3));
    assert_eq!(texts(&response), ["c"]);
    assert_eq!(server_session.ack_state(), Some(AckState::ResendRequired));
}

#[test]
fn test_lazy_messages_do_not_release_held_connect() {
    let (broker, session) = subscribed_broker();
    connect(&broker, &session, 1, json!(-1));

    publish(&broker, "lazy", true);
    let held = connect(&broker, &session, 2, json!(1));
    assert!(held.held);
    assert!(held.messages.is_empty());

    let resumed = broker.resume_connect(held.reply).unwrap();
    assert_eq!(texts(&resumed), ["lazy"]);
    assert_eq!(ack_of(&resumed), Some(2));
}

#[test]
fn test_unacknowledged_session_is_unaffected() {
    vesper_core::telemetry::try_init_for_tests();
    let broker = Broker::default();
    let (session, reply) = handshake(&broker, false);
    assert_eq!(reply.ext_value("ack"), None);
    broker.subscribe(&session, &ChannelId::parse("/chat/lobby").unwrap()).unwrap();

    publish(&broker, "m1", false);
    let response = connect(&broker, &session, 1, json!(0));
    assert_eq!(texts(&response), ["m1"]);
    assert_eq!(ack_of(&response), None);
    assert_eq!(broker.session(&session).unwrap().queue_len(), 0);
}

#[test]
fn test_queue_maxed_listener_is_notified() {
    let config = BrokerConfig {
        ack: AckConfig { max_queue_size: Some(2), initial_capacity: 4 },
        ..BrokerConfig::default()
    };
    let broker = Broker::new(config);
    let maxed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&maxed);
    broker.add_queue_maxed_listener(move |session: &SessionId, size: usize| {
        sink.lock().push((session.clone(), size));
    });

    let (session, _) = handshake(&broker, true);
    broker.subscribe(&session, &ChannelId::parse("/chat/*").unwrap()).unwrap();
    publish(&broker, "1", false);
    publish(&broker, "2", false);
    let outcome = broker
        .publish(Message::builder("/chat/lobby").unwrap().data("3").build())
        .unwrap();

    assert_eq!(outcome.maxed, [session.clone()]);
    assert_eq!(*maxed.lock(), [(session.clone(), 3)]);
    // The session is left for its owner to deal with.
    assert!(broker.session(&session).is_some());
}

#[test]
fn test_disconnect_clears_unacknowledged_messages() {
    let (broker, session) = subscribed_broker();
    publish(&broker, "m1", false);
    let server_session = broker.session(&session).unwrap();
    assert_eq!(server_session.queue_len(), 1);

    broker.disconnect(&session).unwrap();
    assert_eq!(server_session.queue_len(), 0);
    assert!(broker.session(&session).is_none());
}
