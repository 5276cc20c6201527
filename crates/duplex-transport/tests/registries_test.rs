//! Integration tests for the duplex registries and replay buffer.

use std::sync::Arc;

use duplex_transport::duplex::{
    BufferEntry, CorrelationRegistry, IdGenerator, MessageId, ReplayBuffer, Response,
    SubscriptionRegistry, Update, task,
};
use parking_lot::Mutex;
use serde_json::json;

fn data_update(path: &str) -> Update {
    Update {
        event: "data".to_string(),
        path: path.to_string(),
        data: json!(null),
    }
}

// ============================================================================
// CorrelationRegistry Tests
// ============================================================================

#[test]
fn test_correlation_many_in_flight() {
    let mut ids = IdGenerator::new();
    let mut registry = CorrelationRegistry::new();
    let answered = Arc::new(Mutex::new(Vec::new()));

    let issued: Vec<MessageId> = (0..50).map(|_| ids.next_id()).collect();
    for id in &issued {
        let answered = answered.clone();
        registry.register(
            *id,
            Box::new(move |response: Response| answered.lock().push(response.id)),
        );
    }

    // answer in reverse order
    for id in issued.iter().rev() {
        let response = Response {
            id: *id,
            task: task::DEVICE_DATA_GET.to_string(),
            code: None,
            payload: json!({}),
        };
        assert!(registry.resolve(*id, response));
    }

    let answered = answered.lock();
    assert_eq!(answered.len(), 50);
    assert_eq!(answered.first(), issued.last());
    assert!(registry.is_empty());
}

// ============================================================================
// SubscriptionRegistry Tests
// ============================================================================

#[test]
fn test_one_update_fans_out() {
    let mut registry = SubscriptionRegistry::new();
    let hits = Arc::new(Mutex::new(Vec::new()));

    for (n, topic) in ["data/", "data/sensors/", "data/sensors/t1", "data/sensors/t2"]
        .into_iter()
        .enumerate()
    {
        let hits = hits.clone();
        registry.register(
            topic.into(),
            MessageId::new(n as u64),
            Box::new(move |_: &Update| hits.lock().push(topic)),
        );
    }

    let update = data_update("sensors/t1");
    assert_eq!(registry.match_and_emit(&update.topic_path(), &update), 3);

    let mut hits = hits.lock().clone();
    hits.sort_unstable();
    assert_eq!(hits, vec!["data/", "data/sensors/", "data/sensors/t1"]);
}

#[test]
fn test_handlers_are_stateful() {
    let mut registry = SubscriptionRegistry::new();
    let total = Arc::new(Mutex::new(0));
    let sink = total.clone();
    let mut count = 0;

    registry.register(
        "data/".into(),
        MessageId::new(1),
        Box::new(move |_: &Update| {
            count += 1;
            *sink.lock() = count;
        }),
    );

    for _ in 0..3 {
        let update = data_update("x");
        registry.match_and_emit("data/x", &update);
    }
    assert_eq!(*total.lock(), 3);
}

// ============================================================================
// ReplayBuffer Tests
// ============================================================================

#[test]
fn test_replay_order_follows_generated_ids() {
    let mut ids = IdGenerator::new();
    let mut buffer = ReplayBuffer::new(64);

    let mut expected = Vec::new();
    for n in 0..10 {
        let id = ids.next_id();
        expected.push(id);
        buffer.push(
            id,
            BufferEntry {
                task: task::DEVICE_DATA_SET.to_string(),
                topic: None,
                message: format!("m{n}"),
            },
        );
    }

    let replayed: Vec<MessageId> = buffer.iter().map(|(id, _)| id).collect();
    assert_eq!(replayed, expected);
    assert_eq!(
        buffer.iter().map(|(_, entry)| entry.message.as_str()).next(),
        Some("m0")
    );
}
