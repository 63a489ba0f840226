//! End-to-end tests for the offload protocol
//!
//! Each scenario runs once against the in-memory account and once against a
//! filesystem account in a temporary directory.

#[macro_use]
mod common;

use bytes::Bytes;
use common::{Record, TestEnv};
use overflow_queue_core::{
    CallOptions, MessageContent, QueueManager, QueueManagerError, ReceiveOptions,
    RequestContext, SendOptions,
};
use std::collections::BTreeSet;
use std::sync::Arc;

backend_tests!(
    small_record_round_trip,
    large_payload_offloaded_and_deleted,
    threshold_boundary_selects_path,
    raw_text_message_is_not_an_envelope,
    missing_blob_fails_receive,
    expired_visibility_redelivers_offloaded_payload,
    concurrent_producers_and_consumers,
    second_account_sees_offloaded_messages,
    producers_on_two_accounts_lose_nothing,
);

fn call() -> CallOptions {
    CallOptions::default()
}

async fn small_record_round_trip(env: &TestEnv) {
    let manager = env.manager("orders").await;
    let record: Vec<u8> = (0..10).collect();

    let sent = manager.send(&record, &SendOptions::default()).await.unwrap();
    assert!(sent.blob_name.is_none());

    let received = manager
        .receive::<Vec<u8>>(&ReceiveOptions::default())
        .await
        .unwrap()
        .expect("message should be available");
    assert_eq!(received.content, MessageContent::Payload(record));
    assert!(received.blob_name.is_none());

    manager.delete(&received, &call()).await.unwrap();
    assert!(manager
        .receive::<Vec<u8>>(&ReceiveOptions::default())
        .await
        .unwrap()
        .is_none());
}

async fn large_payload_offloaded_and_deleted(env: &TestEnv) {
    let manager = env.manager("orders").await;
    let payload = "x".repeat(100_000);

    let sent = manager.send(&payload, &SendOptions::default()).await.unwrap();
    let blob_name = sent.blob_name.clone().expect("payload should be offloaded");
    assert_eq!(env.blob_names().await, vec![blob_name.clone()]);

    let received = manager
        .receive::<String>(&ReceiveOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.content.payload(), Some(&payload));
    assert_eq!(received.blob_name.as_ref(), Some(&blob_name));

    manager.delete(&received, &call()).await.unwrap();
    assert!(env.blob_names().await.is_empty());
    assert_eq!(
        manager
            .fetch_attributes(&call())
            .await
            .unwrap()
            .approximate_message_count,
        0
    );
}

async fn threshold_boundary_selects_path(env: &TestEnv) {
    let manager = env.manager("boundary").await;
    let threshold = manager.threshold().bytes();

    // A JSON string of n plain characters frames to n + 27 bytes
    let overhead = serde_json::to_vec(&serde_json::json!({"kind": "inline", "body": ""}))
        .unwrap()
        .len();
    let at_threshold = "b".repeat(threshold - overhead);
    let over_threshold = "b".repeat(threshold - overhead + 1);

    let direct = manager
        .send(&at_threshold, &SendOptions::default())
        .await
        .unwrap();
    let offloaded = manager
        .send(&over_threshold, &SendOptions::default())
        .await
        .unwrap();

    assert!(direct.blob_name.is_none());
    assert!(offloaded.blob_name.is_some());

    for expected in [&at_threshold, &over_threshold] {
        let received = manager
            .receive::<String>(&ReceiveOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.content.payload(), Some(expected));
        manager.delete(&received, &call()).await.unwrap();
    }
}

async fn raw_text_message_is_not_an_envelope(env: &TestEnv) {
    let manager = env.manager("legacy").await;
    env.queue("legacy")
        .add_message(
            Bytes::from(r#"{"blob_name":"looks-like-a-pointer"}"#),
            None,
            None,
            &RequestContext::default(),
        )
        .await
        .unwrap();

    let received = manager
        .receive::<Record>(&ReceiveOptions::default())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        received.content.text(),
        Some(r#"{"blob_name":"looks-like-a-pointer"}"#)
    );
    assert!(received.blob_name.is_none());
    manager.delete(&received, &call()).await.unwrap();
}

async fn missing_blob_fails_receive(env: &TestEnv) {
    let manager = env.manager("orders").await;
    let sent = manager
        .send(&Record::new(1, 120_000), &SendOptions::default())
        .await
        .unwrap();

    env.container()
        .delete(sent.blob_name.as_ref().unwrap(), &RequestContext::default())
        .await
        .unwrap();

    let result = manager
        .receive::<Record>(&ReceiveOptions::default())
        .await;

    match result {
        Err(QueueManagerError::Blob { source, .. }) => assert!(source.is_not_found()),
        other => panic!("Expected missing blob error, got {:?}", other),
    }
}

async fn expired_visibility_redelivers_offloaded_payload(env: &TestEnv) {
    let manager = env.manager("orders").await;
    let record = Record::new(7, 90_000);
    manager.send(&record, &SendOptions::default()).await.unwrap();

    let options = ReceiveOptions::new().with_visibility_timeout(chrono::Duration::seconds(1));
    let first = manager.receive::<Record>(&options).await.unwrap().unwrap();
    assert!(manager
        .receive::<Record>(&options)
        .await
        .unwrap()
        .is_none());

    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

    let second = manager.receive::<Record>(&options).await.unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.dequeue_count, 2);
    assert_eq!(second.blob_name, first.blob_name);
    assert_eq!(second.content.payload(), Some(&record));

    // The first delivery's receipt is stale now
    assert!(manager.delete(&first, &call()).await.is_err());
    manager.delete(&second, &call()).await.unwrap();
    assert!(env.blob_names().await.is_empty());
}

async fn concurrent_producers_and_consumers(env: &TestEnv) {
    let manager = Arc::new(env.manager("busy").await);
    let total: u32 = 12;

    let mut producers = Vec::new();
    for sequence in 0..total {
        let manager = Arc::clone(&manager);
        producers.push(tokio::spawn(async move {
            // Every third record is large enough to be offloaded
            let size = if sequence % 3 == 0 { 70_000 } else { 100 };
            manager
                .send(&Record::new(sequence, size), &SendOptions::default())
                .await
                .unwrap();
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    let mut consumers = Vec::new();
    for _ in 0..3 {
        let manager = Arc::clone(&manager);
        consumers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(message) = manager
                .receive::<Record>(&ReceiveOptions::default())
                .await
                .unwrap()
            {
                let record = message.content.payload().cloned().unwrap();
                assert_eq!(message.is_offloaded(), record.sequence % 3 == 0);
                manager.delete(&message, &CallOptions::default()).await.unwrap();
                seen.push(record.sequence);
            }
            seen
        }));
    }

    let mut delivered = BTreeSet::new();
    for consumer in consumers {
        for sequence in consumer.await.unwrap() {
            assert!(delivered.insert(sequence), "record {} delivered twice", sequence);
        }
    }

    assert_eq!(delivered, (0..total).collect::<BTreeSet<_>>());
    assert!(env.blob_names().await.is_empty());
}

async fn second_account_sees_offloaded_messages(env: &TestEnv) {
    let producer = env.manager("shared").await;
    let record = Record::new(3, 80_000);
    producer.send(&record, &SendOptions::default()).await.unwrap();

    let other = env.reopen();
    let consumer = QueueManager::new(other.as_ref(), "shared").await.unwrap();

    let received = consumer
        .receive::<Record>(&ReceiveOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.content.payload(), Some(&record));
    consumer.delete(&received, &call()).await.unwrap();

    assert!(env.blob_names().await.is_empty());
}

async fn producers_on_two_accounts_lose_nothing(env: &TestEnv) {
    let first = Arc::new(env.manager("shared").await);
    let other = env.reopen();
    let second = Arc::new(QueueManager::new(other.as_ref(), "shared").await.unwrap());
    let total: u32 = 30;

    let mut producers = Vec::new();
    for sequence in 0..total {
        let manager = if sequence % 2 == 0 {
            Arc::clone(&first)
        } else {
            Arc::clone(&second)
        };
        producers.push(tokio::spawn(async move {
            let size = if sequence % 5 == 0 { 60_000 } else { 50 };
            manager
                .send(&Record::new(sequence, size), &SendOptions::default())
                .await
                .unwrap();
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    assert_eq!(
        first
            .fetch_attributes(&call())
            .await
            .unwrap()
            .approximate_message_count,
        u64::from(total)
    );
    assert_eq!(env.blob_names().await.len(), 6);
}
