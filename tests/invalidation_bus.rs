mod common;

use std::sync::Arc;

use community_cache::domain::entities::{Poll, PollStatus, VoterKey};
use community_cache::domain::keys::{CacheKey, EntityKind, KeyPattern};
use community_cache::infrastructure::bus::{BusTransport, MemoryBroker, Route};
use community_cache::infrastructure::cache::{CacheBackend, MemoryBackend};

use common::{FakePollRepository, FakeVoteRepository, Process, wait_until};

#[tokio::test]
async fn test_broadcast_evicts_in_other_process() {
    let broker = Arc::new(MemoryBroker::new());
    let a = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;
    let b = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;

    b.backend.set_ex("user:42", "cached", 3600).await.unwrap();
    b.backend.set_ex("user:43", "cached", 3600).await.unwrap();

    a.bus
        .publish_broadcast(vec!["user:42".to_string()], "user")
        .await
        .unwrap();

    wait_until(|| !b.backend.contains("user:42")).await;
    assert!(b.backend.contains("user:43"));

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_routed_publish_reaches_only_matching_bindings() {
    let broker = Arc::new(MemoryBroker::new());
    let publisher = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;
    let topics = Process::start(&broker, Arc::new(MemoryBackend::new()), &["topic.*"]).await;
    let polls = Process::start(&broker, Arc::new(MemoryBackend::new()), &["poll.#"]).await;

    for process in [&topics, &polls] {
        process
            .backend
            .set_ex("topic:9:members", "x", 3600)
            .await
            .unwrap();
    }

    publisher
        .bus
        .publish_routed(vec!["topic:9:*".to_string()], "topic", "topic.members")
        .await
        .unwrap();

    wait_until(|| !topics.backend.contains("topic:9:members")).await;

    // A later broadcast is processed after the routed message on every queue, so
    // once it lands the poll-bound process has provably skipped the routed one.
    polls.backend.set_ex("user:1", "x", 3600).await.unwrap();
    publisher
        .bus
        .publish_broadcast(vec!["user:1".to_string()], "user")
        .await
        .unwrap();
    wait_until(|| !polls.backend.contains("user:1")).await;
    assert!(polls.backend.contains("topic:9:members"));

    publisher.stop().await;
    topics.stop().await;
    polls.stop().await;
}

#[tokio::test]
async fn test_duplicate_invalidation_is_idempotent() {
    let broker = Arc::new(MemoryBroker::new());
    let process = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;
    process.backend.set_ex("user:7", "x", 3600).await.unwrap();
    process.backend.set_ex("user:8", "x", 3600).await.unwrap();

    for _ in 0..3 {
        process
            .bus
            .publish_broadcast(vec!["user:7".to_string()], "user")
            .await
            .unwrap();
    }

    wait_until(|| broker.acked() == 3).await;
    assert!(!process.backend.contains("user:7"));
    assert!(process.backend.contains("user:8"));
    assert_eq!(broker.rejected(), 0);

    process.stop().await;
}

#[tokio::test]
async fn test_prefix_invalidation_stays_in_scope() {
    let broker = Arc::new(MemoryBroker::new());
    let process = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;
    for key in [
        "topic:9:members",
        "topic:9:requests",
        "topic:90:members",
        "channel:9:members",
    ] {
        process.backend.set_ex(key, "x", 3600).await.unwrap();
    }

    process
        .bus
        .publish_broadcast(vec!["topic:9:*".to_string()], "topic")
        .await
        .unwrap();

    wait_until(|| !process.backend.contains("topic:9:requests")).await;
    assert!(!process.backend.contains("topic:9:members"));
    assert!(process.backend.contains("topic:90:members"));
    assert!(process.backend.contains("channel:9:members"));

    process.stop().await;
}

#[tokio::test]
async fn test_bare_wildcard_never_flushes_keyspace() {
    let broker = Arc::new(MemoryBroker::new());
    let process = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;
    process.backend.set_ex("user:1", "x", 3600).await.unwrap();

    process
        .bus
        .publish_broadcast(vec!["*".to_string(), String::new()], "admin")
        .await
        .unwrap();

    wait_until(|| broker.acked() == 1).await;
    assert!(process.backend.contains("user:1"));

    process.stop().await;
}

#[tokio::test]
async fn test_malformed_message_does_not_stop_consumer() {
    let broker = Arc::new(MemoryBroker::new());
    let process = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;
    process.backend.set_ex("user:2", "x", 3600).await.unwrap();

    broker
        .publish(&Route::Broadcast, b"definitely not json")
        .await
        .unwrap();
    process
        .bus
        .publish_broadcast(vec!["user:2".to_string()], "user")
        .await
        .unwrap();

    wait_until(|| !process.backend.contains("user:2")).await;
    assert_eq!(broker.rejected(), 1);

    process.stop().await;
}

#[tokio::test]
async fn test_closed_poll_becomes_visible_in_other_process() {
    let broker = Arc::new(MemoryBroker::new());
    let polls = Arc::new(FakePollRepository::with_open_poll(7, &["yes", "no"]));
    let votes = Arc::new(FakeVoteRepository::default());

    let a = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;
    let b = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;
    let service_a = a.vote_service(polls.clone(), votes.clone());
    let service_b = b.vote_service(polls.clone(), votes.clone());

    // Both processes warm their own cached copy of the open poll.
    assert_eq!(service_a.get_poll(7).await.unwrap().status, PollStatus::Open);
    assert_eq!(service_b.get_poll(7).await.unwrap().status, PollStatus::Open);
    let key = CacheKey::new(EntityKind::Poll, 7);
    assert!(b.store.get::<Poll>(&key).await.is_some());

    assert!(service_a.close_poll(7).await.unwrap());

    wait_until(|| !b.backend.contains("poll:7")).await;
    assert_eq!(
        service_b.get_poll(7).await.unwrap().status,
        PollStatus::Closed
    );
    assert!(
        service_b
            .cast_vote(7, VoterKey::User(1), "yes")
            .await
            .is_err()
    );

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn test_unavailable_broker_fails_publish_but_not_cache() {
    let broker = Arc::new(MemoryBroker::new());
    let process = Process::start(&broker, Arc::new(MemoryBackend::new()), &["#"]).await;
    broker.set_available(false);

    let result = process
        .bus
        .publish_broadcast(vec!["user:1".to_string()], "user")
        .await;
    assert!(result.is_err());
    assert!(!process.bus.health_check().await);

    // Local cache operations carry on regardless.
    let pattern = KeyPattern::kind(EntityKind::User);
    process.backend.set_ex("user:1", "x", 3600).await.unwrap();
    assert_eq!(process.store.delete_pattern(&pattern).await, 1);

    process.stop().await;
}
