//! Integration tests for event collection and deferred publication.

use chrono::{TimeDelta, TimeZone, Utc};
use chronicle_core::aggregate::EventSourcedAggregate;
use chronicle_core::error::DomainError;
use chronicle_core::identity_map::IdentityMap;
use chronicle_core::message::DomainEventMessage;
use chronicle_core::publisher::DeferredEventPublisher;
use chronicle_core::queue::{DomainEventQueue, EventQueue};
use chronicle_test_support::{
    FailingDispatcher, ORDER_EVENT_TYPES, Order, OrderEvent, RecordingDispatcher, SteppingClock,
};

fn clock() -> SteppingClock {
    SteppingClock::new(
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        TimeDelta::seconds(1),
    )
}

fn positions(events: &[DomainEventMessage<OrderEvent>]) -> Vec<(&str, i64)> {
    events
        .iter()
        .map(|e| (e.aggregate_id(), e.sequence_number()))
        .collect()
}

/// Tracks order `a` with two events and order `b` with one.
fn two_orders() -> IdentityMap<OrderEvent> {
    let clock = clock();
    let mut map = IdentityMap::new();
    let a = map.track(Order::new("a")).unwrap();
    a.create("ann", &clock).unwrap();
    a.add_item("A-1", 1, &clock).unwrap();
    map.track(Order::new("b"))
        .unwrap()
        .create("bob", &clock)
        .unwrap();
    map
}

// --- identity map ---

#[test]
fn test_identity_map_returns_typed_handles() {
    // Arrange
    let mut map = two_orders();

    // Act
    map.get_mut::<Order>("b")
        .unwrap()
        .ship("ups", &clock())
        .unwrap();

    // Assert
    assert_eq!(map.len(), 2);
    assert!(map.contains("order", "a"));
    assert!(!map.contains("order", "c"));
    assert_eq!(map.get::<Order>("b").unwrap().carrier.as_deref(), Some("ups"));
    assert!(map.get::<Order>("c").is_none());
}

#[test]
fn test_identity_map_rejects_duplicate_identity() {
    let mut map = two_orders();

    let result = map.track(Order::new("a"));

    match result {
        Err(DomainError::AlreadyTracked {
            aggregate_type,
            aggregate_id,
        }) => {
            assert_eq!(aggregate_type, "order");
            assert_eq!(aggregate_id, "a");
        }
        other => panic!("expected AlreadyTracked, got {other:?}"),
    }
}

#[test]
fn test_identity_map_iterates_in_tracking_order() {
    let map = two_orders();

    let tracked: Vec<(&str, usize)> = map
        .iter()
        .map(|a| (a.aggregate_id(), a.uncommitted_events().len()))
        .collect();

    assert_eq!(tracked, vec![("a", 2), ("b", 1)]);
    assert_eq!(format!("{map:?}"), r#"["order a", "order b"]"#);
}

// --- queue ---

#[test]
fn test_dequeue_concatenates_per_aggregate_events_in_tracking_order() {
    // Arrange
    let mut map = two_orders();

    // Act
    let events = DomainEventQueue::new(&mut map).dequeue_all_events();

    // Assert
    assert_eq!(positions(&events), vec![("a", 0), ("a", 1), ("b", 0)]);
    assert!(map.iter().all(|a| a.uncommitted_events().is_empty()));
    assert_eq!(map.get::<Order>("a").unwrap().version(), Some(1));
}

#[test]
fn test_second_dequeue_without_new_applies_is_empty() {
    let mut map = two_orders();
    let mut queue = DomainEventQueue::new(&mut map);

    let first = queue.dequeue_all_events();
    let second = queue.dequeue_all_events();

    assert_eq!(first.len(), 3);
    assert!(second.is_empty());
}

#[test]
fn test_queue_debug_lists_tracked_aggregates() {
    let mut map = two_orders();

    let queue = DomainEventQueue::new(&mut map);

    assert_eq!(
        format!("{queue:?}"),
        r#"DomainEventQueue(["order a", "order b"])"#
    );
}

#[test]
fn test_dequeue_after_commit_continues_sequence() {
    let mut map = two_orders();
    DomainEventQueue::new(&mut map).dequeue_all_events();

    map.get_mut::<Order>("a")
        .unwrap()
        .ship("dhl", &clock())
        .unwrap();
    let events = DomainEventQueue::new(&mut map).dequeue_all_events();

    assert_eq!(positions(&events), vec![("a", 2)]);
}

// --- publisher ---

#[tokio::test]
async fn test_flush_delivers_collected_events_once() {
    // Arrange
    let mut map = two_orders();
    let mut publisher = DeferredEventPublisher::new(RecordingDispatcher::new());

    // Act
    let collected = publisher.collect(&mut DomainEventQueue::new(&mut map));
    let delivered = publisher.flush().await.unwrap();
    let second_flush = publisher.flush().await.unwrap();

    // Assert
    assert_eq!((collected, delivered, second_flush), (3, 3, 0));
    let batches = publisher.dispatcher().batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(positions(&batches[0]), vec![("a", 0), ("a", 1), ("b", 0)]);
}

#[tokio::test]
async fn test_multiple_collects_before_flush_coalesce_into_one_batch() {
    // Arrange
    let clock = clock();
    let mut map = two_orders();
    let mut publisher = DeferredEventPublisher::new(RecordingDispatcher::new());
    publisher.collect(&mut DomainEventQueue::new(&mut map));
    map.get_mut::<Order>("b")
        .unwrap()
        .ship("ups", &clock)
        .unwrap();

    // Act
    publisher.collect(&mut DomainEventQueue::new(&mut map));
    publisher.flush().await.unwrap();

    // Assert
    let batches = publisher.dispatcher().batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        positions(&batches[0]),
        vec![("a", 0), ("a", 1), ("b", 0), ("b", 1)]
    );
}

#[tokio::test]
async fn test_discard_after_rollback_never_delivers() {
    let mut map = two_orders();
    let mut publisher = DeferredEventPublisher::new(RecordingDispatcher::new());
    publisher.collect(&mut DomainEventQueue::new(&mut map));

    let discarded = publisher.discard();
    let delivered = publisher.flush().await.unwrap();

    assert_eq!((discarded, delivered), (3, 0));
    assert!(publisher.dispatcher().batches().is_empty());
}

#[tokio::test]
async fn test_failed_flush_keeps_batch_for_retry() {
    let mut map = two_orders();
    let mut publisher = DeferredEventPublisher::new(FailingDispatcher);
    publisher.collect(&mut DomainEventQueue::new(&mut map));

    let result = publisher.flush().await;

    assert!(matches!(result, Err(DomainError::StorageFailure(_))));
    assert_eq!(publisher.pending().len(), 3);
}

// --- handler coverage ---

#[test]
fn test_order_handlers_cover_every_producible_event() {
    let result = Order::handlers().ensure_covers(ORDER_EVENT_TYPES);

    assert!(result.is_ok());
    assert_eq!(Order::handlers().len(), ORDER_EVENT_TYPES.len());
}
