//! Integration tests for `PgEventTable`.

use chrono::{TimeZone, Utc};
use chronicle_core::aggregate::EventSourcedAggregate;
use chronicle_core::error::DomainError;
use chronicle_core::message::{DomainEventMessage, EventMessage, JsonPayload, Message, Metadata};
use chronicle_core::table::{EventRecord, EventTable};
use chronicle_event_store::{EventStore, PgEventTable};
use chronicle_test_support::{FixedClock, ITEM_ADDED, ORDER_CREATED, Order, OrderEvent};
use sqlx::PgPool;
use uuid::Uuid;

/// Helper to build an `EventRecord` with sensible defaults.
fn make_record(aggregate_id: &str, sequence_number: i64) -> EventRecord {
    let at = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap() + chrono::Duration::microseconds(250);
    let (event_timestamp, event_timestamp_us) = EventRecord::split_timestamp(at);
    EventRecord {
        event_id: Uuid::new_v4(),
        event_timestamp,
        event_timestamp_us,
        aggregate_type: Some("order".to_string()),
        aggregate_id: Some(aggregate_id.to_string()),
        sequence_number: Some(sequence_number),
        payload_type: ORDER_CREATED.to_string(),
        payload: r#"{"customer":"ann"}"#.to_string(),
        metadata: "{}".to_string(),
    }
}

fn clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap() + chrono::Duration::nanoseconds(987_654_321))
}

// --- insert + fetch round-trip ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_insert_and_fetch_single_record(pool: PgPool) {
    let table = PgEventTable::new(pool);
    let record = make_record("order-1", 0);

    let row_id = table.insert(&record).await.unwrap();

    let fetched = table.fetch_from(row_id, 10).await.unwrap();
    assert_eq!(fetched, vec![(row_id, record)]);
    assert_eq!(table.max_row_id().await.unwrap(), row_id);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_max_row_id_is_zero_for_empty_table(pool: PgPool) {
    let table = PgEventTable::new(pool);

    assert_eq!(table.max_row_id().await.unwrap(), 0);
}

// --- ordering ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_fetch_after_is_exclusive_and_respects_limit(pool: PgPool) {
    let table = PgEventTable::new(pool);
    let mut row_ids = Vec::new();
    for n in 0..5 {
        row_ids.push(table.insert(&make_record("order-1", n)).await.unwrap());
    }

    let fetched = table.fetch_after(row_ids[1], 2).await.unwrap();

    let fetched_ids: Vec<i64> = fetched.iter().map(|(id, _)| *id).collect();
    assert_eq!(fetched_ids, vec![row_ids[2], row_ids[3]]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_fetch_stream_orders_by_sequence_number_and_isolates_aggregates(pool: PgPool) {
    let table = PgEventTable::new(pool);
    table.insert(&make_record("order-1", 1)).await.unwrap();
    table.insert(&make_record("order-2", 0)).await.unwrap();
    table.insert(&make_record("order-1", 0)).await.unwrap();

    let stream = table.fetch_stream("order", "order-1").await.unwrap();

    let sequence: Vec<Option<i64>> = stream.iter().map(|r| r.sequence_number).collect();
    assert_eq!(sequence, vec![Some(0), Some(1)]);
}

// --- concurrency ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrency_conflict_on_duplicate_stream_position(pool: PgPool) {
    let table = PgEventTable::new(pool);

    // First insert succeeds.
    table.insert(&make_record("order-1", 0)).await.unwrap();

    // Second insert with the same position should fail.
    let result = table.insert(&make_record("order-1", 0)).await;

    match result {
        Err(DomainError::ConcurrencyConflict {
            aggregate_type,
            aggregate_id,
            sequence_number,
        }) => {
            assert_eq!(aggregate_type, "order");
            assert_eq!(aggregate_id, "order-1");
            assert_eq!(sequence_number, 0);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_plain_events_do_not_collide_on_stream_index(pool: PgPool) {
    let table = PgEventTable::new(pool);
    let mut plain = make_record("unused", 0);
    plain.aggregate_type = None;
    plain.aggregate_id = None;
    plain.sequence_number = None;
    let mut second = plain.clone();
    second.event_id = Uuid::new_v4();

    table.insert(&plain).await.unwrap();
    table.insert(&second).await.unwrap();

    assert_eq!(table.fetch_from(1, 10).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_duplicate_event_id_is_a_storage_failure(pool: PgPool) {
    let table = PgEventTable::new(pool);
    let record = make_record("order-1", 0);
    let mut same_id = make_record("order-1", 1);
    same_id.event_id = record.event_id;

    table.insert(&record).await.unwrap();
    let result = table.insert(&same_id).await;

    assert!(matches!(result, Err(DomainError::StorageFailure(_))));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_insert_all_rolls_back_the_whole_batch_on_conflict(pool: PgPool) {
    let table = PgEventTable::new(pool);
    table.insert(&make_record("order-1", 1)).await.unwrap();

    let result = table
        .insert_all(&[make_record("order-1", 0), make_record("order-1", 1)])
        .await;

    assert!(matches!(result, Err(DomainError::ConcurrencyConflict { .. })));
    let stream = table.fetch_stream("order", "order-1").await.unwrap();
    assert_eq!(stream.len(), 1);
}

// --- lookup ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_find_row_id_returns_none_for_unknown_event(pool: PgPool) {
    let table = PgEventTable::new(pool);

    let found = table.find_row_id(Uuid::new_v4()).await.unwrap();

    assert_eq!(found, None);
}

// --- custom table ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_ensure_schema_creates_custom_table(pool: PgPool) {
    let table = PgEventTable::with_table(pool, "audit_log");

    table.ensure_schema().await.unwrap();
    table.ensure_schema().await.unwrap();
    table.insert(&make_record("order-1", 0)).await.unwrap();
    let conflict = table.insert(&make_record("order-1", 0)).await;

    assert_eq!(table.table_name(), "audit_log");
    assert!(matches!(conflict, Err(DomainError::ConcurrencyConflict { .. })));
}

// --- through the store ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_store_round_trips_messages_with_microsecond_precision(pool: PgPool) {
    let store = EventStore::new(PgEventTable::new(pool));
    let clock = clock();
    let plain = EventMessage::new(
        JsonPayload::new("audit::LoginEvent", serde_json::json!({"user": "ann"})),
        Metadata::new().with("ip", "10.0.0.1"),
        &clock,
    );
    let domain = DomainEventMessage::new(
        "order",
        "order-1",
        0,
        EventMessage::new(
            JsonPayload::new(ITEM_ADDED, serde_json::json!({"sku": "A-1", "quantity": 2})),
            Metadata::new(),
            &clock,
        ),
    );

    store.store(&Message::from(plain.clone())).await.unwrap();
    store.store(&Message::from(domain.clone())).await.unwrap();

    let page = store.read::<JsonPayload>(Some(1), 10).await.unwrap();
    let messages: Vec<&Message<JsonPayload>> = page.values().collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].as_domain_event().is_none());
    assert_eq!(messages[0].id(), plain.id());
    assert_eq!(messages[0].timestamp(), plain.timestamp());
    assert_eq!(messages[0].timestamp().timestamp_subsec_micros(), 987_654);
    assert_eq!(messages[0].payload(), plain.payload());
    assert_eq!(messages[0].metadata(), plain.metadata());
    let stored_domain = messages[1].as_domain_event().unwrap();
    assert_eq!(stored_domain.aggregate_id(), "order-1");
    assert_eq!(stored_domain.sequence_number(), 0);
    assert_eq!(stored_domain.payload_type(), ITEM_ADDED);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_store_loads_aggregate_written_by_another_instance(pool: PgPool) {
    let store = EventStore::new(PgEventTable::new(pool));
    let clock = clock();
    let mut order = Order::new("order-1");
    order.create("ann", &clock).unwrap();
    order.add_item("A-1", 2, &clock).unwrap();
    store.append(order.container().events()).await.unwrap();

    let loaded = store.load_aggregate(Order::new("order-1")).await.unwrap();

    assert_eq!(loaded.customer.as_deref(), Some("ann"));
    assert_eq!(loaded.items, vec![("A-1".to_string(), 2)]);
    assert_eq!(loaded.version(), Some(1));
    assert!(matches!(
        store.load_stream::<OrderEvent>("order", "order-1").await.unwrap()[1].payload(),
        OrderEvent::ItemAdded(_)
    ));
}
