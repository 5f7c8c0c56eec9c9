//! Order aggregate fixture used across integration tests.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use chronicle_core::aggregate::{EventSourcedAggregate, Handlers};
use chronicle_core::clock::Clock;
use chronicle_core::container::EventContainer;
use chronicle_core::error::DomainError;
use chronicle_core::message::{Metadata, Payload};
use serde::{Deserialize, Serialize};

/// Type tag of [`OrderCreated`].
pub const ORDER_CREATED: &str = "orders::CreatedEvent";
/// Type tag of [`ItemAdded`].
pub const ITEM_ADDED: &str = "orders::ItemAddedEvent";
/// Type tag of [`OrderShipped`].
pub const ORDER_SHIPPED: &str = "orders::ShippedEvent";

/// Emitted when an order is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// The customer placing the order.
    pub customer: String,
}

/// Emitted when a line item is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAdded {
    /// Stock keeping unit.
    pub sku: String,
    /// Units ordered.
    pub quantity: u32,
}

/// Emitted when the order leaves the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShipped {
    /// The carrier handling delivery.
    pub carrier: String,
}

/// Event payload variants for orders.
///
/// Only the variant's fields are encoded; the type tag selects the variant
/// on the way back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OrderEvent {
    /// An order was opened.
    Created(OrderCreated),
    /// A line item was added.
    ItemAdded(ItemAdded),
    /// The order shipped.
    Shipped(OrderShipped),
}

impl Payload for OrderEvent {
    fn payload_type(&self) -> &str {
        match self {
            Self::Created(_) => ORDER_CREATED,
            Self::ItemAdded(_) => ITEM_ADDED,
            Self::Shipped(_) => ORDER_SHIPPED,
        }
    }

    fn from_tagged(payload_type: &str, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        match payload_type {
            ORDER_CREATED => serde_json::from_value(data).map(Self::Created),
            ITEM_ADDED => serde_json::from_value(data).map(Self::ItemAdded),
            ORDER_SHIPPED => serde_json::from_value(data).map(Self::Shipped),
            other => Err(serde::de::Error::custom(format!(
                "unknown order event type {other}"
            ))),
        }
    }
}

/// Every payload type an order can produce.
pub const ORDER_EVENT_TYPES: [&str; 3] = [ORDER_CREATED, ITEM_ADDED, ORDER_SHIPPED];

/// A minimal order aggregate.
#[derive(Debug)]
pub struct Order {
    /// The customer, once created.
    pub customer: Option<String>,
    /// Line items as `(sku, quantity)`.
    pub items: Vec<(String, u32)>,
    /// The carrier, once shipped.
    pub carrier: Option<String>,
    /// Time of the most recent change.
    pub updated_at: Option<DateTime<Utc>>,
    events: EventContainer<OrderEvent>,
}

impl Order {
    /// Creates an empty order with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            customer: None,
            items: Vec::new(),
            carrier: None,
            updated_at: None,
            events: EventContainer::new(Self::AGGREGATE_TYPE, id),
        }
    }

    /// Opens the order for `customer`.
    ///
    /// # Errors
    ///
    /// Propagates dispatch errors from `apply`.
    pub fn create(&mut self, customer: &str, clock: &dyn Clock) -> Result<(), DomainError> {
        let event = OrderEvent::Created(OrderCreated {
            customer: customer.to_owned(),
        });
        self.apply(event, Metadata::new(), clock)?;
        Ok(())
    }

    /// Adds a line item.
    ///
    /// # Errors
    ///
    /// Propagates dispatch errors from `apply`.
    pub fn add_item(&mut self, sku: &str, quantity: u32, clock: &dyn Clock) -> Result<(), DomainError> {
        let event = OrderEvent::ItemAdded(ItemAdded {
            sku: sku.to_owned(),
            quantity,
        });
        self.apply(event, Metadata::new().with("source", "test"), clock)?;
        Ok(())
    }

    /// Ships the order.
    ///
    /// # Errors
    ///
    /// Propagates dispatch errors from `apply`.
    pub fn ship(&mut self, carrier: &str, clock: &dyn Clock) -> Result<(), DomainError> {
        let event = OrderEvent::Shipped(OrderShipped {
            carrier: carrier.to_owned(),
        });
        self.apply(event, Metadata::new(), clock)?;
        Ok(())
    }

    fn apply_created(&mut self, event: &OrderEvent, at: DateTime<Utc>, _: &Metadata) {
        if let OrderEvent::Created(created) = event {
            self.customer = Some(created.customer.clone());
            self.updated_at = Some(at);
        }
    }

    fn apply_item_added(&mut self, event: &OrderEvent, at: DateTime<Utc>, _: &Metadata) {
        if let OrderEvent::ItemAdded(item) = event {
            self.items.push((item.sku.clone(), item.quantity));
            self.updated_at = Some(at);
        }
    }

    fn apply_shipped(&mut self, event: &OrderEvent, at: DateTime<Utc>, _: &Metadata) {
        if let OrderEvent::Shipped(shipped) = event {
            self.carrier = Some(shipped.carrier.clone());
            self.updated_at = Some(at);
        }
    }
}

static ORDER_HANDLERS: LazyLock<Handlers<Order>> = LazyLock::new(|| {
    Handlers::new()
        .on(ORDER_CREATED, Order::apply_created)
        .on(ITEM_ADDED, Order::apply_item_added)
        .on(ORDER_SHIPPED, Order::apply_shipped)
});

impl EventSourcedAggregate for Order {
    type Event = OrderEvent;

    const AGGREGATE_TYPE: &'static str = "order";

    fn handlers() -> &'static Handlers<Self> {
        &ORDER_HANDLERS
    }

    fn container(&self) -> &EventContainer<OrderEvent> {
        &self.events
    }

    fn container_mut(&mut self) -> &mut EventContainer<OrderEvent> {
        &mut self.events
    }
}
