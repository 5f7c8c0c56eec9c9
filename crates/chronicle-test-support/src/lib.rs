//! Shared test doubles and fixtures for the chronicle event store.

mod clock;
mod dispatcher;
mod order;
mod table;

pub use clock::{FixedClock, SteppingClock};
pub use dispatcher::{FailingDispatcher, RecordingDispatcher};
pub use order::{
    ITEM_ADDED, ItemAdded, ORDER_CREATED, ORDER_EVENT_TYPES, ORDER_SHIPPED, Order, OrderCreated,
    OrderEvent, OrderShipped,
};
pub use table::{FailingEventTable, InMemoryEventTable};
