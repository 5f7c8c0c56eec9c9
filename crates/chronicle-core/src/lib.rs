//! Chronicle core: event-sourcing building blocks.
//!
//! This crate defines the message model, the per-aggregate event container,
//! the event-sourced aggregate abstraction, the serializer and storage-driver
//! boundaries, and the collection/publication pipeline. It contains no
//! infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod container;
pub mod error;
pub mod identity_map;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod serializer;
pub mod table;
