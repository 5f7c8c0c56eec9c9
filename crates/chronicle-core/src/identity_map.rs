//! Registry of the aggregates live in one unit of work.

use std::any::Any;
use std::collections::HashMap;

use crate::aggregate::EventSourcedAggregate;
use crate::error::DomainError;
use crate::message::DomainEventMessage;

/// Object-safe view of an aggregate held by an [`IdentityMap`].
pub trait TrackedAggregate<P>: Any + Send + Sync {
    /// The aggregate kind.
    fn aggregate_type(&self) -> &str;

    /// The aggregate instance.
    fn aggregate_id(&self) -> &str;

    /// Events produced since the last commit.
    fn uncommitted_events(&self) -> &[DomainEventMessage<P>];

    /// Commits the aggregate's container and returns what it held.
    fn drain_events(&mut self) -> Vec<DomainEventMessage<P>>;

    /// Upcast for typed lookups.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for typed lookups.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<A: EventSourcedAggregate> TrackedAggregate<A::Event> for A {
    fn aggregate_type(&self) -> &str {
        self.container().aggregate_type()
    }

    fn aggregate_id(&self) -> &str {
        EventSourcedAggregate::aggregate_id(self)
    }

    fn uncommitted_events(&self) -> &[DomainEventMessage<A::Event>] {
        EventSourcedAggregate::uncommitted_events(self)
    }

    fn drain_events(&mut self) -> Vec<DomainEventMessage<A::Event>> {
        self.container_mut().drain()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Owns every aggregate loaded or created within one unit of work, indexed
/// by `(aggregate_type, aggregate_id)` and iterated in tracking order.
pub struct IdentityMap<P> {
    entries: Vec<Box<dyn TrackedAggregate<P>>>,
    index: HashMap<(String, String), usize>,
}

impl<P: 'static> IdentityMap<P> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Takes ownership of `aggregate` and returns a handle to it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AlreadyTracked` if an aggregate with the same
    /// type and id is already held.
    pub fn track<A>(&mut self, aggregate: A) -> Result<&mut A, DomainError>
    where
        A: EventSourcedAggregate<Event = P>,
    {
        let key = (
            A::AGGREGATE_TYPE.to_owned(),
            EventSourcedAggregate::aggregate_id(&aggregate).to_owned(),
        );
        if self.index.contains_key(&key) {
            return Err(DomainError::AlreadyTracked {
                aggregate_type: key.0,
                aggregate_id: key.1,
            });
        }

        let position = self.entries.len();
        self.index.insert(key, position);
        self.entries.push(Box::new(aggregate));
        self.entries[position]
            .as_any_mut()
            .downcast_mut::<A>()
            .ok_or_else(|| {
                DomainError::InvalidContainerState(format!(
                    "tracked {} is not of the requested type",
                    A::AGGREGATE_TYPE
                ))
            })
    }

    /// Looks up a tracked aggregate by id.
    #[must_use]
    pub fn get<A>(&self, aggregate_id: &str) -> Option<&A>
    where
        A: EventSourcedAggregate<Event = P>,
    {
        let position = self.position(A::AGGREGATE_TYPE, aggregate_id)?;
        self.entries[position].as_any().downcast_ref::<A>()
    }

    /// Looks up a tracked aggregate by id for mutation.
    pub fn get_mut<A>(&mut self, aggregate_id: &str) -> Option<&mut A>
    where
        A: EventSourcedAggregate<Event = P>,
    {
        let position = self.position(A::AGGREGATE_TYPE, aggregate_id)?;
        self.entries[position].as_any_mut().downcast_mut::<A>()
    }

    /// Returns `true` if an aggregate with this identity is tracked.
    #[must_use]
    pub fn contains(&self, aggregate_type: &str, aggregate_id: &str) -> bool {
        self.position(aggregate_type, aggregate_id).is_some()
    }

    /// Tracked aggregates in tracking order.
    pub fn iter(&self) -> impl Iterator<Item = &(dyn TrackedAggregate<P> + 'static)> {
        self.entries.iter().map(|entry| &**entry)
    }

    /// Tracked aggregates in tracking order, for mutation.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (dyn TrackedAggregate<P> + 'static)> {
        self.entries.iter_mut().map(|entry| &mut **entry)
    }

    /// Number of tracked aggregates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every tracked aggregate.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    fn position(&self, aggregate_type: &str, aggregate_id: &str) -> Option<usize> {
        self.index
            .get(&(aggregate_type.to_owned(), aggregate_id.to_owned()))
            .copied()
    }
}

impl<P: 'static> Default for IdentityMap<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static> std::fmt::Debug for IdentityMap<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|a| format!("{} {}", a.aggregate_type(), a.aggregate_id())),
            )
            .finish()
    }
}
