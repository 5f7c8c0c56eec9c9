//! Unit of work: tracked aggregates, their pending events, and the commit
//! that persists and then publishes them.

use chronicle_core::aggregate::EventSourcedAggregate;
use chronicle_core::error::DomainError;
use chronicle_core::identity_map::IdentityMap;
use chronicle_core::message::Payload;
use chronicle_core::publisher::{DeferredEventPublisher, EventDispatcher};
use chronicle_core::queue::{DomainEventQueue, EventQueue};
use chronicle_core::serializer::EventSerializer;
use chronicle_core::table::EventTable;

use crate::store::EventStore;

/// Scope of one logical transaction over a set of aggregates.
///
/// Aggregates created or loaded during the unit of work are tracked in its
/// identity map. [`commit`](Self::commit) drains their events, appends them
/// atomically, and only then hands them to the dispatcher. A failed append or
/// a [`rollback`](Self::rollback) drops the drained events unpublished. Events
/// that are already stored stay buffered until delivery succeeds.
#[derive(Debug)]
pub struct UnitOfWork<P: 'static, D> {
    identity_map: IdentityMap<P>,
    publisher: DeferredEventPublisher<P, D>,
}

impl<P: Payload, D: EventDispatcher<P>> UnitOfWork<P, D> {
    /// Starts an empty unit of work publishing to `dispatcher`.
    pub fn new(dispatcher: D) -> Self {
        Self {
            identity_map: IdentityMap::new(),
            publisher: DeferredEventPublisher::new(dispatcher),
        }
    }

    /// Tracks a newly created aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AlreadyTracked` if the identity is already held.
    pub fn track<A>(&mut self, aggregate: A) -> Result<&mut A, DomainError>
    where
        A: EventSourcedAggregate<Event = P>,
    {
        self.identity_map.track(aggregate)
    }

    /// Rehydrates `aggregate` from `store` and tracks it. An aggregate with
    /// the same identity that is already tracked is returned as is.
    ///
    /// # Errors
    ///
    /// Propagates [`EventStore::load_aggregate`] errors.
    pub async fn load<A, T, S>(
        &mut self,
        store: &EventStore<T, S>,
        aggregate: A,
    ) -> Result<&mut A, DomainError>
    where
        A: EventSourcedAggregate<Event = P>,
        T: EventTable,
        S: EventSerializer,
    {
        if self
            .identity_map
            .contains(A::AGGREGATE_TYPE, aggregate.aggregate_id())
        {
            let aggregate_id = aggregate.aggregate_id().to_owned();
            return self
                .identity_map
                .get_mut::<A>(&aggregate_id)
                .ok_or(DomainError::AlreadyTracked {
                    aggregate_type: A::AGGREGATE_TYPE.to_owned(),
                    aggregate_id,
                });
        }
        let aggregate = store.load_aggregate(aggregate).await?;
        self.identity_map.track(aggregate)
    }

    /// Looks up a tracked aggregate.
    #[must_use]
    pub fn get<A>(&self, aggregate_id: &str) -> Option<&A>
    where
        A: EventSourcedAggregate<Event = P>,
    {
        self.identity_map.get(aggregate_id)
    }

    /// Looks up a tracked aggregate for mutation.
    pub fn get_mut<A>(&mut self, aggregate_id: &str) -> Option<&mut A>
    where
        A: EventSourcedAggregate<Event = P>,
    {
        self.identity_map.get_mut(aggregate_id)
    }

    /// The aggregates tracked so far.
    pub fn identity_map(&self) -> &IdentityMap<P> {
        &self.identity_map
    }

    /// The publisher holding events that await delivery.
    pub fn publisher(&self) -> &DeferredEventPublisher<P, D> {
        &self.publisher
    }

    /// Persists the events applied since the last commit in one atomic
    /// append, then publishes them after any stored events still awaiting
    /// delivery. Returns how many events were delivered.
    ///
    /// # Errors
    ///
    /// If the append fails the newly drained events are discarded, tracked
    /// aggregates are forgotten, and the store's error is returned; on
    /// `DomainError::ConcurrencyConflict` reload and retry the command.
    /// Events stored by earlier commits are kept. If only delivery fails the
    /// events are already stored and stay buffered; call
    /// [`flush`](Self::flush) or commit again to retry delivery.
    #[tracing::instrument(skip_all, fields(tracked = self.identity_map.len()))]
    pub async fn commit<T, S>(&mut self, store: &EventStore<T, S>) -> Result<usize, DomainError>
    where
        T: EventTable,
        S: EventSerializer,
    {
        let drained = DomainEventQueue::new(&mut self.identity_map).dequeue_all_events();

        let appended = store.append(&drained).await;
        if let Err(err) = appended {
            tracing::warn!(
                event_count = drained.len(),
                "discarding events of a failed append"
            );
            self.identity_map.clear();
            return Err(err);
        }
        self.publisher.enqueue(drained);
        self.publisher.flush().await
    }

    /// Retries delivery of events stored by an earlier commit.
    ///
    /// # Errors
    ///
    /// Returns the dispatcher's error; the events stay buffered.
    pub async fn flush(&mut self) -> Result<usize, DomainError> {
        self.publisher.flush().await
    }

    /// Abandons the unit of work: events applied since the last commit are
    /// dropped unpublished and tracked aggregates forgotten. Stored events
    /// still awaiting delivery stay buffered. Returns how many events were
    /// dropped.
    pub fn rollback(&mut self) -> usize {
        let dropped = DomainEventQueue::new(&mut self.identity_map)
            .dequeue_all_events()
            .len();
        if dropped > 0 {
            tracing::warn!(event_count = dropped, "discarding events of a rolled back unit of work");
        }
        self.identity_map.clear();
        dropped
    }
}
