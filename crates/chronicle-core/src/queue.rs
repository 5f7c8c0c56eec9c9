//! Collection of uncommitted events across a unit of work.

use crate::identity_map::IdentityMap;
use crate::message::DomainEventMessage;

/// Source of events ready for publication.
pub trait EventQueue<P> {
    /// Removes and returns every pending event.
    fn dequeue_all_events(&mut self) -> Vec<DomainEventMessage<P>>;
}

/// Drains the uncommitted events of every aggregate in an [`IdentityMap`].
///
/// Events come out grouped per aggregate, in tracking order, each group in
/// the order it was applied. Every drained container is committed, so a
/// second call without new applies returns nothing.
pub struct DomainEventQueue<'a, P> {
    identity_map: &'a mut IdentityMap<P>,
}

impl<'a, P> DomainEventQueue<'a, P> {
    /// Creates a queue over the aggregates of one unit of work.
    pub fn new(identity_map: &'a mut IdentityMap<P>) -> Self {
        Self { identity_map }
    }
}

impl<P: 'static> std::fmt::Debug for DomainEventQueue<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DomainEventQueue")
            .field(&*self.identity_map)
            .finish()
    }
}

impl<P: 'static> EventQueue<P> for DomainEventQueue<'_, P> {
    fn dequeue_all_events(&mut self) -> Vec<DomainEventMessage<P>> {
        let mut dequeued = Vec::new();
        for aggregate in self.identity_map.iter_mut() {
            dequeued.extend(aggregate.drain_events());
        }
        dequeued
    }
}
