//! Loading tickets pin regions of chunk columns against eviction.

use std::sync::{Arc, Weak};

use strata_core::ChunkPos;

#[derive(Debug)]
struct TicketRegion {
    center: ChunkPos,
    radius: u32,
}

impl TicketRegion {
    fn covers(&self, pos: ChunkPos) -> bool {
        self.center.distance(pos) <= u64::from(self.radius)
    }
}

/// A handle pinning all columns within a square region.
///
/// The pin lasts until the ticket is removed from its world or until every clone of it has been
/// dropped.
#[derive(Clone, Debug)]
pub struct LoadingTicket(Arc<TicketRegion>);

impl LoadingTicket {
    /// Center column of the pinned region.
    #[must_use]
    pub fn center(&self) -> ChunkPos {
        self.0.center
    }

    /// Radius of the pinned region in columns.
    #[must_use]
    pub fn radius(&self) -> u32 {
        self.0.radius
    }

    /// Returns whether this ticket pins the given column.
    #[must_use]
    pub fn covers(&self, pos: ChunkPos) -> bool {
        self.0.covers(pos)
    }

    /// Iterates all columns pinned by this ticket.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> + use<> {
        let center = self.center();
        let radius = i64::from(self.radius());
        (center.x - radius..=center.x + radius).flat_map(move |x| {
            (center.z - radius..=center.z + radius).map(move |z| ChunkPos::new(x, z))
        })
    }
}

/// The tickets registered with a world. Dropped tickets are pruned lazily.
#[derive(Debug, Default)]
pub struct TicketSet {
    tickets: Vec<Weak<TicketRegion>>,
}

impl TicketSet {
    /// Creates and registers a new ticket.
    pub fn add(&mut self, center: ChunkPos, radius: u32) -> LoadingTicket {
        let region = Arc::new(TicketRegion { center, radius });
        self.tickets.push(Arc::downgrade(&region));
        LoadingTicket(region)
    }

    /// Unregisters a ticket. Returns `false` if it wasn't registered.
    pub fn remove(&mut self, ticket: &LoadingTicket) -> bool {
        let before = self.tickets.len();
        self.tickets
            .retain(|region| !std::ptr::eq(region.as_ptr(), Arc::as_ptr(&ticket.0)));
        before != self.tickets.len()
    }

    /// Drops the registrations of tickets whose holders are gone.
    pub fn prune(&mut self) {
        self.tickets.retain(|region| region.strong_count() > 0);
    }

    /// Returns whether any live ticket pins the given column.
    #[must_use]
    pub fn covers(&self, pos: ChunkPos) -> bool {
        self.tickets
            .iter()
            .filter_map(Weak::upgrade)
            .any(|region| region.covers(pos))
    }

    /// Snapshots all live tickets.
    #[must_use]
    pub fn live(&self) -> Vec<LoadingTicket> {
        self.tickets
            .iter()
            .filter_map(Weak::upgrade)
            .map(LoadingTicket)
            .collect()
    }

    /// Number of live tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets
            .iter()
            .filter(|region| region.strong_count() > 0)
            .count()
    }

    /// Returns `true` if no live ticket is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_tickets_stop_pinning() {
        let mut tickets = TicketSet::default();
        let ticket = tickets.add(ChunkPos::new(0, 0), 1);
        assert!(tickets.covers(ChunkPos::new(1, -1)));
        assert!(!tickets.covers(ChunkPos::new(2, 0)));
        assert_eq!(ticket.chunks().count(), 9);
        drop(ticket);
        assert!(!tickets.covers(ChunkPos::new(0, 0)));
        tickets.prune();
        assert!(tickets.is_empty());
    }

    #[test]
    fn removed_tickets_stop_pinning() {
        let mut tickets = TicketSet::default();
        let ticket = tickets.add(ChunkPos::new(5, 5), 0);
        let other = tickets.add(ChunkPos::new(5, 5), 0);
        assert!(tickets.remove(&ticket));
        assert!(!tickets.remove(&ticket));
        assert!(tickets.covers(ChunkPos::new(5, 5)));
        drop(other);
        assert!(!tickets.covers(ChunkPos::new(5, 5)));
    }
}
