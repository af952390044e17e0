//! Resource registry and global slot accounting.
//!
//! Pure bookkeeping, no I/O: the broker task is the only owner, so none
//! of this needs internal locking.

use std::collections::HashMap;

use tracing::warn;

use filecoord_core::error::{CoordError, CoordResult};
use filecoord_core::hooks::WaitQueue;
use filecoord_core::request::{FileIdentity, OwnerId, PendingRequest, RequestId};

/// Lock/access state of one coordinated resource.
///
/// Invariant: at most one active holder; while a holder exists no queued
/// request for the same identity becomes active.
pub struct ResourceState {
    holder: Option<PendingRequest>,
    queue: Box<dyn WaitQueue>,
}

impl ResourceState {
    fn new(queue: Box<dyn WaitQueue>) -> Self {
        Self {
            holder: None,
            queue,
        }
    }

    pub fn holder(&self) -> Option<&PendingRequest> {
        self.holder.as_ref()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn is_idle(&self) -> bool {
        self.holder.is_none() && self.queue.is_empty()
    }
}

/// What a release turned out to mean.
pub enum ReleaseOutcome {
    /// The id held the resource; its grant and slot are now free.
    Released(PendingRequest),
    /// The id was still queued; it has been withdrawn without ever
    /// holding a slot.
    Withdrawn(PendingRequest),
}

/// Everything reaped when an owner disconnects.
#[derive(Default)]
pub struct ReapSummary {
    /// Grants the owner held, now implicitly released (slots freed by
    /// the caller).
    pub released: Vec<(FileIdentity, PendingRequest)>,
    /// Requests the owner still had queued.
    pub withdrawn: Vec<PendingRequest>,
}

/// In-memory map from file identity to its holder and wait queue, with a
/// request-id index for O(1) release lookup.
///
/// Identities are garbage-collected as soon as they go idle so the map
/// stays bounded by live work.
#[derive(Default)]
pub struct ResourceRegistry {
    states: HashMap<FileIdentity, ResourceState>,
    index: HashMap<RequestId, FileIdentity>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities currently holding a grant or queueing.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn contains_request(&self, request_id: &RequestId) -> bool {
        self.index.contains_key(request_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FileIdentity, &ResourceState)> {
        self.states.iter()
    }

    /// Queues a request on `identity`, creating the resource state (with
    /// a queue from `make_queue`) on first reference.
    pub fn enqueue(
        &mut self,
        identity: FileIdentity,
        request: PendingRequest,
        make_queue: impl FnOnce() -> Box<dyn WaitQueue>,
    ) {
        self.index.insert(request.request_id, identity.clone());
        self.states
            .entry(identity)
            .or_insert_with(|| ResourceState::new(make_queue()))
            .queue
            .push(request);
    }

    /// Releases or withdraws `request_id`.
    ///
    /// The caller settles slot accounting for `Released` outcomes;
    /// `Withdrawn` requests never held a slot.
    pub fn release(&mut self, request_id: RequestId) -> CoordResult<(FileIdentity, ReleaseOutcome)> {
        let identity = self
            .index
            .remove(&request_id)
            .ok_or(CoordError::UnknownRequest(request_id))?;

        let state = match self.states.get_mut(&identity) {
            Some(state) => state,
            // Index and state map are updated together; a dangling index
            // entry still must not crash the coordinator.
            None => return Err(CoordError::UnknownRequest(request_id)),
        };

        let outcome = if state.holder.as_ref().map(|h| h.request_id) == Some(request_id) {
            ReleaseOutcome::Released(state.holder.take().expect("holder checked above"))
        } else if let Some(withdrawn) = state.queue.remove(&request_id) {
            ReleaseOutcome::Withdrawn(withdrawn)
        } else {
            return Err(CoordError::UnknownRequest(request_id));
        };

        self.collect_if_idle(&identity);
        Ok((identity, outcome))
    }

    /// Removes every hold and queued request belonging to `owner`.
    pub fn reap_owner(&mut self, owner: &OwnerId) -> ReapSummary {
        let mut summary = ReapSummary::default();

        for (identity, state) in self.states.iter_mut() {
            if state.holder.as_ref().map(|h| &h.owner) == Some(owner) {
                let held = state.holder.take().expect("holder checked above");
                self.index.remove(&held.request_id);
                summary.released.push((identity.clone(), held));
            }
            for withdrawn in state.queue.remove_owner(owner) {
                self.index.remove(&withdrawn.request_id);
                summary.withdrawn.push(withdrawn);
            }
        }

        self.states.retain(|_, state| !state.is_idle());
        summary
    }

    /// Activates the next queued request on `identity` if the resource is
    /// free and the slot pool has capacity. Returns the newly active
    /// request for grant routing.
    pub fn advance(
        &mut self,
        identity: &FileIdentity,
        slots: &mut SlotPool,
    ) -> Option<PendingRequest> {
        let state = self.states.get_mut(identity)?;
        if state.holder.is_some() || state.queue.is_empty() || !slots.try_acquire() {
            return None;
        }
        let next = state
            .queue
            .pop()
            .expect("queue checked non-empty above");
        state.holder = Some(next.clone());
        Some(next)
    }

    /// Identities with waiting requests and no active holder.
    pub fn waiting_identities(&self) -> Vec<FileIdentity> {
        self.states
            .iter()
            .filter(|(_, state)| state.holder.is_none() && !state.queue.is_empty())
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    fn collect_if_idle(&mut self, identity: &FileIdentity) {
        if self
            .states
            .get(identity)
            .is_some_and(|state| state.is_idle())
        {
            self.states.remove(identity);
        }
    }
}

/// System-wide counter bounding total simultaneous grants, independent of
/// how many distinct identities exist.
#[derive(Debug)]
pub struct SlotPool {
    active: usize,
    limit: usize,
}

impl SlotPool {
    pub fn new(limit: usize) -> Self {
        Self { active: 0, limit }
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Claims a slot if one is free.
    pub fn try_acquire(&mut self) -> bool {
        if self.active < self.limit {
            self.active += 1;
            true
        } else {
            false
        }
    }

    /// Returns a slot. Duplicate releases must not corrupt the count, so
    /// underflow clamps to zero.
    pub fn release(&mut self) {
        if self.active == 0 {
            warn!("slot pool release with no active grants");
            return;
        }
        self.active -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filecoord_core::hooks::FifoQueue;
    use filecoord_core::request::{Action, FileMetadata};
    use std::path::PathBuf;

    fn identity(name: &str) -> FileIdentity {
        FileIdentity::from(PathBuf::from(name))
    }

    fn request(owner: &str) -> PendingRequest {
        PendingRequest::new(
            RequestId::new(),
            OwnerId::from(owner),
            Action::Lock,
            FileMetadata::anonymous("log"),
        )
    }

    fn fifo() -> Box<dyn WaitQueue> {
        Box::new(FifoQueue::new())
    }

    #[test]
    fn single_holder_per_identity() {
        let mut registry = ResourceRegistry::new();
        let mut slots = SlotPool::new(10);
        let id = identity("/tmp/a.log");

        let first = request("a");
        let second = request("b");
        registry.enqueue(id.clone(), first.clone(), fifo);
        registry.enqueue(id.clone(), second.clone(), fifo);

        let active = registry.advance(&id, &mut slots).unwrap();
        assert_eq!(active.request_id, first.request_id);
        // Resource busy: no second activation.
        assert!(registry.advance(&id, &mut slots).is_none());
        assert_eq!(slots.active(), 1);
    }

    #[test]
    fn slot_pool_throttles_across_identities() {
        let mut registry = ResourceRegistry::new();
        let mut slots = SlotPool::new(2);

        for name in ["/a", "/b", "/c"] {
            registry.enqueue(identity(name), request("w"), fifo);
        }

        assert!(registry.advance(&identity("/a"), &mut slots).is_some());
        assert!(registry.advance(&identity("/b"), &mut slots).is_some());
        // Third identity is free but the pool is exhausted.
        assert!(registry.advance(&identity("/c"), &mut slots).is_none());
        assert_eq!(slots.active(), 2);
    }

    #[test]
    fn release_frees_holder_and_collects_idle_state() {
        let mut registry = ResourceRegistry::new();
        let mut slots = SlotPool::new(1);
        let id = identity("/tmp/a.log");
        let req = request("a");

        registry.enqueue(id.clone(), req.clone(), fifo);
        registry.advance(&id, &mut slots).unwrap();

        let (freed, outcome) = registry.release(req.request_id).unwrap();
        assert_eq!(freed, id);
        assert!(matches!(outcome, ReleaseOutcome::Released(_)));
        assert_eq!(registry.tracked(), 0);
    }

    #[test]
    fn release_of_queued_request_is_a_withdrawal() {
        let mut registry = ResourceRegistry::new();
        let mut slots = SlotPool::new(1);
        let id = identity("/tmp/a.log");
        let holder = request("a");
        let waiter = request("b");

        registry.enqueue(id.clone(), holder.clone(), fifo);
        registry.enqueue(id.clone(), waiter.clone(), fifo);
        registry.advance(&id, &mut slots).unwrap();

        let (_, outcome) = registry.release(waiter.request_id).unwrap();
        assert!(matches!(outcome, ReleaseOutcome::Withdrawn(_)));
        // Holder is untouched.
        assert!(registry.iter().next().unwrap().1.holder().is_some());
    }

    #[test]
    fn double_release_reports_unknown_request() {
        let mut registry = ResourceRegistry::new();
        let mut slots = SlotPool::new(1);
        let id = identity("/tmp/a.log");
        let req = request("a");

        registry.enqueue(id.clone(), req.clone(), fifo);
        registry.advance(&id, &mut slots).unwrap();

        assert!(registry.release(req.request_id).is_ok());
        assert!(matches!(
            registry.release(req.request_id),
            Err(CoordError::UnknownRequest(_))
        ));
    }

    #[test]
    fn reap_owner_releases_holds_and_drops_queued() {
        let mut registry = ResourceRegistry::new();
        let mut slots = SlotPool::new(10);
        let a = identity("/a");
        let b = identity("/b");

        let held = request("dead");
        let queued_elsewhere = request("dead");
        let survivor = request("alive");

        registry.enqueue(a.clone(), held.clone(), fifo);
        registry.enqueue(b.clone(), survivor.clone(), fifo);
        registry.enqueue(b.clone(), queued_elsewhere.clone(), fifo);
        registry.advance(&a, &mut slots).unwrap();
        registry.advance(&b, &mut slots).unwrap();

        let summary = registry.reap_owner(&OwnerId::from("dead"));
        assert_eq!(summary.released.len(), 1);
        assert_eq!(summary.withdrawn.len(), 1);
        assert!(!registry.contains_request(&held.request_id));
        // The survivor still holds /b.
        assert!(registry.contains_request(&survivor.request_id));
    }

    #[test]
    fn slot_pool_release_never_underflows() {
        let mut slots = SlotPool::new(1);
        slots.release();
        slots.release();
        assert_eq!(slots.active(), 0);
        assert!(slots.try_acquire());
        assert!(!slots.try_acquire());
    }
}
