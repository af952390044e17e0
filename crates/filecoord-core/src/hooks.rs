//! Extension points exposed to plugin code.
//!
//! Hooks are typed trait objects registered at coordinator startup, a
//! small strategy/observer surface: naming rewrites, wait-queue ordering,
//! and release observation.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::request::{Action, FileMetadata, OwnerId, PendingRequest, RequestId};

/// Context handed to the naming hook for each resolution.
#[derive(Debug)]
pub struct NamingContext<'a> {
    pub owner: &'a OwnerId,
    pub action: Action,
    pub metadata: &'a FileMetadata,
}

/// Rewrites the resolved candidate path before the identity is
/// registered, e.g. to inject a worker-specific directory.
///
/// Invoked exactly once per resolution.
pub trait NamingHook: Send + Sync {
    fn resolve(&self, candidate: PathBuf, ctx: &NamingContext<'_>) -> PathBuf;
}

/// Default naming hook: keeps the candidate path untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNaming;

impl NamingHook for IdentityNaming {
    fn resolve(&self, candidate: PathBuf, _ctx: &NamingContext<'_>) -> PathBuf {
        candidate
    }
}

/// Ordered collection of requests waiting on one resource.
pub trait WaitQueue: Send {
    fn push(&mut self, request: PendingRequest);
    fn pop(&mut self) -> Option<PendingRequest>;
    /// Withdraws one request by id.
    fn remove(&mut self, request_id: &RequestId) -> Option<PendingRequest>;
    /// Drops every queued request belonging to `owner`, returning the
    /// removed entries.
    fn remove_owner(&mut self, owner: &OwnerId) -> Vec<PendingRequest>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Strict first-in-first-out wait queue, the default ordering.
#[derive(Debug, Default)]
pub struct FifoQueue {
    queue: VecDeque<PendingRequest>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitQueue for FifoQueue {
    fn push(&mut self, request: PendingRequest) {
        self.queue.push_back(request);
    }

    fn pop(&mut self) -> Option<PendingRequest> {
        self.queue.pop_front()
    }

    fn remove(&mut self, request_id: &RequestId) -> Option<PendingRequest> {
        let position = self
            .queue
            .iter()
            .position(|r| r.request_id == *request_id)?;
        self.queue.remove(position)
    }

    fn remove_owner(&mut self, owner: &OwnerId) -> Vec<PendingRequest> {
        let mut removed = Vec::new();
        self.queue.retain(|r| {
            if r.owner == *owner {
                removed.push(r.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Context handed to the queue-policy hook when a resource is first
/// registered.
#[derive(Debug)]
pub struct QueueContext<'a> {
    pub identity: &'a Path,
    pub owner: &'a OwnerId,
}

/// Chooses the wait-queue implementation for a resource class.
pub trait QueuePolicy: Send + Sync {
    fn queue_for(&self, metadata: &FileMetadata, ctx: &QueueContext<'_>) -> Box<dyn WaitQueue>;
}

/// Default policy: FIFO for every resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoPolicy;

impl QueuePolicy for FifoPolicy {
    fn queue_for(&self, _metadata: &FileMetadata, _ctx: &QueueContext<'_>) -> Box<dyn WaitQueue> {
        Box::new(FifoQueue::new())
    }
}

/// Context for release observation.
#[derive(Debug)]
pub struct ReleaseContext<'a> {
    pub request_id: RequestId,
    pub owner: &'a OwnerId,
    pub identity: &'a Path,
    /// True when the release was forced by the owner's disconnection
    /// rather than requested cooperatively.
    pub implicit: bool,
}

/// Read-only notification fired after every successful release.
pub trait ReleaseObserver: Send + Sync {
    fn on_release(&self, ctx: &ReleaseContext<'_>);
}

/// Default observer: does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReleaseObserver;

impl ReleaseObserver for NoopReleaseObserver {
    fn on_release(&self, _ctx: &ReleaseContext<'_>) {}
}
