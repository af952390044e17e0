//! The grant scheduler: a single actor that consumes request/release
//! messages, mutates the registry, enforces the global concurrency
//! ceiling, and routes grant notifications back over the transport.
//!
//! All coordination state is mutated strictly in message-arrival order,
//! so none of it needs locks. The actor does no blocking I/O, only
//! bookkeeping.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use filecoord_core::error::{CoordError, CoordResult};
use filecoord_core::hooks::{
    FifoPolicy, IdentityNaming, NamingHook, NoopReleaseObserver, QueueContext, QueuePolicy,
    ReleaseContext, ReleaseObserver,
};
use filecoord_core::request::{
    Action, FileIdentity, FileMetadata, OwnerId, PendingRequest, RequestId,
};
use filecoord_core::transport::{GrantNotice, GrantRouter, InboundMessage};

use crate::registry::{ReleaseOutcome, ResourceRegistry, SlotPool};
use crate::resolver::NamingResolver;

/// Default bound on simultaneously active grants.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 10;

/// Point-in-time view of one tracked identity. Diagnostics only.
#[derive(Debug, Clone)]
pub struct IdentitySnapshot {
    pub identity: FileIdentity,
    pub holder: Option<OwnerId>,
    pub queued: usize,
}

enum Command {
    TrackedIdentities {
        reply: oneshot::Sender<Vec<IdentitySnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Builder for a [`GrantBroker`].
pub struct BrokerBuilder {
    concurrency_limit: usize,
    root_dir: Option<PathBuf>,
    naming_hook: Arc<dyn NamingHook>,
    queue_policy: Arc<dyn QueuePolicy>,
    release_observer: Arc<dyn ReleaseObserver>,
}

impl BrokerBuilder {
    fn new() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            root_dir: None,
            naming_hook: Arc::new(IdentityNaming),
            queue_policy: Arc::new(FifoPolicy),
            release_observer: Arc::new(NoopReleaseObserver),
        }
    }

    /// Global ceiling on simultaneously active grants across the whole
    /// worker fleet. Must be at least 1.
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Directory under which identities are resolved.
    pub fn root_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root.into());
        self
    }

    pub fn naming_hook(mut self, hook: impl NamingHook + 'static) -> Self {
        self.naming_hook = Arc::new(hook);
        self
    }

    pub fn queue_policy(mut self, policy: impl QueuePolicy + 'static) -> Self {
        self.queue_policy = Arc::new(policy);
        self
    }

    pub fn release_observer(mut self, observer: impl ReleaseObserver + 'static) -> Self {
        self.release_observer = Arc::new(observer);
        self
    }

    /// Starts the broker task.
    ///
    /// `inbound` is the coordinator side of the transport; `router`
    /// carries grants back to workers. Must be called inside a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when no root directory is configured or the
    /// concurrency limit is zero.
    pub fn spawn(
        self,
        router: Arc<dyn GrantRouter>,
        inbound: mpsc::UnboundedReceiver<InboundMessage>,
    ) -> CoordResult<BrokerHandle> {
        let root_dir = self.root_dir.ok_or_else(|| {
            CoordError::InvalidMetadata("root directory not specified".to_string())
        })?;
        if self.concurrency_limit == 0 {
            return Err(CoordError::InvalidMetadata(
                "concurrency limit must be at least 1".to_string(),
            ));
        }

        let broker = GrantBroker {
            registry: ResourceRegistry::new(),
            slots: SlotPool::new(self.concurrency_limit),
            resolver: NamingResolver::new(root_dir, self.naming_hook),
            queue_policy: self.queue_policy,
            release_observer: self.release_observer,
            router,
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(broker.run(inbound, command_rx));
        Ok(BrokerHandle {
            commands: command_tx,
        })
    }
}

/// Cloneable handle to a running broker: diagnostics and shutdown.
///
/// Every method fails with `NotInitialized` once the broker task has
/// stopped.
#[derive(Clone)]
pub struct BrokerHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl BrokerHandle {
    /// Lists every identity currently holding a grant or with a
    /// non-empty queue.
    pub async fn tracked_identities(&self) -> CoordResult<Vec<IdentitySnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::TrackedIdentities { reply })
            .map_err(|_| CoordError::NotInitialized)?;
        rx.await.map_err(|_| CoordError::NotInitialized)
    }

    /// Stops the broker after the messages already queued are drained.
    pub async fn shutdown(&self) -> CoordResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .map_err(|_| CoordError::NotInitialized)?;
        rx.await.map_err(|_| CoordError::NotInitialized)
    }
}

/// The coordinating actor. Construct through [`GrantBroker::builder`].
pub struct GrantBroker {
    registry: ResourceRegistry,
    slots: SlotPool,
    resolver: NamingResolver,
    queue_policy: Arc<dyn QueuePolicy>,
    release_observer: Arc<dyn ReleaseObserver>,
    router: Arc<dyn GrantRouter>,
}

impl GrantBroker {
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        debug!(limit = self.slots.limit(), "grant broker started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::TrackedIdentities { reply }) => {
                        let _ = reply.send(self.snapshots());
                    }
                    Some(Command::Shutdown { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    // Every handle dropped; keep serving connected workers.
                    None => {
                        while let Some(message) = inbound.recv().await {
                            self.handle_message(message);
                        }
                        break;
                    }
                },
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(message),
                    // Transport gone: nothing can reach us anymore.
                    None => break,
                },
            }
        }
        debug!("grant broker stopped");
    }

    fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Acquire {
                request_id,
                action,
                owner,
                metadata,
            } => self.on_acquire(request_id, action, owner, metadata),
            InboundMessage::Release { request_id } => self.on_release(request_id),
            InboundMessage::OwnerDisconnected { owner } => self.on_owner_disconnected(owner),
        }
    }

    #[instrument(skip(self, metadata), fields(request = %request_id, owner = %owner, action = ?action))]
    fn on_acquire(
        &mut self,
        request_id: RequestId,
        action: Action,
        owner: OwnerId,
        metadata: FileMetadata,
    ) {
        if self.registry.contains_request(&request_id) {
            warn!("duplicate request id, dropping");
            return;
        }

        // The facade validates before sending; a failure here means a
        // misbehaving client, and the request never reaches a queue.
        let identity = match self.resolver.resolve(&owner, action, &metadata) {
            Ok(identity) => identity,
            Err(error) => {
                warn!(%error, "naming resolution failed, request dropped");
                return;
            }
        };

        let request = PendingRequest::new(request_id, owner, action, metadata);
        let queue_policy = Arc::clone(&self.queue_policy);
        let queue_metadata = request.metadata.clone();
        let queue_owner = request.owner.clone();
        self.registry.enqueue(identity.clone(), request, || {
            queue_policy.queue_for(
                &queue_metadata,
                &QueueContext {
                    identity: identity.path(),
                    owner: &queue_owner,
                },
            )
        });
        debug!(identity = %identity, "request enqueued");

        self.try_grant(&identity);
    }

    #[instrument(skip(self), fields(request = %request_id))]
    fn on_release(&mut self, request_id: RequestId) {
        match self.registry.release(request_id) {
            Ok((identity, ReleaseOutcome::Released(released))) => {
                self.slots.release();
                self.release_observer.on_release(&ReleaseContext {
                    request_id,
                    owner: &released.owner,
                    identity: identity.path(),
                    implicit: false,
                });
                debug!(identity = %identity, owner = %released.owner, "grant released");
                self.advance_all(Some(&identity));
            }
            Ok((identity, ReleaseOutcome::Withdrawn(withdrawn))) => {
                debug!(identity = %identity, owner = %withdrawn.owner, "queued request withdrawn");
            }
            // Duplicate or late release: expected race, recovered locally.
            Err(error) => warn!(%error, "ignoring release"),
        }
    }

    /// The reaper: treats a disconnection as an implicit release for
    /// every grant and a withdrawal for every queued request the owner
    /// had. This is the sole mechanism that keeps a crashed worker from
    /// stalling a queue forever.
    #[instrument(skip(self), fields(owner = %owner))]
    fn on_owner_disconnected(&mut self, owner: OwnerId) {
        let summary = self.registry.reap_owner(&owner);
        if summary.released.is_empty() && summary.withdrawn.is_empty() {
            return;
        }

        for (identity, released) in &summary.released {
            self.slots.release();
            self.release_observer.on_release(&ReleaseContext {
                request_id: released.request_id,
                owner: &owner,
                identity: identity.path(),
                implicit: true,
            });
        }
        warn!(
            released = summary.released.len(),
            withdrawn = summary.withdrawn.len(),
            "owner disconnected, holdings reaped"
        );

        self.advance_all(None);
    }

    /// Advances the queue of a single identity.
    fn try_grant(&mut self, identity: &FileIdentity) {
        if let Some(next) = self.registry.advance(identity, &mut self.slots) {
            debug!(
                identity = %identity,
                owner = %next.owner,
                request = %next.request_id,
                waited_ms = next.enqueued_at.elapsed().as_millis() as u64,
                "grant issued"
            );
            self.router.route_grant(
                &next.owner,
                GrantNotice {
                    request_id: next.request_id,
                    path: identity.path().to_path_buf(),
                },
            );
        }
    }

    /// Advances every identity with waiting requests, starting with the
    /// one just freed, until slots run out.
    fn advance_all(&mut self, first: Option<&FileIdentity>) {
        if let Some(identity) = first {
            self.try_grant(identity);
        }
        for identity in self.registry.waiting_identities() {
            if self.slots.active() >= self.slots.limit() {
                break;
            }
            self.try_grant(&identity);
        }
    }

    fn snapshots(&self) -> Vec<IdentitySnapshot> {
        self.registry
            .iter()
            .map(|(identity, state)| IdentitySnapshot {
                identity: identity.clone(),
                holder: state.holder().map(|h| h.owner.clone()),
                queued: state.queued(),
            })
            .collect()
    }
}
