//! Per-worker client facade.
//!
//! Sends lock/access/unlink requests over the transport, returns the
//! request id synchronously, and resolves the eventual grant through a
//! oneshot (the callback registration of the protocol, in tokio idiom).
//! Nothing here blocks on the coordinator; correctness never depends on
//! message round-trip latency.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use filecoord_core::error::{CoordError, CoordResult};
use filecoord_core::request::{Action, FileMetadata, OwnerId, RequestId};
use filecoord_core::transport::{GrantNotice, InboundMessage, WorkerEndpoint};

/// A grant the coordinator has issued for one of our requests.
#[derive(Debug, Clone)]
pub struct Granted {
    pub request_id: RequestId,
    /// Resolved physical path the grant covers.
    pub path: PathBuf,
}

/// A request awaiting its grant.
///
/// Obtain the id immediately via [`PendingGrant::id`]; resolve the grant
/// with [`granted`](PendingGrant::granted), or poll non-blockingly with
/// [`try_granted`](PendingGrant::try_granted).
#[derive(Debug)]
pub struct PendingGrant {
    request_id: RequestId,
    grant: oneshot::Receiver<GrantNotice>,
}

impl PendingGrant {
    pub fn id(&self) -> RequestId {
        self.request_id
    }

    /// Waits for the grant notification.
    pub async fn granted(self) -> CoordResult<Granted> {
        let notice = self.grant.await.map_err(|_| {
            CoordError::transport("grant channel closed before a grant arrived")
        })?;
        Ok(Granted {
            request_id: notice.request_id,
            path: notice.path,
        })
    }

    /// Non-blocking check: `NotReady` while the grant has not arrived.
    pub fn try_granted(&mut self) -> CoordResult<Granted> {
        match self.grant.try_recv() {
            Ok(notice) => Ok(Granted {
                request_id: notice.request_id,
                path: notice.path,
            }),
            Err(oneshot::error::TryRecvError::Empty) => Err(CoordError::NotReady),
            Err(oneshot::error::TryRecvError::Closed) => Err(CoordError::transport(
                "grant channel closed before a grant arrived",
            )),
        }
    }
}

type WaiterMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<GrantNotice>>>>;
type OutstandingSet = Arc<Mutex<HashSet<RequestId>>>;

/// Client facade for one worker process.
///
/// Owns the worker's half of the transport and every request id the
/// worker has outstanding. Dropping the client (or calling
/// [`disconnect`](StorageClient::disconnect)) tells the coordinator to
/// reap whatever this owner still holds.
pub struct StorageClient {
    owner: OwnerId,
    requests: mpsc::UnboundedSender<InboundMessage>,
    waiters: WaiterMap,
    outstanding: OutstandingSet,
    dispatcher: JoinHandle<()>,
    disconnected: AtomicBool,
}

impl StorageClient {
    /// Connects a worker through a transport endpoint and starts the
    /// grant dispatcher. Must be called inside a tokio runtime.
    pub fn connect(owner: OwnerId, endpoint: WorkerEndpoint) -> Arc<Self> {
        let waiters: WaiterMap = Arc::new(Mutex::new(HashMap::new()));
        let outstanding: OutstandingSet = Arc::new(Mutex::new(HashSet::new()));

        let dispatcher = tokio::spawn(dispatch(
            endpoint.grants,
            Arc::clone(&waiters),
            Arc::clone(&outstanding),
            endpoint.requests.clone(),
        ));

        Arc::new(Self {
            owner,
            requests: endpoint.requests,
            waiters,
            outstanding,
            dispatcher,
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Requests an exclusive write hold.
    pub fn request_lock(&self, metadata: FileMetadata) -> CoordResult<PendingGrant> {
        self.request(Action::Lock, metadata)
    }

    /// Requests an exclusive read hold.
    pub fn request_access(&self, metadata: FileMetadata) -> CoordResult<PendingGrant> {
        self.request(Action::Access, metadata)
    }

    /// Requests an exclusive hold for deletion.
    pub fn request_unlink(&self, metadata: FileMetadata) -> CoordResult<PendingGrant> {
        self.request(Action::Unlink, metadata)
    }

    fn request(&self, action: Action, metadata: FileMetadata) -> CoordResult<PendingGrant> {
        // Protocol errors surface to the caller synchronously; a
        // malformed request must never reach a queue.
        metadata.validate()?;

        let request_id = RequestId::new();
        let (grant_tx, grant_rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(request_id, grant_tx);
        self.outstanding.lock().unwrap().insert(request_id);

        let sent = self.requests.send(InboundMessage::Acquire {
            request_id,
            action,
            owner: self.owner.clone(),
            metadata,
        });
        if sent.is_err() {
            self.waiters.lock().unwrap().remove(&request_id);
            self.outstanding.lock().unwrap().remove(&request_id);
            return Err(CoordError::NotInitialized);
        }

        Ok(PendingGrant {
            request_id,
            grant: grant_rx,
        })
    }

    /// Releases a grant (or withdraws a still-queued request).
    ///
    /// Fire-and-forget: the coordinator's release handling is idempotent
    /// against duplicates, so no acknowledgement is needed.
    pub fn release(&self, request_id: RequestId) {
        self.outstanding.lock().unwrap().remove(&request_id);
        self.waiters.lock().unwrap().remove(&request_id);
        if self
            .requests
            .send(InboundMessage::Release { request_id })
            .is_err()
        {
            debug!(request = %request_id, "coordinator gone, release dropped");
        }
    }

    /// Releases every request this worker still has outstanding.
    ///
    /// The cooperative half of crash tolerance: call at worker shutdown.
    /// A hard crash is covered by the coordinator's reaper instead.
    pub fn release_all_owned(&self) {
        let ids: Vec<RequestId> = self.outstanding.lock().unwrap().drain().collect();
        for request_id in ids {
            self.waiters.lock().unwrap().remove(&request_id);
            if self
                .requests
                .send(InboundMessage::Release { request_id })
                .is_err()
            {
                debug!(request = %request_id, "coordinator gone, release dropped");
                break;
            }
        }
    }

    /// Tells the coordinator this owner is gone so held grants are
    /// reaped. Idempotent; also runs on drop.
    pub fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.requests.send(InboundMessage::OwnerDisconnected {
            owner: self.owner.clone(),
        });
    }
}

impl Drop for StorageClient {
    fn drop(&mut self) {
        self.disconnect();
        self.dispatcher.abort();
    }
}

/// Routes incoming grants to their waiters.
///
/// A grant whose waiter vanished is released straight back; otherwise a
/// dropped `PendingGrant` would hold its resource until the owner
/// disconnects.
async fn dispatch(
    mut grants: mpsc::UnboundedReceiver<GrantNotice>,
    waiters: WaiterMap,
    outstanding: OutstandingSet,
    requests: mpsc::UnboundedSender<InboundMessage>,
) {
    while let Some(notice) = grants.recv().await {
        let waiter = waiters.lock().unwrap().remove(&notice.request_id);
        match waiter {
            Some(tx) => {
                if let Err(notice) = tx.send(notice) {
                    warn!(request = %notice.request_id, "grant arrived after its waiter was dropped, releasing");
                    outstanding.lock().unwrap().remove(&notice.request_id);
                    let _ = requests.send(InboundMessage::Release {
                        request_id: notice.request_id,
                    });
                }
            }
            // Already released or withdrawn locally; the release message
            // is in flight and the coordinator treats it idempotently.
            None => debug!(request = %notice.request_id, "grant for a request no longer tracked"),
        }
    }
}
