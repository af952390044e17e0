//! Message contract between workers and the coordinator, plus the
//! in-process transport used by tests and single-process deployments.
//!
//! The contract is deliberately narrow: workers send [`InboundMessage`]s
//! to the coordinator, the coordinator routes [`GrantNotice`]s back.
//! Delivery must be point-to-point and per-sender ordered; it is not
//! expected to survive a process crash; the coordinator's reaper handles
//! that case instead.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::request::{Action, FileMetadata, OwnerId, RequestId};

/// Messages a worker sends to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InboundMessage {
    /// Ask for a grant on the resource described by `metadata`.
    Acquire {
        request_id: RequestId,
        action: Action,
        owner: OwnerId,
        metadata: FileMetadata,
    },
    /// Give a grant back (or withdraw a still-queued request).
    Release { request_id: RequestId },
    /// The owner is gone; reap everything it holds or queues.
    OwnerDisconnected { owner: OwnerId },
}

/// Grant notification routed from the coordinator back to one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantNotice {
    pub request_id: RequestId,
    /// Resolved physical path the grant covers.
    pub path: PathBuf,
}

/// Coordinator-side half of the transport: routes grants to named owners.
///
/// Routing to a vanished owner must be a quiet no-op; the coordinator
/// never fails because a worker died mid-conversation.
pub trait GrantRouter: Send + Sync {
    fn route_grant(&self, owner: &OwnerId, notice: GrantNotice);
}

/// Worker-side endpoint: a sender for requests and the stream of grants
/// addressed to this owner.
///
/// Real transports (sockets, pipes) bridge into the same channel pair;
/// everything above this type is transport-agnostic.
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub requests: mpsc::UnboundedSender<InboundMessage>,
    pub grants: mpsc::UnboundedReceiver<GrantNotice>,
}

/// In-process transport: one shared inbound queue for the coordinator and
/// a named grant channel per connected owner.
///
/// Channel names are prefixed with a namespace so multiple independent
/// coordinators can share one process without collision.
pub struct LocalTransport {
    prefix: String,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    grant_channels: Mutex<HashMap<String, mpsc::UnboundedSender<GrantNotice>>>,
}

impl LocalTransport {
    pub fn new(prefix: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            prefix: prefix.into(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            grant_channels: Mutex::new(HashMap::new()),
        }
    }

    /// Takes the coordinator-side receive queue. Only the first caller
    /// gets it; there is exactly one coordinator per transport.
    pub fn coordinator_endpoint(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound_rx.lock().unwrap().take()
    }

    /// Connects a worker, replacing any previous channel registered under
    /// the same owner name.
    pub fn connect(&self, owner: &OwnerId) -> WorkerEndpoint {
        let (grant_tx, grant_rx) = mpsc::unbounded_channel();
        self.grant_channels
            .lock()
            .unwrap()
            .insert(self.channel_name(owner), grant_tx);
        WorkerEndpoint {
            requests: self.inbound_tx.clone(),
            grants: grant_rx,
        }
    }

    fn channel_name(&self, owner: &OwnerId) -> String {
        format!("{}:{}", self.prefix, owner)
    }
}

impl GrantRouter for LocalTransport {
    fn route_grant(&self, owner: &OwnerId, notice: GrantNotice) {
        let name = self.channel_name(owner);
        let mut channels = self.grant_channels.lock().unwrap();
        let delivered = match channels.get(&name) {
            Some(tx) => tx.send(notice).is_ok(),
            None => false,
        };
        if !delivered {
            // Dead receivers are unregistered so the map stays bounded.
            channels.remove(&name);
            warn!(owner = %owner, channel = %name, "grant dropped: owner not connected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_route_roundtrip() {
        let transport = LocalTransport::new("test");
        let owner = OwnerId::from("worker-1");
        let mut endpoint = transport.connect(&owner);

        let request_id = RequestId::new();
        endpoint
            .requests
            .send(InboundMessage::Acquire {
                request_id,
                action: Action::Lock,
                owner: owner.clone(),
                metadata: FileMetadata::anonymous("log"),
            })
            .unwrap();

        let mut inbound = transport.coordinator_endpoint().unwrap();
        match inbound.recv().await.unwrap() {
            InboundMessage::Acquire { request_id: id, .. } => assert_eq!(id, request_id),
            other => panic!("unexpected message: {other:?}"),
        }

        transport.route_grant(
            &owner,
            GrantNotice {
                request_id,
                path: PathBuf::from("/tmp/a.log"),
            },
        );
        let notice = endpoint.grants.recv().await.unwrap();
        assert_eq!(notice.request_id, request_id);
    }

    #[tokio::test]
    async fn coordinator_endpoint_is_single_use() {
        let transport = LocalTransport::new("test");
        assert!(transport.coordinator_endpoint().is_some());
        assert!(transport.coordinator_endpoint().is_none());
    }

    #[tokio::test]
    async fn grant_to_unknown_owner_is_dropped() {
        let transport = LocalTransport::new("test");
        // No panic, no delivery.
        transport.route_grant(
            &OwnerId::from("ghost"),
            GrantNotice {
                request_id: RequestId::new(),
                path: PathBuf::from("/tmp/x"),
            },
        );
    }

    #[tokio::test]
    async fn prefixes_keep_coordinators_apart() {
        let a = LocalTransport::new("a");
        let b = LocalTransport::new("b");
        let owner = OwnerId::from("worker-1");
        let mut on_a = a.connect(&owner);
        let _on_b = b.connect(&owner);

        a.route_grant(
            &owner,
            GrantNotice {
                request_id: RequestId::new(),
                path: PathBuf::from("/tmp/x"),
            },
        );
        assert!(on_a.grants.try_recv().is_ok());
    }
}
