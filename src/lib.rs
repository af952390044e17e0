//! Cross-process file-storage coordination for parallel test workers.
//!
//! Many worker processes read, write, append, and delete files on a
//! shared disk (screenshots, logs, reports, trace data) while a single
//! coordinating process arbitrates access. Coordination uses nothing but
//! asynchronous message passing (no shared memory, no OS-level file
//! locks), so it works identically across platforms and process
//! boundaries.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filecoord::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // One transport, one coordinator.
//!     let transport = Arc::new(LocalTransport::new("filecoord"));
//!     let inbound = transport.coordinator_endpoint().unwrap();
//!     let broker = GrantBroker::builder()
//!         .root_dir("/tmp/test-artifacts")
//!         .concurrency_limit(10)
//!         .spawn(transport.clone(), inbound)?;
//!
//!     // One client per worker process.
//!     let owner = OwnerId::from("worker-1");
//!     let client = StorageClient::connect(owner.clone(), transport.connect(&owner));
//!
//!     // Coordinated file: every operation is atomic with respect to
//!     // other holders of the same identity.
//!     let io = Arc::new(DiskFileIo);
//!     let log = CoordinatedFile::new(client.clone(), io, FileMetadata::shared("suite", "log"));
//!     log.append_str("worker-1 started\n").await?;
//!
//!     // Explicit transaction: one grant spans all three operations.
//!     log.transaction(|| async {
//!         let seen = log.read_to_string().await?;
//!         log.write_str(&seen).await?;
//!         log.append_str("summary line\n").await?;
//!         Ok(())
//!     })
//!     .await?;
//!
//!     client.release_all_owned();
//!     broker.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Guarantees
//!
//! - **Mutual exclusion**: at most one active holder per file identity;
//!   `lock`, `access`, and `unlink` are all exclusive holds.
//! - **Throttling**: a global slot pool bounds simultaneously active
//!   grants across the whole fleet, independent of identity count.
//! - **FIFO fairness**: per identity, grants are issued in enqueue order
//!   (unless a queue-policy hook substitutes its own ordering).
//! - **Crash tolerance**: a disconnected owner's grants are implicitly
//!   released and its queued requests withdrawn by the reaper.
//!
//! Coordination state is in-memory and lost on coordinator restart; this
//! is an access coordinator, not a durable or replicated store.
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `filecoord-core`: shared vocabulary, wire contract, file-I/O trait,
//!   plugin hooks
//! - `filecoord-broker`: the coordinating actor, registry, naming
//! - `filecoord-client`: worker-side facade and file handles
//!
//! For fine-grained control, depend on the individual crates instead.

// Re-export core types, contracts, and hooks
pub use filecoord_core::*;

// Re-export the coordinator
pub use filecoord_broker::*;

// Re-export the worker-side API
pub use filecoord_client::*;
