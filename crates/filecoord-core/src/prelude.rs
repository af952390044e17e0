//! Convenience prelude for coordination types.

pub use crate::error::{CoordError, CoordResult};
pub use crate::hooks::{
    FifoPolicy, FifoQueue, IdentityNaming, NamingContext, NamingHook, NoopReleaseObserver,
    QueueContext, QueuePolicy, ReleaseContext, ReleaseObserver, WaitQueue,
};
pub use crate::io::{DiskFileIo, Encoding, FileIo, FileStat, IoOptions, MemoryFileIo};
pub use crate::request::{
    Action, FileIdentity, FileMetadata, OwnerId, PendingRequest, RequestId, Uniqueness,
};
pub use crate::transport::{
    GrantNotice, GrantRouter, InboundMessage, LocalTransport, WorkerEndpoint,
};
