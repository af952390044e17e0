//! The coordinating side of the file-storage layer.
//!
//! A single [`GrantBroker`] task owns all coordination state: the
//! resource registry, the global slot pool, and the naming resolver.
//! Workers talk to it exclusively through messages, which is the entire
//! basis of the cross-process safety guarantee.

mod broker;
mod registry;
mod resolver;

pub use broker::{
    BrokerBuilder, BrokerHandle, GrantBroker, IdentitySnapshot, DEFAULT_CONCURRENCY_LIMIT,
};
pub use registry::{ReapSummary, ReleaseOutcome, ResourceRegistry, ResourceState, SlotPool};
pub use resolver::NamingResolver;
