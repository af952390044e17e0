//! Shared helpers for the integration suite.

#![allow(dead_code)] // Not every test binary uses every helper.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use filecoord::*;

/// Installs a tracing subscriber once per test binary so `RUST_LOG`
/// surfaces broker activity when a test misbehaves.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A transport + broker pair rooted in a fresh temp directory.
pub struct TestRig {
    pub transport: Arc<LocalTransport>,
    pub broker: BrokerHandle,
    pub root: tempfile::TempDir,
}

/// Spawns a rig with the given concurrency limit and default hooks.
pub fn spawn_rig(concurrency_limit: usize) -> TestRig {
    spawn_rig_with(GrantBroker::builder().concurrency_limit(concurrency_limit))
}

/// Spawns a rig from a pre-configured builder (root dir is filled in).
pub fn spawn_rig_with(builder: BrokerBuilder) -> TestRig {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let transport = Arc::new(LocalTransport::new("test"));
    let inbound = transport.coordinator_endpoint().unwrap();
    let broker = builder
        .root_dir(root.path())
        .spawn(transport.clone(), inbound)
        .unwrap();
    TestRig {
        transport,
        broker,
        root,
    }
}

/// Connects a named worker client to the rig.
pub fn connect(rig: &TestRig, name: &str) -> Arc<StorageClient> {
    let owner = OwnerId::from(name);
    StorageClient::connect(owner.clone(), rig.transport.connect(&owner))
}

/// Release observer that counts cooperative and implicit releases.
pub struct CountingObserver {
    releases: Arc<AtomicUsize>,
    implicit: Arc<AtomicUsize>,
}

impl CountingObserver {
    /// Returns the observer plus shared counters the test keeps.
    pub fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let implicit = Arc::new(AtomicUsize::new(0));
        (
            Self {
                releases: Arc::clone(&releases),
                implicit: Arc::clone(&implicit),
            },
            releases,
            implicit,
        )
    }
}

impl ReleaseObserver for CountingObserver {
    fn on_release(&self, ctx: &ReleaseContext<'_>) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if ctx.implicit {
            self.implicit.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Naming hook that counts resolutions without rewriting anything.
pub struct CountingNaming {
    resolutions: Arc<AtomicUsize>,
}

impl CountingNaming {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let resolutions = Arc::new(AtomicUsize::new(0));
        (
            Self {
                resolutions: Arc::clone(&resolutions),
            },
            resolutions,
        )
    }
}

impl NamingHook for CountingNaming {
    fn resolve(&self, candidate: std::path::PathBuf, _ctx: &NamingContext<'_>) -> std::path::PathBuf {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        candidate
    }
}
