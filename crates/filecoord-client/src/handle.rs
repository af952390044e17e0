//! Coordinated file handle.
//!
//! The highest-level abstraction a test author or plugin touches: wraps
//! a [`StorageClient`] plus raw file I/O to provide read/write/append/
//! stat/unlink and explicit or implicit transactions. Outside a
//! transaction every operation is atomic with respect to other holders:
//! acquire, perform the I/O, release. Inside one, a single grant spans
//! all operations.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use filecoord_core::error::{CoordError, CoordResult};
use filecoord_core::io::{Encoding, FileIo, FileStat, IoOptions};
use filecoord_core::request::{Action, FileMetadata, RequestId};

use crate::facade::{Granted, StorageClient};

#[derive(Debug, Default)]
struct HandleState {
    transaction_depth: u32,
    held: Option<Granted>,
}

/// A file whose access is arbitrated by the coordinator.
///
/// Operations take `&self`; per-handle state is serialized internally,
/// so a handle can be shared across tasks of one worker.
pub struct CoordinatedFile<F: FileIo> {
    client: Arc<StorageClient>,
    io: Arc<F>,
    metadata: FileMetadata,
    options: IoOptions,
    state: Mutex<HandleState>,
}

impl<F: FileIo> CoordinatedFile<F> {
    pub fn new(client: Arc<StorageClient>, io: Arc<F>, metadata: FileMetadata) -> Self {
        Self::with_options(client, io, metadata, IoOptions::default())
    }

    pub fn with_options(
        client: Arc<StorageClient>,
        io: Arc<F>,
        metadata: FileMetadata,
        options: IoOptions,
    ) -> Self {
        Self {
            client,
            io,
            metadata,
            options,
            state: Mutex::new(HandleState::default()),
        }
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn options(&self) -> IoOptions {
        self.options
    }

    /// Physical path of the currently held grant.
    ///
    /// # Errors
    ///
    /// `NotReady` when no grant is held (before `start_transaction`
    /// completed, or between implicit operations).
    pub async fn resolved_path(&self) -> CoordResult<PathBuf> {
        let state = self.state.lock().await;
        state
            .held
            .as_ref()
            .map(|granted| granted.path.clone())
            .ok_or(CoordError::NotReady)
    }

    /// Reads the whole file. In text mode the contents must decode as
    /// UTF-8.
    pub async fn read(&self) -> CoordResult<Vec<u8>> {
        let bytes = self
            .run(Action::Access, |path, io| async move { io.read(&path).await })
            .await?;
        if self.options.encoding == Encoding::Utf8 {
            std::str::from_utf8(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }
        Ok(bytes)
    }

    /// Reads the whole file as UTF-8 text.
    pub async fn read_to_string(&self) -> CoordResult<String> {
        let bytes = self
            .run(Action::Access, |path, io| async move { io.read(&path).await })
            .await?;
        String::from_utf8(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
    }

    /// Replaces the file contents.
    pub async fn write(&self, data: &[u8]) -> CoordResult<()> {
        let data = data.to_vec();
        self.run(Action::Lock, |path, io| async move {
            io.write(&path, &data).await
        })
        .await
    }

    /// Replaces the file contents with text.
    pub async fn write_str(&self, text: &str) -> CoordResult<()> {
        self.write(text.as_bytes()).await
    }

    /// Appends to the file, creating it if missing.
    pub async fn append(&self, data: &[u8]) -> CoordResult<()> {
        let data = data.to_vec();
        self.run(Action::Lock, |path, io| async move {
            io.append(&path, &data).await
        })
        .await
    }

    /// Appends text to the file.
    pub async fn append_str(&self, text: &str) -> CoordResult<()> {
        self.append(text.as_bytes()).await
    }

    /// Stats the file.
    pub async fn stat(&self) -> CoordResult<FileStat> {
        self.run(Action::Access, |path, io| async move { io.stat(&path).await })
            .await
    }

    /// Deletes the file.
    pub async fn unlink(&self) -> CoordResult<()> {
        self.run(Action::Unlink, |path, io| async move {
            io.unlink(&path).await
        })
        .await
    }

    /// Begins an explicit transaction: one grant spans every operation
    /// until [`end_transaction`](Self::end_transaction).
    ///
    /// # Errors
    ///
    /// `TransactionActive` when a transaction is already open; nesting
    /// is not supported.
    pub async fn start_transaction(&self) -> CoordResult<()> {
        let mut state = self.state.lock().await;
        if state.transaction_depth > 0 {
            return Err(CoordError::TransactionActive);
        }
        // Holding the state lock across the wait keeps a concurrent
        // operation on this handle from sneaking in before the
        // transaction is established.
        let granted = self
            .client
            .request_lock(self.metadata.clone())?
            .granted()
            .await?;
        state.transaction_depth = 1;
        state.held = Some(granted);
        Ok(())
    }

    /// Ends the transaction and releases its grant.
    ///
    /// # Errors
    ///
    /// `NoActiveTransaction` when no transaction is open.
    pub async fn end_transaction(&self) -> CoordResult<()> {
        let mut state = self.state.lock().await;
        if state.transaction_depth == 0 {
            return Err(CoordError::NoActiveTransaction);
        }
        state.transaction_depth = 0;
        if let Some(granted) = state.held.take() {
            self.client.release(granted.request_id);
        }
        Ok(())
    }

    /// Runs `body` inside a transaction. The grant is released on every
    /// exit path, including when `body` fails.
    pub async fn transaction<T, Fut>(&self, body: impl FnOnce() -> Fut) -> CoordResult<T>
    where
        Fut: Future<Output = CoordResult<T>>,
    {
        self.start_transaction().await?;
        let result = body().await;
        let ended = self.end_transaction().await;
        match result {
            Ok(value) => {
                ended?;
                Ok(value)
            }
            // The body's error is the interesting one.
            Err(error) => Err(error),
        }
    }

    /// Acquires a grant appropriate for `action` (or reuses the
    /// transaction's), runs the I/O, and releases if the grant was
    /// acquired here. A failed operation releases too, leaving the
    /// handle idle so the caller can retry or abandon it.
    async fn run<T, Fut>(
        &self,
        action: Action,
        operation: impl FnOnce(PathBuf, Arc<F>) -> Fut,
    ) -> CoordResult<T>
    where
        Fut: Future<Output = io::Result<T>>,
    {
        let (path, owned) = self.acquire_for(action).await?;
        let result = operation(path, Arc::clone(&self.io)).await;
        if let Some(request_id) = owned {
            self.client.release(request_id);
        }
        Ok(result?)
    }

    /// Returns the path to operate on plus the request id to release
    /// afterwards (`None` inside a transaction).
    async fn acquire_for(&self, action: Action) -> CoordResult<(PathBuf, Option<RequestId>)> {
        {
            let state = self.state.lock().await;
            if state.transaction_depth > 0 {
                let held = state.held.as_ref().ok_or(CoordError::NotReady)?;
                return Ok((held.path.clone(), None));
            }
        }

        let pending = match action {
            Action::Lock => self.client.request_lock(self.metadata.clone())?,
            Action::Access => self.client.request_access(self.metadata.clone())?,
            Action::Unlink => self.client.request_unlink(self.metadata.clone())?,
        };
        let granted = pending.granted().await?;
        Ok((granted.path, Some(granted.request_id)))
    }
}
