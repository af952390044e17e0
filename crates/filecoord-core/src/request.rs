//! Request vocabulary shared by the coordinator and its clients.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoordError, CoordResult};

/// Unique identifier of a coordination request.
///
/// Minted by the client facade so that request methods can return the id
/// synchronously; the coordinator rejects duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Mints a fresh request id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a worker process participating in coordination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// What a request intends to do with the file once granted.
///
/// All three actions are mutually exclusive holds on the same identity;
/// they are distinguished so hooks can observe intent, not because their
/// scheduling differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Exclusive hold for writing.
    Lock,
    /// Exclusive hold for reading.
    Access,
    /// Exclusive hold for deletion.
    Unlink,
}

/// How explicit names are scoped across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Uniqueness {
    /// The identity is namespaced by owner id; two workers never collide
    /// even when they supply the same explicit name.
    #[default]
    PerWorker,
    /// Every caller supplying the same explicit name resolves to the same
    /// identity; this is what lets workers coordinate over one file.
    Global,
}

/// Metadata describing the file a request wants to operate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// File extension, with or without the leading dot.
    pub extension: String,
    /// Explicit file name. When omitted, every request resolves to a
    /// fresh random-token name and is never contended.
    pub explicit_name: Option<String>,
    /// Scoping policy for explicit names.
    pub uniqueness: Uniqueness,
}

impl FileMetadata {
    /// Metadata for a throwaway file named by a random token.
    pub fn anonymous(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            explicit_name: None,
            uniqueness: Uniqueness::PerWorker,
        }
    }

    /// Metadata for a named file private to the requesting worker.
    pub fn named(name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            explicit_name: Some(name.into()),
            uniqueness: Uniqueness::PerWorker,
        }
    }

    /// Metadata for a named file shared by every worker.
    pub fn shared(name: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            explicit_name: Some(name.into()),
            uniqueness: Uniqueness::Global,
        }
    }

    /// Checks that this metadata can resolve to a path at all.
    ///
    /// The facade calls this before sending so that `InvalidMetadata`
    /// surfaces synchronously to the requesting worker; the coordinator
    /// re-checks on arrival.
    pub fn validate(&self) -> CoordResult<()> {
        validate_extension(&self.extension)?;
        if let Some(name) = &self.explicit_name {
            validate_explicit_name(name)?;
        }
        Ok(())
    }
}

/// Validates an extension and returns it without the leading dot.
pub fn validate_extension(extension: &str) -> CoordResult<&str> {
    let extension = extension.strip_prefix('.').unwrap_or(extension);
    if extension.is_empty() {
        return Err(CoordError::InvalidMetadata(
            "extension cannot be empty".to_string(),
        ));
    }
    if !extension
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.')
    {
        return Err(CoordError::InvalidMetadata(format!(
            "extension '{extension}' contains non-portable characters"
        )));
    }
    Ok(extension)
}

/// Validates an explicit file name.
///
/// Path separators and traversal segments are hard errors rather than
/// something to sanitize away: a request naming a different directory is
/// malformed, not misspelled.
pub fn validate_explicit_name(name: &str) -> CoordResult<()> {
    if name.is_empty() {
        return Err(CoordError::InvalidMetadata(
            "explicit name cannot be empty".to_string(),
        ));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(CoordError::InvalidMetadata(format!(
            "explicit name '{name}' must not contain path separators"
        )));
    }
    if name == "." || name == ".." {
        return Err(CoordError::InvalidMetadata(format!(
            "explicit name '{name}' is a path traversal segment"
        )));
    }
    Ok(())
}

/// Logical name of a coordinated resource.
///
/// Distinct from a physical path in principle, though in this design the
/// two coincide once resolution has run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity(PathBuf);

impl FileIdentity {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl From<PathBuf> for FileIdentity {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A queued ask for a grant, not yet fulfilled.
///
/// Never mutated once granted; removed on release.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub owner: OwnerId,
    pub action: Action,
    pub metadata: FileMetadata,
    pub enqueued_at: Instant,
}

impl PendingRequest {
    pub fn new(request_id: RequestId, owner: OwnerId, action: Action, metadata: FileMetadata) -> Self {
        Self {
            request_id,
            owner,
            action,
            metadata,
            enqueued_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_leading_dot_is_stripped() {
        assert_eq!(validate_extension(".png").unwrap(), "png");
        assert_eq!(validate_extension("tar.gz").unwrap(), "tar.gz");
    }

    #[test]
    fn empty_extension_is_rejected() {
        assert!(validate_extension("").is_err());
        assert!(validate_extension(".").is_err());
    }

    #[test]
    fn separator_in_name_is_rejected() {
        assert!(validate_explicit_name("a/b").is_err());
        assert!(validate_explicit_name("a\\b").is_err());
        assert!(validate_explicit_name("..").is_err());
        assert!(validate_explicit_name("report").is_ok());
    }

    #[test]
    fn metadata_validation_covers_both_fields() {
        assert!(FileMetadata::shared("report", "json").validate().is_ok());
        assert!(FileMetadata::named("../escape", "log").validate().is_err());
        assert!(FileMetadata::anonymous("").validate().is_err());
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }
}
