//! Identity resolution: turns request metadata into a concrete path.
//!
//! Resolution is deterministic for explicit names (that is what lets two
//! workers coordinate over the same logical file) and random-token based
//! for anonymous requests. The registered naming hook gets one chance to
//! rewrite the candidate before the identity is used.

use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha512};
use uuid::Uuid;

use filecoord_core::error::CoordResult;
use filecoord_core::hooks::{NamingContext, NamingHook};
use filecoord_core::request::{
    validate_explicit_name, validate_extension, Action, FileIdentity, FileMetadata, OwnerId,
    Uniqueness,
};

/// Longest path component emitted before compaction kicks in.
const MAX_COMPONENT_LENGTH: usize = 64;

/// Hash suffix length in Base32 characters.
const HASH_SUFFIX_CHARS: usize = 16;

/// Base32 alphabet (RFC 4648).
const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Derives file identities from request metadata.
pub struct NamingResolver {
    root: PathBuf,
    hook: Arc<dyn NamingHook>,
}

impl NamingResolver {
    pub fn new(root: PathBuf, hook: Arc<dyn NamingHook>) -> Self {
        Self { root, hook }
    }

    /// Resolves `metadata` to a stable identity for `owner`.
    ///
    /// Malformed metadata fails the whole request with `InvalidMetadata`
    /// and never reaches a queue.
    pub fn resolve(
        &self,
        owner: &OwnerId,
        action: Action,
        metadata: &FileMetadata,
    ) -> CoordResult<FileIdentity> {
        let extension = validate_extension(&metadata.extension)?;

        let base_name = match &metadata.explicit_name {
            Some(name) => {
                validate_explicit_name(name)?;
                compact(&sanitize(name))
            }
            // Fresh token per request: anonymous resources are never
            // contended.
            None => Uuid::new_v4().simple().to_string(),
        };

        let mut candidate = self.root.clone();
        if metadata.uniqueness == Uniqueness::PerWorker {
            candidate.push(compact(&sanitize(owner.as_str())));
        }
        candidate.push(format!("{base_name}.{extension}"));

        let ctx = NamingContext {
            owner,
            action,
            metadata,
        };
        Ok(FileIdentity::from(self.hook.resolve(candidate, &ctx)))
    }
}

/// Replaces characters that are not portable across filesystems.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Caps a component at the portable length, keeping a stable hash suffix
/// so distinct long names stay distinct.
fn compact(component: &str) -> String {
    if component.len() <= MAX_COMPONENT_LENGTH {
        return component.to_string();
    }
    let prefix_len = MAX_COMPONENT_LENGTH - HASH_SUFFIX_CHARS;
    format!(
        "{}{}",
        &component[..prefix_len],
        hash_suffix(component.as_bytes())
    )
}

/// First `HASH_SUFFIX_CHARS` Base32 characters of the SHA-512 digest.
fn hash_suffix(bytes: &[u8]) -> String {
    let digest = Sha512::digest(bytes);

    let mut chars = Vec::with_capacity(HASH_SUFFIX_CHARS);
    let mut bit_buffer = 0u32;
    let mut bits_remaining = 0u32;

    for byte in digest.iter().take(HASH_SUFFIX_CHARS) {
        bit_buffer |= (*byte as u32) << bits_remaining;
        bits_remaining += 8;
        while bits_remaining >= 5 && chars.len() < HASH_SUFFIX_CHARS {
            let index = (bit_buffer & 0x1f) as usize;
            chars.push(BASE32_ALPHABET[index] as char);
            bit_buffer >>= 5;
            bits_remaining -= 5;
        }
    }

    chars.into_iter().collect()
}
