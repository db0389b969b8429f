//! Deterministic document and chunk identity.
//!
//! A document id is a pure function of the file bytes and the tenant scope:
//!
//! ```text
//! doc_id = sha256_hex("{userId}:{conversationId}:{sha256_hex(bytes)}")
//! ```
//!
//! Absent tenant fields contribute an empty string. The first chunk of a
//! document reuses the document id verbatim; chunk `i >= 1` is stored as
//! `"{doc_id}_{i}"`, so [`parent_id`] recovers the document id from any
//! stored chunk id.
//!
//! ```rust
//! use rag_advisor_core::identity::{chunk_id, compute_doc_id, parent_id};
//! use rag_advisor_core::TenantScope;
//!
//! let scope = TenantScope::new(Some("u1".into()), Some("c1".into()));
//! let id = compute_doc_id(b"%PDF-1.4 ...", &scope);
//! assert_eq!(id.as_str().len(), 64);
//! assert_eq!(parent_id(&chunk_id(&id, 2)), id.as_str());
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::tenant::TenantScope;

/// A 64-character lowercase hex document identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for DocId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// SHA-256 of raw bytes as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute the document identity for `bytes` ingested under `scope`.
///
/// The id is `sha256("{userId}:{conversationId}:{sha256(bytes)}")` with
/// absent ids written as empty strings. Fields are joined without escaping
/// so ids stay compatible with stores written by other clients of the same
/// scheme; as a consequence ids that themselves contain `:` can collide
/// (`("a:b", "")` and `("a", "b:")` hash the same text).
pub fn compute_doc_id(bytes: &[u8], scope: &TenantScope) -> DocId {
    let combined = format!(
        "{}:{}:{}",
        scope.user_id().unwrap_or(""),
        scope.conversation_id().unwrap_or(""),
        content_hash(bytes)
    );
    DocId(content_hash(combined.as_bytes()))
}

/// Id of the chunk at `ordinal` within the document `doc_id`.
pub fn chunk_id(doc_id: &DocId, ordinal: usize) -> String {
    if ordinal == 0 {
        doc_id.as_str().to_string()
    } else {
        format!("{}_{}", doc_id.as_str(), ordinal)
    }
}

/// Strip a trailing `_<digits>` ordinal suffix, if present.
///
/// Ids without such a suffix are returned unchanged. Only an all-digit
/// suffix counts, so `"a_b"` stays `"a_b"`.
pub fn parent_id(chunk_id: &str) -> &str {
    match chunk_id.rsplit_once('_') {
        Some((parent, ordinal))
            if !parent.is_empty()
                && !ordinal.is_empty()
                && ordinal.bytes().all(|b| b.is_ascii_digit()) =>
        {
            parent
        }
        _ => chunk_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(user: &str, conversation: &str) -> TenantScope {
        TenantScope::new(Some(user.to_string()), Some(conversation.to_string()))
    }

    #[test]
    fn doc_id_hashes_colon_joined_fields() {
        let expected = content_hash(format!("u1:c1:{}", content_hash(b"body")).as_bytes());
        assert_eq!(compute_doc_id(b"body", &scope("u1", "c1")).as_str(), expected);

        let unscoped = content_hash(format!("::{}", content_hash(b"body")).as_bytes());
        assert_eq!(compute_doc_id(b"body", &TenantScope::unscoped()).as_str(), unscoped);

        // Unescaped joining: a ':' inside an id shifts the field boundary.
        assert_eq!(
            compute_doc_id(b"body", &scope("a:b", "")),
            compute_doc_id(b"body", &scope("a", "b:"))
        );
    }

    #[test]
    fn doc_id_is_stable() {
        let a = compute_doc_id(b"same bytes", &scope("u1", "c1"));
        let b = compute_doc_id(b"same bytes", &scope("u1", "c1"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn doc_id_changes_with_bytes_or_scope() {
        let base = compute_doc_id(b"report", &scope("u1", "c1"));
        assert_ne!(base, compute_doc_id(b"report!", &scope("u1", "c1")));
        assert_ne!(base, compute_doc_id(b"report", &scope("u2", "c1")));
        assert_ne!(base, compute_doc_id(b"report", &scope("u1", "c2")));
        assert_ne!(base, compute_doc_id(b"report", &TenantScope::unscoped()));
    }

    #[test]
    fn doc_id_matches_documented_formula() {
        let file_hash = content_hash(b"abc");
        let expected = content_hash(format!("u1:c1:{}", file_hash).as_bytes());
        assert_eq!(compute_doc_id(b"abc", &scope("u1", "c1")).as_str(), expected);

        let unscoped = content_hash(format!("::{}", file_hash).as_bytes());
        assert_eq!(
            compute_doc_id(b"abc", &TenantScope::unscoped()).as_str(),
            unscoped
        );
    }

    #[test]
    fn content_hash_known_vector() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn chunk_ids_follow_ordinal_rule() {
        let id = compute_doc_id(b"x", &TenantScope::unscoped());
        assert_eq!(chunk_id(&id, 0), id.as_str());
        assert_eq!(chunk_id(&id, 1), format!("{}_1", id));
        assert_eq!(chunk_id(&id, 12), format!("{}_12", id));
    }

    #[test]
    fn parent_id_strips_ordinal_suffix() {
        assert_eq!(parent_id("abc123_2"), "abc123");
        assert_eq!(parent_id("abc123_10"), "abc123");
        assert_eq!(parent_id("abc123"), "abc123");
    }

    #[test]
    fn parent_id_ignores_non_ordinal_suffixes() {
        assert_eq!(parent_id("abc_def"), "abc_def");
        assert_eq!(parent_id("abc_"), "abc_");
        assert_eq!(parent_id("_7"), "_7");
        assert_eq!(parent_id("a_b_3"), "a_b");
    }
}
