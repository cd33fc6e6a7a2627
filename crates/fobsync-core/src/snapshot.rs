//! Immutable, fingerprinted snapshots of the authorization list.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::entry::AuthorizationEntry;

/// Hex-encoded SHA-256 of a snapshot's canonical JSON form.
///
/// Two snapshots with the same entries always have the same fingerprint,
/// whatever order the directory returned them in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn of(entries: &[AuthorizationEntry]) -> Self {
        let mut hasher = Sha256::new();
        serde_json::to_writer(&mut hasher, entries)
            .expect("authorization entries serialize to JSON infallibly");
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for Fingerprint {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// A sorted authorization list and its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<AuthorizationEntry>,
    fingerprint: Fingerprint,
}

impl Snapshot {
    /// Sort `entries` into canonical order and fingerprint them.
    pub fn new(mut entries: Vec<AuthorizationEntry>) -> Self {
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let fingerprint = Fingerprint::of(&entries);
        Self {
            entries,
            fingerprint,
        }
    }

    pub fn entries(&self) -> &[AuthorizationEntry] {
        &self.entries
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
