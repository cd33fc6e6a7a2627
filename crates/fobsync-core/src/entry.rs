//! Authorization entries and the rules that derive them from directory records.
//!
//! A directory record becomes an [`AuthorizationEntry`] only when it has an id,
//! at least one credential (key fob or QR code) and a non-empty access-approval
//! attribute. Anything else is dropped silently: it is a filtering rule, not an error.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One principal's access grant as published to door controllers.
///
/// Credential ids are never zero; a zero in the directory means "absent".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationEntry {
    #[serde(rename = "userID")]
    principal_id: String,
    #[serde(rename = "fobID", skip_serializing_if = "Option::is_none")]
    fob_id: Option<u64>,
    #[serde(rename = "qrID", skip_serializing_if = "Option::is_none")]
    qr_id: Option<u64>,
    #[serde(rename = "ttl")]
    ttl_ms: u64,
}

impl AuthorizationEntry {
    /// Build an entry, treating zero credential ids as absent.
    ///
    /// Returns `None` when neither credential is present.
    pub fn new(principal_id: impl Into<String>, fob_id: u64, qr_id: u64, ttl: Duration) -> Option<Self> {
        let fob_id = (fob_id != 0).then_some(fob_id);
        let qr_id = (qr_id != 0).then_some(qr_id);
        if fob_id.is_none() && qr_id.is_none() {
            return None;
        }
        Some(Self {
            principal_id: principal_id.into(),
            fob_id,
            qr_id,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        })
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    pub fn fob_id(&self) -> Option<u64> {
        self.fob_id
    }

    pub fn qr_id(&self) -> Option<u64> {
        self.qr_id
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Total ordering used for snapshots: fob id ascending (absent first),
    /// then QR id, then principal id.
    pub(crate) fn sort_key(&self) -> (u64, u64, &str) {
        (
            self.fob_id.unwrap_or(0),
            self.qr_id.unwrap_or(0),
            self.principal_id.as_str(),
        )
    }
}

/// A raw principal as returned by the directory service.
///
/// Mirrors the subset of a directory user representation that fobsync reads;
/// unknown fields are ignored when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, Vec<String>>>,
}

impl PrincipalRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            attributes: None,
        }
    }

    /// Append a value to a (possibly multi-valued) attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(BTreeMap::new)
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// First value of an attribute, or `""` when the attribute is missing or empty.
    pub fn first_attribute(&self, name: &str) -> &str {
        self.attributes
            .as_ref()
            .and_then(|attrs| attrs.get(name))
            .and_then(|values| values.first())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Which directory attributes carry credentials and approval, and the TTL
/// handed to door controllers with every entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMapping {
    pub fob_attribute: String,
    pub qr_attribute: String,
    pub approval_attribute: String,
    pub entry_ttl: Duration,
}

impl Default for EntryMapping {
    fn default() -> Self {
        Self {
            fob_attribute: "keyfobID".into(),
            qr_attribute: "qrID".into(),
            approval_attribute: "buildingAccessApprover".into(),
            entry_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EntryMapping {
    /// Translate one record into zero or one entry.
    pub fn translate(&self, record: &PrincipalRecord) -> Option<AuthorizationEntry> {
        let id = record.id.as_deref().filter(|id| !id.is_empty())?;

        let fob_id = parse_credential(record.first_attribute(&self.fob_attribute));
        let qr_id = parse_credential(record.first_attribute(&self.qr_attribute));
        if fob_id == 0 && qr_id == 0 {
            return None;
        }
        // Accounts without an explicit approval get no access.
        if record.first_attribute(&self.approval_attribute).is_empty() {
            return None;
        }

        AuthorizationEntry::new(id, fob_id, qr_id, self.entry_ttl)
    }

    /// Translate a whole fetch, returning the accepted entries and the number
    /// of records that were excluded.
    pub fn translate_all(&self, records: &[PrincipalRecord]) -> (Vec<AuthorizationEntry>, usize) {
        let entries: Vec<_> = records.iter().filter_map(|r| self.translate(r)).collect();
        let excluded = records.len() - entries.len();
        (entries, excluded)
    }
}

/// Surrounding whitespace is ignored. Negative or unparsable values count as absent.
fn parse_credential(raw: &str) -> u64 {
    raw.trim().parse().unwrap_or(0)
}
