//! Core of fobsync: a refreshable, versioned snapshot of the access-control list.
//!
//! The pieces fit together as follows:
//!
//! ```text
//! periodic timer ─┐
//! webhook ────────┼─► RefreshTrigger ─► RefreshDriver ─► DirectorySource
//! startup ────────┘   (1 pending max)        │
//!                                            ▼
//!                           SnapshotStore::replace_if_changed
//!                                            │ wakes waiters
//!                                            ▼
//!                              readers: load() / wait_for_change()
//! ```

pub mod backoff;
pub mod driver;
pub mod entry;
pub mod error;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod trigger;

pub use backoff::{Backoff, DEFAULT_RETRY_FLOOR};
pub use driver::{DriverConfig, RefreshDriver, RefreshOutcome, spawn_periodic_trigger};
pub use entry::{AuthorizationEntry, EntryMapping, PrincipalRecord};
pub use error::SourceError;
pub use snapshot::{Fingerprint, Snapshot};
pub use source::DirectorySource;
pub use store::{SnapshotStore, Waiter};
pub use trigger::{RefreshTrigger, TriggerReceiver, TriggerSource, refresh_channel};
