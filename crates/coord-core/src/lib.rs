//! # coord-core
//!
//! Message model, key-value adapter trait, configuration, and the error
//! taxonomy shared by every coordination-broker binary: the tool host, the
//! gate hooks, and the session launcher/teardown scripts.
//!
//! ## Modules
//!
//! - [`types`] — the closed message-type enumeration, envelope, payload,
//!   query filter, notification event, presence record, and stats.
//! - [`kv`] — the [`kv::KvStore`] trait the broker client is written
//!   against, plus [`kv::MemoryStore`], the in-memory fake every test in
//!   this workspace runs against instead of a real Redis instance.
//! - [`config`] — environment-loaded, explicitly-threaded configuration.
//! - [`error`] — leaf error types composed through `anyhow::Result` at
//!   call sites elsewhere in the workspace.

pub mod config;
pub mod error;
pub mod kv;
pub mod types;


pub use config::Config;
pub use error::{BackendError, MessageError};
pub use kv::{KvStore, MemoryStore};
pub use types::{
    CoordinationStats, MessageEnvelope, MessagePayload, MessageQuery, MessageType,
    NotificationEvent, PresenceRecord, BROADCAST_TARGET,
};
