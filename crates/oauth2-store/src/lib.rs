//! Persistence for the authorization server
//!
//! - [`ClientRegistry`]: registered clients, optionally file-backed.
//! - [`KvTokenStore`]: issued grants in a key-value backend, with access and
//!   refresh tokens as reference-counted pointers to a shared record.
//! - [`MemoryKv`]: the in-process backend, kept bounded by
//!   [`spawn_sweeper`].
//!
//! Record lifecycle:
//! 1. Authorization code issued → `code:` key holds the record until
//!    exchanged or expired
//! 2. Token issued → `basic:` record plus `access:`/`refresh:` pointers,
//!    written in one batch
//! 3. Access revoked or refreshed away → pointer deleted, record kept while
//!    the refresh pointer still names it
//! 4. Last pointer gone → record deleted; TTLs collect anything left behind

pub mod client;
pub mod error;
pub mod kv;
pub mod record;
pub mod sweep;
pub mod token;

pub use client::ClientRegistry;
pub use error::{Error, Result};
pub use kv::{KvBackend, MemoryKv, WriteBatch, WriteOp};
pub use record::RecordState;
pub use sweep::spawn_sweeper;
pub use token::KvTokenStore;
