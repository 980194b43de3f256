//! Storage contracts the manager depends on
//!
//! Both traits return boxed futures so that `Arc<dyn TokenStore>` and
//! `Arc<dyn ClientStore>` can be held by the manager. A lookup that finds
//! nothing is `Ok(None)`; `Err` is reserved for backend failures.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::models::{Client, TokenInfo};

/// Boxed, sendable future returned by the storage traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read-only view of the client registry.
pub trait ClientStore: Send + Sync {
    fn get_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Client>>>;
}

/// Persistence of issued grants.
///
/// `create` writes every lookup key of the record in one atomic step. The
/// removal methods are no-ops when the key is unknown.
pub trait TokenStore: Send + Sync {
    fn create<'a>(&'a self, info: &'a TokenInfo) -> BoxFuture<'a, Result<()>>;

    /// Consume a code. Returns `true` only for the one caller whose delete
    /// removed the live record, which is what makes a code single use when
    /// exchanges race.
    fn remove_by_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn remove_by_access<'a>(&'a self, access: &'a str) -> BoxFuture<'a, Result<()>>;

    fn remove_by_refresh<'a>(&'a self, refresh: &'a str) -> BoxFuture<'a, Result<()>>;

    fn get_by_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<Option<TokenInfo>>>;

    fn get_by_access<'a>(&'a self, access: &'a str) -> BoxFuture<'a, Result<Option<TokenInfo>>>;

    fn get_by_refresh<'a>(&'a self, refresh: &'a str)
    -> BoxFuture<'a, Result<Option<TokenInfo>>>;
}
