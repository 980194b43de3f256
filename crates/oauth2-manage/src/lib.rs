//! Token management for the authorization server
//!
//! [`Manager`] mediates between the client registry, the token store and
//! the token generator. It enforces client authentication, code single-use,
//! ownership and expiry, and computes lifetimes from [`ManagerConfig`].

pub mod config;
pub mod manager;
pub mod uri;

pub use config::{ManagerConfig, RefreshConfig, TokenConfig};
pub use manager::{Manager, UriValidator};
pub use uri::validate_uri;
