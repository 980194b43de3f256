//! Types shared by the authorization server crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
