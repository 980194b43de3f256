//! Core vocabulary of the OAuth2 authorization server
//!
//! Protocol constants, the client and token data model, the error taxonomy,
//! PKCE verification, the token generator contract and the storage traits.
//! Everything here is transport-agnostic; `oauth2-manage` and
//! `oauth2-server` build the grant flows on top of it.

pub mod constants;
pub mod error;
pub mod generate;
pub mod models;
pub mod pkce;
pub mod store;

pub use constants::{CodeChallengeMethod, GrantType, ResponseType};
pub use error::{Error, ErrorKind, Result};
pub use generate::{GenerateBasic, GeneratedToken, RandomTokenGenerator, TokenGenerator};
pub use models::{AuthorizeRequest, Client, TokenGenerateRequest, TokenInfo};
pub use store::{BoxFuture, ClientStore, TokenStore};
