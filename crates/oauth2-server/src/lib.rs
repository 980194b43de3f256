//! OAuth2 protocol engine
//!
//! [`Server`] validates authorization and token requests, consults the
//! [`Handlers`] hook set, delegates issuance to an
//! [`oauth2_manage::Manager`] and renders the outcome as a transport-neutral
//! [`Response`]. Adaptors translate their HTTP framework's types into a
//! [`Request`] and back.

mod authorize;
mod bearer;
pub mod config;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;
mod token;

pub use config::ServerConfig;
pub use handler::{
    Handlers, client_basic_handler, client_basic_or_form_handler, client_form_handler,
};
pub use request::Request;
pub use response::{ErrorResponse, Response};
pub use server::Server;

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use http::{HeaderMap, HeaderValue, header};
    use oauth2_core::Client;
    use oauth2_manage::Manager;
    use oauth2_store::{ClientRegistry, KvTokenStore, MemoryKv};

    use crate::Server;

    pub const CLIENT_ID: &str = "111111";
    pub const CLIENT_SECRET: &str = "11111111";
    pub const DOMAIN: &str = "http://localhost:9094";
    pub const REDIRECT_URI: &str = "http://localhost:9094/oauth2";
    pub const USER_ID: &str = "000000";

    pub struct Fixture {
        pub server: Server,
        pub clients: Arc<ClientRegistry>,
        pub tokens: Arc<KvTokenStore>,
    }

    /// Server over in-memory stores with one registered client and a
    /// logged-in user.
    pub fn fixture() -> Fixture {
        let clients = Arc::new(ClientRegistry::new());
        let mut client = Client::new(CLIENT_ID, CLIENT_SECRET, DOMAIN);
        client.scopes = vec!["read".into(), "write".into()];
        clients.insert(client);

        let tokens = Arc::new(KvTokenStore::new(Arc::new(MemoryKv::new())));
        let manager = Arc::new(Manager::new(clients.clone(), tokens.clone()));
        let mut server = Server::with_manager(manager);
        server.set_user_authorization_handler(|_| Ok(Some(USER_ID.to_owned())));

        Fixture {
            server,
            clients,
            tokens,
        }
    }

    pub fn server() -> Server {
        fixture().server
    }

    pub fn authorize_query(response_type: &str) -> String {
        format!(
            "response_type={response_type}&client_id={CLIENT_ID}&redirect_uri={}&state=123",
            url::form_urlencoded::byte_serialize(REDIRECT_URI.as_bytes()).collect::<String>()
        )
    }

    pub fn basic_auth(id: &str, secret: &str) -> HeaderMap {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }
}
