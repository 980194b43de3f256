//! Protocol engine configuration

use oauth2_core::constants::DEFAULT_TOKEN_TYPE;
use oauth2_core::{CodeChallengeMethod, GrantType, ResponseType};
use serde::Deserialize;

/// What the authorization and token endpoints accept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `token_type` reported in token responses.
    pub token_type: String,
    /// Accept GET on the token endpoint.
    pub allow_get_access_request: bool,
    pub allowed_response_types: Vec<ResponseType>,
    pub allowed_grant_types: Vec<GrantType>,
    pub allowed_code_challenge_methods: Vec<CodeChallengeMethod>,
    /// Reject authorization requests that carry no `code_challenge`.
    pub force_pkce: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            token_type: DEFAULT_TOKEN_TYPE.to_owned(),
            allow_get_access_request: false,
            allowed_response_types: vec![ResponseType::Code, ResponseType::Token],
            allowed_grant_types: vec![
                GrantType::AuthorizationCode,
                GrantType::PasswordCredentials,
                GrantType::ClientCredentials,
                GrantType::Refreshing,
            ],
            allowed_code_challenge_methods: vec![
                CodeChallengeMethod::Plain,
                CodeChallengeMethod::S256,
            ],
            force_pkce: false,
        }
    }
}

impl ServerConfig {
    pub fn allows_response_type(&self, rt: ResponseType) -> bool {
        self.allowed_response_types.contains(&rt)
    }

    pub fn allows_grant_type(&self, gt: GrantType) -> bool {
        self.allowed_grant_types.contains(&gt)
    }

    pub fn allows_code_challenge_method(&self, method: CodeChallengeMethod) -> bool {
        self.allowed_code_challenge_methods.contains(&method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_every_grant_but_get_requests() {
        let config = ServerConfig::default();
        assert_eq!(config.token_type, "Bearer");
        assert!(!config.allow_get_access_request);
        assert!(config.allows_grant_type(GrantType::Refreshing));
        assert!(config.allows_response_type(ResponseType::Token));
        assert!(!config.force_pkce);
    }

    #[test]
    fn toml_uses_wire_names() {
        let config: ServerConfig = toml::from_str(
            r#"
allowed_grant_types = ["authorization_code", "refresh_token"]
allowed_response_types = ["code"]
allowed_code_challenge_methods = ["S256"]
force_pkce = true
"#,
        )
        .unwrap();
        assert!(config.allows_grant_type(GrantType::AuthorizationCode));
        assert!(!config.allows_grant_type(GrantType::PasswordCredentials));
        assert!(!config.allows_response_type(ResponseType::Token));
        assert!(!config.allows_code_challenge_method(CodeChallengeMethod::Plain));
        assert!(config.force_pkce);
        assert_eq!(config.token_type, "Bearer");
    }
}
