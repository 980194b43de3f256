//! Grant-agnostic token management
//!
//! The manager owns the client store, the token store and the generator. It
//! authenticates clients, enforces ownership and expiry, and decides
//! lifetimes; the protocol engine decides which of its primitives a request
//! maps to.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use oauth2_core::models::is_scope_subset;
use oauth2_core::{
    AuthorizeRequest, Client, ClientStore, Error, ErrorKind, GenerateBasic, GrantType,
    RandomTokenGenerator, Result, TokenGenerateRequest, TokenGenerator, TokenInfo, TokenStore,
    pkce,
};
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::uri::validate_uri;

/// Redirect URI policy: `(registered_domain, redirect_uri)`.
pub type UriValidator = Arc<dyn Fn(&str, &str) -> Result<()> + Send + Sync>;

pub struct Manager {
    config: ManagerConfig,
    clients: Arc<dyn ClientStore>,
    tokens: Arc<dyn TokenStore>,
    generator: Arc<dyn TokenGenerator>,
    validate_uri: UriValidator,
}

impl Manager {
    /// Manager with default lifetimes, random tokens and the default
    /// redirect URI policy.
    pub fn new(clients: Arc<dyn ClientStore>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            config: ManagerConfig::default(),
            clients,
            tokens,
            generator: Arc::new(RandomTokenGenerator::new()),
            validate_uri: Arc::new(validate_uri),
        }
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TokenGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_uri_validator(
        mut self,
        validator: impl Fn(&str, &str) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.validate_uri = Arc::new(validator);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Resolve a registered client. Unknown ids are `invalid_client`.
    pub async fn get_client(&self, client_id: &str) -> Result<Client> {
        match self.clients.get_by_id(client_id).await? {
            Some(client) => Ok(client),
            None => {
                debug!(client_id, "unknown client");
                Err(ErrorKind::InvalidClient.into())
            }
        }
    }

    /// Check a redirect URI against a client's registered domain.
    pub fn check_redirect_uri(&self, client: &Client, redirect_uri: &str) -> Result<()> {
        (self.validate_uri)(&client.domain, redirect_uri)
    }

    /// Access token lifetime for `grant_type`, unless the request overrides it.
    pub fn get_access_token_expiry(
        &self,
        grant_type: GrantType,
        tgr: &TokenGenerateRequest,
    ) -> Duration {
        tgr.access_token_exp
            .unwrap_or_else(|| self.config.grant(grant_type).access_token_exp)
    }

    /// Issue and persist an authorization code.
    pub async fn generate_authorization_code(&self, req: &AuthorizeRequest) -> Result<TokenInfo> {
        let client = self.get_client(&req.client_id).await?;
        if !req.redirect_uri.is_empty() {
            self.check_redirect_uri(&client, &req.redirect_uri)?;
        }

        let now = Utc::now();
        let mut info = TokenInfo {
            client_id: req.client_id.clone(),
            user_id: req.user_id.clone(),
            redirect_uri: req.redirect_uri.clone(),
            scope: req.scope.clone(),
            code_created_at: now,
            code_expires_in: self.config.code_exp,
            code_challenge: req.code_challenge.clone(),
            code_challenge_method: req
                .code_challenge_method
                .filter(|_| !req.code_challenge.is_empty()),
            ..TokenInfo::default()
        };

        let tgr = req.to_generate_request();
        let code = self
            .generator
            .generate_code(&GenerateBasic {
                client: &client,
                user_id: &req.user_id,
                created_at: now,
                token_info: &info,
                request: &tgr,
            })
            .map_err(generator_failure)?;
        info.code = Some(code);

        self.tokens.create(&info).await?;
        info!(
            client_id = %req.client_id,
            pkce = !req.code_challenge.is_empty(),
            "issued authorization code"
        );
        Ok(info)
    }

    /// Issue and persist an access token for `grant_type`.
    ///
    /// The refresh grant is delegated to [`Manager::refresh_access_token`].
    pub async fn generate_access_token(
        &self,
        grant_type: GrantType,
        tgr: &TokenGenerateRequest,
    ) -> Result<TokenInfo> {
        if grant_type == GrantType::Refreshing {
            return self.refresh_access_token(tgr).await;
        }

        // Implicit tokens are issued from the authorization endpoint, where
        // no client secret is presented
        let client = if grant_type == GrantType::Implicit {
            self.get_client(&tgr.client_id).await?
        } else {
            self.authenticate_client(tgr).await?
        };

        let (user_id, scope, redirect_uri) = match grant_type {
            GrantType::AuthorizationCode => {
                let code_info = self.take_authorization_code(tgr).await?;
                (code_info.user_id, code_info.scope, code_info.redirect_uri)
            }
            GrantType::Implicit => {
                if !tgr.redirect_uri.is_empty() {
                    self.check_redirect_uri(&client, &tgr.redirect_uri)?;
                }
                (tgr.user_id.clone(), tgr.scope.clone(), tgr.redirect_uri.clone())
            }
            _ => (tgr.user_id.clone(), tgr.scope.clone(), tgr.redirect_uri.clone()),
        };

        let token_config = self.config.grant(grant_type);
        let now = Utc::now();
        let mut info = TokenInfo {
            client_id: client.id.clone(),
            user_id,
            redirect_uri,
            scope,
            access_created_at: now,
            access_expires_in: self.get_access_token_expiry(grant_type, tgr),
            ..TokenInfo::default()
        };
        if token_config.is_generate_refresh {
            info.refresh_created_at = now;
            info.refresh_expires_in = token_config.refresh_token_exp;
        }

        let generated = self
            .generator
            .generate_token(
                &GenerateBasic {
                    client: &client,
                    user_id: &info.user_id,
                    created_at: now,
                    token_info: &info,
                    request: tgr,
                },
                token_config.is_generate_refresh,
            )
            .map_err(generator_failure)?;
        info.access = Some(generated.access);
        info.refresh = generated.refresh;

        self.tokens.create(&info).await?;
        info!(
            client_id = %info.client_id,
            grant_type = %grant_type,
            refresh = info.refresh().is_some(),
            "issued access token"
        );
        Ok(info)
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The new record is persisted before the previous access and refresh
    /// keys are removed, so a failure part way leaves the old grant usable.
    pub async fn refresh_access_token(&self, tgr: &TokenGenerateRequest) -> Result<TokenInfo> {
        let client = self.authenticate_client(tgr).await?;

        let old = self.load_refresh_token(&tgr.refresh).await?;
        if old.client_id != tgr.client_id {
            debug!(client_id = %tgr.client_id, "refresh token issued to another client");
            return Err(Error::InvalidRefreshToken);
        }

        let scope = if tgr.scope.is_empty() {
            old.scope.clone()
        } else if is_scope_subset(&tgr.scope, &old.scope) {
            tgr.scope.clone()
        } else {
            debug!(client_id = %tgr.client_id, "refresh requested a wider scope");
            return Err(ErrorKind::InvalidScope.into());
        };

        let refresh_config = self.config.refresh;
        let now = Utc::now();
        let access_expires_in = tgr.access_token_exp.unwrap_or_else(|| {
            non_zero_or(refresh_config.access_token_exp, old.access_expires_in)
        });
        let refresh_expires_in =
            non_zero_or(refresh_config.refresh_token_exp, old.refresh_expires_in);
        let restart_refresh =
            refresh_config.is_generate_refresh || refresh_config.is_reset_refresh_time;

        let mut info = TokenInfo {
            client_id: old.client_id.clone(),
            user_id: old.user_id.clone(),
            redirect_uri: old.redirect_uri.clone(),
            scope,
            access_created_at: now,
            access_expires_in,
            refresh_created_at: if restart_refresh { now } else { old.refresh_created_at },
            refresh_expires_in,
            extension: old.extension.clone(),
            ..TokenInfo::default()
        };

        let generated = self
            .generator
            .generate_token(
                &GenerateBasic {
                    client: &client,
                    user_id: &info.user_id,
                    created_at: now,
                    token_info: &info,
                    request: tgr,
                },
                refresh_config.is_generate_refresh,
            )
            .map_err(generator_failure)?;
        info.access = Some(generated.access);
        info.refresh = match generated.refresh {
            Some(refresh) if refresh_config.is_generate_refresh => Some(refresh),
            _ => old.refresh.clone(),
        };

        self.tokens.create(&info).await?;

        if refresh_config.is_remove_access
            && let Some(access) = old.access()
        {
            self.tokens.remove_by_access(access).await?;
        }
        let rotated = info.refresh() != old.refresh();
        if rotated
            && refresh_config.is_remove_refresh
            && let Some(refresh) = old.refresh()
        {
            self.tokens.remove_by_refresh(refresh).await?;
        }

        info!(client_id = %info.client_id, rotated, "refreshed access token");
        Ok(info)
    }

    /// Resolve a live access token.
    pub async fn load_access_token(&self, access: &str) -> Result<TokenInfo> {
        if access.is_empty() {
            return Err(Error::InvalidAccessToken);
        }
        let info = self
            .tokens
            .get_by_access(access)
            .await?
            .ok_or(Error::InvalidAccessToken)?;

        let now = Utc::now();
        if info.is_access_expired(now) {
            return Err(Error::ExpiredAccessToken);
        }
        if info.refresh().is_some() && info.is_refresh_expired(now) {
            return Err(Error::ExpiredRefreshToken);
        }
        Ok(info)
    }

    /// Resolve a live refresh token.
    pub async fn load_refresh_token(&self, refresh: &str) -> Result<TokenInfo> {
        if refresh.is_empty() {
            return Err(Error::InvalidRefreshToken);
        }
        let info = self
            .tokens
            .get_by_refresh(refresh)
            .await?
            .ok_or(Error::InvalidRefreshToken)?;
        if info.is_refresh_expired(Utc::now()) {
            return Err(Error::ExpiredRefreshToken);
        }
        Ok(info)
    }

    pub async fn remove_access_token(&self, access: &str) -> Result<()> {
        if access.is_empty() {
            return Err(Error::InvalidAccessToken);
        }
        self.tokens.remove_by_access(access).await
    }

    pub async fn remove_refresh_token(&self, refresh: &str) -> Result<()> {
        if refresh.is_empty() {
            return Err(Error::InvalidRefreshToken);
        }
        self.tokens.remove_by_refresh(refresh).await
    }

    /// Resolve the client and check its secret. Public clients pass
    /// without one.
    pub async fn authenticate_client(&self, tgr: &TokenGenerateRequest) -> Result<Client> {
        let client = self.get_client(&tgr.client_id).await?;
        if !client.verify_secret(tgr.secret()) {
            warn!(client_id = %tgr.client_id, "client secret mismatch");
            return Err(ErrorKind::InvalidClient.into());
        }
        Ok(client)
    }

    /// Load, check and consume an authorization code.
    ///
    /// The code is removed before PKCE is checked, so a failed verifier
    /// still burns it. Only the caller whose removal wins may use the code.
    async fn take_authorization_code(&self, tgr: &TokenGenerateRequest) -> Result<TokenInfo> {
        if tgr.code.is_empty() {
            return Err(Error::InvalidAuthorizeCode);
        }
        let info = self
            .tokens
            .get_by_code(&tgr.code)
            .await?
            .ok_or(Error::InvalidAuthorizeCode)?;

        if info.client_id != tgr.client_id || info.is_code_expired(Utc::now()) {
            return Err(Error::InvalidAuthorizeCode);
        }
        if info.redirect_uri != tgr.redirect_uri {
            debug!(client_id = %tgr.client_id, "redirect uri differs from authorization request");
            return Err(Error::InvalidAuthorizeCode);
        }

        if !self.tokens.remove_by_code(&tgr.code).await? {
            debug!(client_id = %tgr.client_id, "authorization code already consumed");
            return Err(Error::InvalidAuthorizeCode);
        }
        verify_code_challenge(&info, &tgr.code_verifier)?;
        Ok(info)
    }
}

fn verify_code_challenge(info: &TokenInfo, verifier: &str) -> Result<()> {
    match (info.code_challenge.is_empty(), verifier.is_empty()) {
        (true, true) => Ok(()),
        (false, false) => {
            let method = info.code_challenge_method.unwrap_or_default();
            if pkce::validate_method(method, &info.code_challenge, verifier) {
                Ok(())
            } else {
                Err(Error::InvalidCodeChallenge)
            }
        }
        _ => Err(Error::MissingCodeVerifier),
    }
}

fn non_zero_or(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() { fallback } else { value }
}

fn generator_failure(err: Error) -> Error {
    if err.is_internal() {
        err
    } else {
        Error::Generate(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefreshConfig;
    use oauth2_core::{BoxFuture, CodeChallengeMethod, ResponseType};
    use oauth2_store::{ClientRegistry, KvBackend, KvTokenStore, MemoryKv, WriteBatch};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    const CLIENT_ID: &str = "111111";
    const CLIENT_SECRET: &str = "11111111";
    const DOMAIN: &str = "http://localhost:9094";
    const REDIRECT: &str = "http://localhost:9094/oauth2";

    fn manager() -> Manager {
        manager_over(Arc::new(KvTokenStore::new(Arc::new(MemoryKv::new()))))
    }

    fn manager_over(tokens: Arc<dyn TokenStore>) -> Manager {
        let registry = ClientRegistry::new();
        registry.insert(Client::new(CLIENT_ID, CLIENT_SECRET, DOMAIN));
        let mut public = Client::new("public", "", DOMAIN);
        public.secret = None;
        public.public = true;
        registry.insert(public);
        Manager::new(Arc::new(registry), tokens)
    }

    fn authorize_request() -> AuthorizeRequest {
        let mut req = AuthorizeRequest::new(ResponseType::Code, CLIENT_ID);
        req.redirect_uri = REDIRECT.into();
        req.user_id = "000000".into();
        req.scope = "read write".into();
        req
    }

    fn exchange(code: &str) -> TokenGenerateRequest {
        let mut tgr = TokenGenerateRequest::new(CLIENT_ID).with_secret(CLIENT_SECRET);
        tgr.code = code.into();
        tgr.redirect_uri = REDIRECT.into();
        tgr
    }

    async fn issue_code(manager: &Manager) -> String {
        let info = manager
            .generate_authorization_code(&authorize_request())
            .await
            .unwrap();
        info.code.unwrap()
    }

    async fn password_token(manager: &Manager, scope: &str) -> TokenInfo {
        let mut tgr = TokenGenerateRequest::new(CLIENT_ID).with_secret(CLIENT_SECRET);
        tgr.user_id = "000000".into();
        tgr.scope = scope.into();
        manager
            .generate_access_token(GrantType::PasswordCredentials, &tgr)
            .await
            .unwrap()
    }

    fn refresh_request(refresh: &str, scope: &str) -> TokenGenerateRequest {
        let mut tgr = TokenGenerateRequest::new(CLIENT_ID).with_secret(CLIENT_SECRET);
        tgr.refresh = refresh.into();
        tgr.scope = scope.into();
        tgr
    }

    #[tokio::test]
    async fn code_is_accepted_exactly_once() {
        let manager = manager();
        let code = issue_code(&manager).await;

        let info = manager
            .generate_access_token(GrantType::AuthorizationCode, &exchange(&code))
            .await
            .unwrap();
        assert_eq!(info.user_id, "000000");
        assert_eq!(info.scope, "read write");
        assert!(info.access().is_some());
        assert!(info.refresh().is_some(), "authorization code grant issues refresh");
        assert_eq!(info.access_expires_in, Duration::from_secs(2 * 3600));

        let replay = manager
            .generate_access_token(GrantType::AuthorizationCode, &exchange(&code))
            .await;
        assert_eq!(replay.unwrap_err(), Error::InvalidAuthorizeCode);
    }

    #[tokio::test]
    async fn exchange_requires_matching_redirect_uri() {
        let manager = manager();
        let code = issue_code(&manager).await;
        let mut tgr = exchange(&code);
        tgr.redirect_uri = "http://localhost:9094/other".into();

        let err = manager
            .generate_access_token(GrantType::AuthorizationCode, &tgr)
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidAuthorizeCode);
        assert_eq!(err.kind(), Some(ErrorKind::InvalidGrant));
    }

    #[tokio::test]
    async fn exchange_by_another_client_is_refused() {
        let manager = manager();
        let code = issue_code(&manager).await;
        let mut tgr = exchange(&code);
        tgr.client_id = "public".into();

        let err = manager
            .generate_access_token(GrantType::AuthorizationCode, &tgr)
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidAuthorizeCode);
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid_client() {
        let manager = manager();
        let code = issue_code(&manager).await;
        let mut tgr = exchange(&code);
        tgr.client_secret = Some("bad".into());

        let err = manager
            .generate_access_token(GrantType::AuthorizationCode, &tgr)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidClient));
    }

    #[tokio::test]
    async fn pkce_s256_round_trip() {
        let manager = manager();
        let verifier = pkce::generate_verifier();
        let mut req = authorize_request();
        req.code_challenge = pkce::compute_challenge(&verifier);
        req.code_challenge_method = Some(CodeChallengeMethod::S256);
        let code = manager.generate_authorization_code(&req).await.unwrap().code.unwrap();

        let mut tgr = exchange(&code);
        tgr.code_verifier = verifier;
        assert!(
            manager
                .generate_access_token(GrantType::AuthorizationCode, &tgr)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn missing_verifier_fails_and_burns_code() {
        let manager = manager();
        let verifier = pkce::generate_verifier();
        let mut req = authorize_request();
        req.code_challenge = pkce::compute_challenge(&verifier);
        req.code_challenge_method = Some(CodeChallengeMethod::S256);
        let code = manager.generate_authorization_code(&req).await.unwrap().code.unwrap();

        let err = manager
            .generate_access_token(GrantType::AuthorizationCode, &exchange(&code))
            .await
            .unwrap_err();
        assert_eq!(err, Error::MissingCodeVerifier);
        assert_eq!(err.kind(), Some(ErrorKind::InvalidGrant));

        let mut retry = exchange(&code);
        retry.code_verifier = verifier;
        let err = manager
            .generate_access_token(GrantType::AuthorizationCode, &retry)
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidAuthorizeCode);
    }

    #[tokio::test]
    async fn plain_challenge_mismatch_is_rejected() {
        let manager = manager();
        let mut req = authorize_request();
        req.code_challenge = "a".repeat(43);
        req.code_challenge_method = Some(CodeChallengeMethod::Plain);
        let code = manager.generate_authorization_code(&req).await.unwrap().code.unwrap();

        let mut tgr = exchange(&code);
        tgr.code_verifier = "b".repeat(43);
        let err = manager
            .generate_access_token(GrantType::AuthorizationCode, &tgr)
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidCodeChallenge);
    }

    #[tokio::test]
    async fn code_for_foreign_redirect_is_refused() {
        let manager = manager();
        let mut req = authorize_request();
        req.redirect_uri = "http://evil.example/cb".into();
        let err = manager.generate_authorization_code(&req).await.unwrap_err();
        assert_eq!(err, Error::InvalidRedirectUri);
    }

    #[tokio::test]
    async fn client_credentials_has_no_refresh() {
        let manager = manager();
        let mut tgr = TokenGenerateRequest::new(CLIENT_ID).with_secret(CLIENT_SECRET);
        tgr.scope = "read".into();
        let info = manager
            .generate_access_token(GrantType::ClientCredentials, &tgr)
            .await
            .unwrap();
        assert!(info.refresh().is_none());
        assert_eq!(info.user_id, "");
    }

    #[tokio::test]
    async fn implicit_grant_skips_secret_and_refresh() {
        let manager = manager();
        let mut req = authorize_request();
        req.response_type = ResponseType::Token;
        let info = manager
            .generate_access_token(GrantType::Implicit, &req.to_generate_request())
            .await
            .unwrap();
        assert_eq!(info.redirect_uri, REDIRECT);
        assert!(info.refresh().is_none());
        assert_eq!(info.access_expires_in, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn public_client_needs_no_secret() {
        let manager = manager();
        let tgr = TokenGenerateRequest::new("public");
        assert!(
            manager
                .generate_access_token(GrantType::ClientCredentials, &tgr)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn expiry_override_wins() {
        let manager = manager();
        let mut tgr = TokenGenerateRequest::new(CLIENT_ID);
        assert_eq!(
            manager.get_access_token_expiry(GrantType::Implicit, &tgr),
            Duration::from_secs(3600)
        );
        tgr.access_token_exp = Some(Duration::from_secs(30));
        assert_eq!(
            manager.get_access_token_expiry(GrantType::Implicit, &tgr),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn refresh_rotates_and_revokes_previous_tokens() {
        let manager = manager();
        let first = password_token(&manager, "read write").await;
        let old_access = first.access().unwrap().to_owned();
        let old_refresh = first.refresh().unwrap().to_owned();

        let next = manager
            .refresh_access_token(&refresh_request(&old_refresh, ""))
            .await
            .unwrap();
        assert_ne!(next.access(), Some(old_access.as_str()));
        assert_ne!(next.refresh(), Some(old_refresh.as_str()));
        assert_eq!(next.scope, "read write");

        assert_eq!(
            manager.load_access_token(&old_access).await.unwrap_err(),
            Error::InvalidAccessToken
        );
        assert_eq!(
            manager.load_refresh_token(&old_refresh).await.unwrap_err(),
            Error::InvalidRefreshToken
        );
        assert!(manager.load_access_token(next.access().unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn refresh_scope_can_narrow_but_not_widen() {
        let manager = manager();
        let first = password_token(&manager, "read write").await;

        let wider = manager
            .refresh_access_token(&refresh_request(first.refresh().unwrap(), "read admin"))
            .await
            .unwrap_err();
        assert_eq!(wider.kind(), Some(ErrorKind::InvalidScope));

        let narrower = manager
            .refresh_access_token(&refresh_request(first.refresh().unwrap(), "read"))
            .await
            .unwrap();
        assert_eq!(narrower.scope, "read");
        let stored = manager
            .load_access_token(narrower.access().unwrap())
            .await
            .unwrap();
        assert_eq!(stored.scope, "read");
    }

    #[tokio::test]
    async fn refresh_without_rotation_reuses_refresh_token() {
        let manager = manager().with_config(ManagerConfig {
            refresh: RefreshConfig {
                is_generate_refresh: false,
                ..RefreshConfig::default()
            },
            ..ManagerConfig::default()
        });
        let first = password_token(&manager, "read").await;
        let refresh = first.refresh().unwrap().to_owned();

        let next = manager
            .refresh_access_token(&refresh_request(&refresh, ""))
            .await
            .unwrap();
        assert_eq!(next.refresh(), Some(refresh.as_str()));
        assert_eq!(next.refresh_created_at, first.refresh_created_at);

        let via_refresh = manager.load_refresh_token(&refresh).await.unwrap();
        assert_eq!(via_refresh.access(), next.access());
        assert!(manager.load_access_token(first.access().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn refresh_by_another_client_is_refused() {
        let manager = manager();
        let first = password_token(&manager, "read").await;
        let mut tgr = refresh_request(first.refresh().unwrap(), "");
        tgr.client_id = "public".into();
        tgr.client_secret = None;

        assert_eq!(
            manager.refresh_access_token(&tgr).await.unwrap_err(),
            Error::InvalidRefreshToken
        );
    }

    #[tokio::test]
    async fn removing_access_keeps_refresh_resolvable() {
        let manager = manager();
        let info = password_token(&manager, "read").await;

        manager.remove_access_token(info.access().unwrap()).await.unwrap();
        assert!(manager.load_access_token(info.access().unwrap()).await.is_err());
        assert!(manager.load_refresh_token(info.refresh().unwrap()).await.is_ok());

        manager.remove_refresh_token(info.refresh().unwrap()).await.unwrap();
        assert!(manager.load_refresh_token(info.refresh().unwrap()).await.is_err());
    }

    /// Token store that ignores TTLs, so expiry is left to the manager.
    #[derive(Default)]
    struct UnexpiringStore {
        by_access: Mutex<HashMap<String, TokenInfo>>,
    }

    impl TokenStore for UnexpiringStore {
        fn create<'a>(&'a self, info: &'a TokenInfo) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                if let Some(access) = info.access() {
                    self.by_access
                        .lock()
                        .unwrap()
                        .insert(access.to_owned(), info.clone());
                }
                Ok(())
            })
        }

        fn remove_by_code<'a>(&'a self, _code: &'a str) -> BoxFuture<'a, Result<bool>> {
            Box::pin(async { Ok(false) })
        }

        fn remove_by_access<'a>(&'a self, access: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.by_access.lock().unwrap().remove(access);
                Ok(())
            })
        }

        fn remove_by_refresh<'a>(&'a self, _refresh: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn get_by_code<'a>(&'a self, _code: &'a str) -> BoxFuture<'a, Result<Option<TokenInfo>>> {
            Box::pin(async { Ok(None) })
        }

        fn get_by_access<'a>(
            &'a self,
            access: &'a str,
        ) -> BoxFuture<'a, Result<Option<TokenInfo>>> {
            Box::pin(async move { Ok(self.by_access.lock().unwrap().get(access).cloned()) })
        }

        fn get_by_refresh<'a>(
            &'a self,
            _refresh: &'a str,
        ) -> BoxFuture<'a, Result<Option<TokenInfo>>> {
            Box::pin(async { Ok(None) })
        }
    }

    #[tokio::test]
    async fn expired_access_token_is_rejected_on_load() {
        let store = Arc::new(UnexpiringStore::default());
        let manager = Manager::new(Arc::new(ClientRegistry::new()), store.clone());
        let past = Utc::now() - chrono::TimeDelta::hours(3);
        store
            .create(&TokenInfo {
                client_id: CLIENT_ID.into(),
                access: Some("stale".into()),
                access_created_at: past,
                access_expires_in: Duration::from_secs(3600),
                ..TokenInfo::default()
            })
            .await
            .unwrap();

        let err = manager.load_access_token("stale").await.unwrap_err();
        assert_eq!(err, Error::ExpiredAccessToken);
        assert_eq!(err.kind(), Some(ErrorKind::InvalidToken));
        assert_eq!(
            manager.load_access_token("").await.unwrap_err(),
            Error::InvalidAccessToken
        );
    }

    #[tokio::test]
    async fn generator_failures_are_internal() {
        struct Broken;
        impl TokenGenerator for Broken {
            fn generate_code(&self, _basic: &GenerateBasic<'_>) -> Result<String> {
                Err(Error::Generate("no entropy".into()))
            }
            fn generate_token(
                &self,
                _basic: &GenerateBasic<'_>,
                _with_refresh: bool,
            ) -> Result<oauth2_core::GeneratedToken> {
                Err(ErrorKind::ServerError.into())
            }
        }

        let manager = manager().with_generator(Arc::new(Broken));
        let err = manager
            .generate_authorization_code(&authorize_request())
            .await
            .unwrap_err();
        assert!(err.is_internal());

        let tgr = TokenGenerateRequest::new(CLIENT_ID).with_secret(CLIENT_SECRET);
        let err = manager
            .generate_access_token(GrantType::ClientCredentials, &tgr)
            .await
            .unwrap_err();
        assert!(err.is_internal());
    }

    /// Backend that yields before every read and delete, so concurrent
    /// callers interleave between their lookups and their writes.
    struct YieldingKv(MemoryKv);

    impl KvBackend for YieldingKv {
        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, oauth2_store::Result<Option<String>>> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                self.0.get(key).await
            })
        }

        fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, oauth2_store::Result<bool>> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                self.0.delete(key).await
            })
        }

        fn commit(&self, batch: WriteBatch) -> BoxFuture<'_, oauth2_store::Result<()>> {
            self.0.commit(batch)
        }
    }

    #[tokio::test]
    async fn concurrent_exchanges_of_one_code_issue_one_token() {
        let kv = Arc::new(YieldingKv(MemoryKv::new()));
        let manager = manager_over(Arc::new(KvTokenStore::new(kv)));
        let code = issue_code(&manager).await;
        let tgr = exchange(&code);

        let (first, second) = tokio::join!(
            manager.generate_access_token(GrantType::AuthorizationCode, &tgr),
            manager.generate_access_token(GrantType::AuthorizationCode, &tgr),
        );
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| r.as_ref().err() == Some(&Error::InvalidAuthorizeCode))
        );
    }

    /// Real store that logs every mutation in the order it happened.
    struct RecordingStore {
        inner: KvTokenStore,
        log: Mutex<Vec<String>>,
        fail_create: AtomicBool,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: KvTokenStore::new(Arc::new(MemoryKv::new())),
                log: Mutex::new(Vec::new()),
                fail_create: AtomicBool::new(false),
            }
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn position(&self, entry: &str) -> usize {
            let log = self.log.lock().unwrap();
            log.iter()
                .position(|e| e == entry)
                .unwrap_or_else(|| panic!("{entry} missing from {log:?}"))
        }
    }

    impl TokenStore for RecordingStore {
        fn create<'a>(&'a self, info: &'a TokenInfo) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                if self.fail_create.load(Ordering::SeqCst) {
                    return Err(Error::Internal("store unavailable".into()));
                }
                self.inner.create(info).await?;
                self.record(format!("create {}", info.access().unwrap_or_default()));
                Ok(())
            })
        }

        fn remove_by_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<bool>> {
            self.inner.remove_by_code(code)
        }

        fn remove_by_access<'a>(&'a self, access: &'a str) -> BoxFuture<'a, Result<()>> {
            self.record(format!("remove_access {access}"));
            self.inner.remove_by_access(access)
        }

        fn remove_by_refresh<'a>(&'a self, refresh: &'a str) -> BoxFuture<'a, Result<()>> {
            self.record(format!("remove_refresh {refresh}"));
            self.inner.remove_by_refresh(refresh)
        }

        fn get_by_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<Option<TokenInfo>>> {
            self.inner.get_by_code(code)
        }

        fn get_by_access<'a>(
            &'a self,
            access: &'a str,
        ) -> BoxFuture<'a, Result<Option<TokenInfo>>> {
            self.inner.get_by_access(access)
        }

        fn get_by_refresh<'a>(
            &'a self,
            refresh: &'a str,
        ) -> BoxFuture<'a, Result<Option<TokenInfo>>> {
            self.inner.get_by_refresh(refresh)
        }
    }

    #[tokio::test]
    async fn refresh_persists_new_record_before_removing_old_keys() {
        let store = Arc::new(RecordingStore::new());
        let manager = manager_over(store.clone());
        let first = password_token(&manager, "read").await;
        let old_access = first.access().unwrap().to_owned();
        let old_refresh = first.refresh().unwrap().to_owned();

        let next = manager
            .refresh_access_token(&refresh_request(&old_refresh, ""))
            .await
            .unwrap();

        let created = store.position(&format!("create {}", next.access().unwrap()));
        assert!(created < store.position(&format!("remove_access {old_access}")));
        assert!(created < store.position(&format!("remove_refresh {old_refresh}")));
    }

    #[tokio::test]
    async fn failed_refresh_write_keeps_old_grant_usable() {
        let store = Arc::new(RecordingStore::new());
        let manager = manager_over(store.clone());
        let first = password_token(&manager, "read").await;
        let old_refresh = first.refresh().unwrap().to_owned();

        store.fail_create.store(true, Ordering::SeqCst);
        let err = manager
            .refresh_access_token(&refresh_request(&old_refresh, ""))
            .await
            .unwrap_err();
        assert!(err.is_internal());

        assert!(manager.load_refresh_token(&old_refresh).await.is_ok());
        assert!(manager.load_access_token(first.access().unwrap()).await.is_ok());
        assert!(
            !store
                .log
                .lock()
                .unwrap()
                .iter()
                .any(|e| e.starts_with("remove_")),
            "nothing is removed when the new record was not written"
        );
    }
}
