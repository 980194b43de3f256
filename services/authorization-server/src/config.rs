//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (client secrets, user passwords, the admin token) may be given
//! inline or through a `*_file` path; the admin token can also come from
//! the ADMIN_TOKEN env var, which wins over `admin.token_file`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use common::Secret;
use oauth2_core::Client;
use oauth2_manage::ManagerConfig;
use oauth2_server::ServerConfig;
use serde::Deserialize;
use tracing::debug;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ListenConfig,
    #[serde(default)]
    pub oauth2: ServerConfig,
    #[serde(default)]
    pub tokens: ManagerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// Public listener settings
#[derive(Debug, Deserialize)]
pub struct ListenConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Header carrying the logged-in user, set by the fronting login proxy.
    ///
    /// The value is trusted as-is. The proxy must strip this header from
    /// client requests, otherwise any caller can act as any user.
    #[serde(default = "default_user_header")]
    pub user_header: String,
    /// Where unauthenticated authorization requests are sent.
    #[serde(default)]
    pub login_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Persisted client registry; clients are memory-only when unset.
    pub clients_path: Option<PathBuf>,
    pub namespace: String,
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            clients_path: None,
            namespace: "oauth2:".into(),
            sweep_interval_secs: 60,
        }
    }
}

/// Client-management listener. Disabled when `listen_addr` is unset.
#[derive(Debug, Default, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub listen_addr: Option<SocketAddr>,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

/// A client declared in the config file
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    #[serde(default)]
    pub secret: Option<Secret<String>>,
    #[serde(default)]
    pub secret_file: Option<PathBuf>,
    pub domain: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ClientConfig {
    pub fn to_client(&self) -> Client {
        Client {
            id: self.id.clone(),
            secret: self.secret.clone(),
            domain: self.domain.clone(),
            public: self.public,
            scopes: self.scopes.clone(),
        }
    }
}

/// A resource owner accepted by the password grant
#[derive(Debug, Deserialize)]
pub struct UserConfig {
    pub username: String,
    #[serde(default)]
    pub password: Option<Secret<String>>,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    /// Subject recorded on issued tokens; defaults to the username.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl UserConfig {
    pub fn subject(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.username)
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_user_header() -> String {
    "x-authenticated-user".into()
}

impl Config {
    /// Load configuration from a TOML file, resolve file-backed secrets and
    /// validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| common::Error::read(path, e))?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if http::HeaderName::try_from(config.server.user_header.as_str()).is_err() {
            return Err(common::Error::Config(format!(
                "user_header is not a valid header name: {}",
                config.server.user_header
            )));
        }
        if let Some(login_url) = &config.server.login_url {
            check_http_url("login_url", login_url)?;
        }
        if config.store.sweep_interval_secs == 0 {
            return Err(common::Error::Config(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for client in &mut config.clients {
            if client.id.trim().is_empty() {
                return Err(common::Error::Config("client id must not be empty".into()));
            }
            if !seen.insert(client.id.clone()) {
                return Err(common::Error::Config(format!(
                    "duplicate client id: {}",
                    client.id
                )));
            }
            check_http_url(&format!("client {} domain", client.id), &client.domain)?;
            if client.secret.is_none()
                && let Some(file) = &client.secret_file
            {
                client.secret = read_secret_file("secret_file", file)?;
            }
        }

        for user in &mut config.users {
            if user.username.is_empty() {
                return Err(common::Error::Config("username must not be empty".into()));
            }
            if user.password.is_none()
                && let Some(file) = &user.password_file
            {
                user.password = read_secret_file("password_file", file)?;
            }
            if user.password.as_ref().is_none_or(Secret::is_empty) {
                return Err(common::Error::Config(format!(
                    "user {} has no password",
                    user.username
                )));
            }
        }

        // Admin token: env var takes precedence over file
        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            config.admin.token = Some(Secret::new(token));
        } else if let Some(file) = &config.admin.token_file {
            config.admin.token = read_secret_file("admin token_file", file)?;
        }
        if config.admin.listen_addr.is_some()
            && config.admin.token.as_ref().is_none_or(Secret::is_empty)
        {
            return Err(common::Error::Config(
                "admin.listen_addr requires ADMIN_TOKEN or admin.token_file".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("authorization-server.toml")
    }
}

fn check_http_url(what: &str, value: &str) -> common::Result<()> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => Err(common::Error::Config(format!(
            "{what} must be an http:// or https:// URL, got: {value}"
        ))),
    }
}

/// Read a trimmed secret. Whitespace-only files yield `None`.
fn read_secret_file(what: &str, path: &Path) -> common::Result<Option<Secret<String>>> {
    let value = std::fs::read_to_string(path).map_err(|e| common::Error::read(path, e))?;
    debug!(field = what, path = %path.display(), "read secret file");
    let value = value.trim();
    Ok((!value.is_empty()).then(|| Secret::new(value.to_owned())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("authorization-server.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    const MINIMAL: &str = r#"
[server]
listen_addr = "127.0.0.1:9096"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ADMIN_TOKEN") };
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load(&write_config(dir.path(), MINIMAL)).unwrap();
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.user_header, "x-authenticated-user");
        assert_eq!(config.store.namespace, "oauth2:");
        assert_eq!(config.store.sweep_interval_secs, 60);
        assert!(config.store.clients_path.is_none());
        assert!(config.admin.listen_addr.is_none());
        assert!(config.clients.is_empty());
        assert_eq!(config.oauth2, ServerConfig::default());
        assert_eq!(config.tokens, ManagerConfig::default());
    }

    #[test]
    fn full_config_parses_engine_sections() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ADMIN_TOKEN") };
        let dir = tempfile::tempdir().unwrap();
        let contents = r#"
[server]
listen_addr = "0.0.0.0:9096"
max_connections = 64
login_url = "https://login.example.com/start"

[oauth2]
force_pkce = true
allowed_grant_types = ["authorization_code", "refresh_token"]

[tokens]
code_exp_secs = 120

[tokens.password]
access_token_exp_secs = 60

[[clients]]
id = "111111"
secret = "11111111"
domain = "http://localhost:9094"
scopes = ["read", "write"]

[[users]]
username = "alice"
password = "wonderland"
user_id = "000000"
"#;
        let config = Config::load(&write_config(dir.path(), contents)).unwrap();
        assert_eq!(config.server.max_connections, 64);
        assert!(config.oauth2.force_pkce);
        assert_eq!(config.oauth2.allowed_grant_types.len(), 2);
        assert_eq!(config.tokens.code_exp, Duration::from_secs(120));
        assert_eq!(config.tokens.password.access_token_exp, Duration::from_secs(60));

        let client = config.clients[0].to_client();
        assert!(client.verify_secret("11111111"));
        assert!(client.allows_scope("read"));
        assert_eq!(config.users[0].subject(), "000000");
    }

    #[test]
    fn secrets_load_from_files() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ADMIN_TOKEN") };
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("client_secret");
        std::fs::write(&secret, "from-file\n").unwrap();
        let password = dir.path().join("password");
        std::fs::write(&password, "hunter2").unwrap();
        let token = dir.path().join("admin_token");
        std::fs::write(&token, "admin-from-file").unwrap();

        let contents = format!(
            r#"
[server]
listen_addr = "127.0.0.1:9096"

[admin]
listen_addr = "127.0.0.1:9097"
token_file = "{}"

[[clients]]
id = "c1"
secret_file = "{}"
domain = "https://app.example.com"

[[users]]
username = "bob"
password_file = "{}"
"#,
            token.display(),
            secret.display(),
            password.display()
        );
        let config = Config::load(&write_config(dir.path(), &contents)).unwrap();
        assert_eq!(
            config.clients[0].secret.as_ref().unwrap().expose(),
            "from-file"
        );
        assert_eq!(config.users[0].password.as_ref().unwrap().expose(), "hunter2");
        assert_eq!(config.users[0].subject(), "bob");
        assert_eq!(
            config.admin.token.as_ref().unwrap().expose(),
            "admin-from-file"
        );
    }

    #[test]
    fn admin_token_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = r#"
[server]
listen_addr = "127.0.0.1:9096"

[admin]
listen_addr = "127.0.0.1:9097"
token_file = "/nonexistent/admin_token"
"#;
        unsafe { set_env("ADMIN_TOKEN", "admin-from-env") };
        let result = Config::load(&write_config(dir.path(), contents));
        unsafe { remove_env("ADMIN_TOKEN") };

        let config = result.unwrap();
        assert_eq!(
            config.admin.token.as_ref().unwrap().expose(),
            "admin-from-env"
        );
    }

    #[test]
    fn admin_listener_requires_token() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ADMIN_TOKEN") };
        let dir = tempfile::tempdir().unwrap();
        let contents = r#"
[server]
listen_addr = "127.0.0.1:9096"

[admin]
listen_addr = "127.0.0.1:9097"
"#;
        let err = Config::load(&write_config(dir.path(), contents)).unwrap_err();
        assert!(err.to_string().contains("ADMIN_TOKEN"), "got: {err}");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ADMIN_TOKEN") };
        let dir = tempfile::tempdir().unwrap();

        let cases = [
            (
                "[server]\nlisten_addr = \"127.0.0.1:9096\"\nmax_connections = 0\n",
                "max_connections",
            ),
            (
                "[server]\nlisten_addr = \"127.0.0.1:9096\"\nuser_header = \"bad header\"\n",
                "user_header",
            ),
            (
                "[server]\nlisten_addr = \"127.0.0.1:9096\"\n[[clients]]\nid = \"\"\ndomain = \"http://localhost\"\n",
                "client id",
            ),
            (
                "[server]\nlisten_addr = \"127.0.0.1:9096\"\n[[clients]]\nid = \"c\"\ndomain = \"localhost:9094\"\n",
                "domain",
            ),
            (
                "[server]\nlisten_addr = \"127.0.0.1:9096\"\n[[clients]]\nid = \"c\"\ndomain = \"http://a\"\n[[clients]]\nid = \"c\"\ndomain = \"http://b\"\n",
                "duplicate",
            ),
            (
                "[server]\nlisten_addr = \"127.0.0.1:9096\"\n[[users]]\nusername = \"eve\"\n",
                "no password",
            ),
        ];
        for (contents, expected) in cases {
            let err = Config::load(&write_config(dir.path(), contents)).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "expected {expected:?} in error, got: {err}"
            );
        }
    }

    #[test]
    fn unparseable_listen_addr_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let contents = "[server]\nlisten_addr = \"not-an-address\"\n";
        assert!(Config::load(&write_config(dir.path(), contents)).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Path::new("/nonexistent/authorization-server.toml")).is_err());
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("authorization-server.toml")
        );

        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
