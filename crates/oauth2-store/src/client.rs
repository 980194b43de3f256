//! Client registry
//!
//! An in-memory map of registered clients, optionally backed by a JSON file.
//! Lookups take a short read lock on a `std::sync::RwLock` and never await.
//! Administrative writes are serialised by a tokio Mutex and, when a file is
//! attached, persisted with an atomic temp-file + rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use common::Secret;
use oauth2_core::{BoxFuture, Client, ClientStore};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// On-disk form of a client. The secret is only ever written here.
#[derive(Debug, Serialize, Deserialize)]
struct ClientRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    domain: String,
    #[serde(default)]
    public: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    scopes: Vec<String>,
}

impl ClientRecord {
    fn from_client(client: &Client) -> Self {
        Self {
            secret: client.secret.as_ref().map(|s| s.expose().clone()),
            domain: client.domain.clone(),
            public: client.public,
            scopes: client.scopes.clone(),
        }
    }

    fn into_client(self, id: String) -> Client {
        Client {
            id,
            secret: self.secret.map(Secret::new),
            domain: self.domain,
            public: self.public,
            scopes: self.scopes,
        }
    }
}

/// Thread-safe registry of clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Client>>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl ClientRegistry {
    /// An empty, unpersisted registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load clients from `path`.
    ///
    /// A missing file is created as `{}`. Later `set`/`remove` calls rewrite
    /// the whole file.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let clients = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading client registry: {e}")))?;
            let records: HashMap<String, ClientRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::Encoding(format!("parsing client registry: {e}")))?;
            info!(path = %path.display(), clients = records.len(), "loaded client registry");
            records
                .into_iter()
                .map(|(id, record)| (id.clone(), record.into_client(id)))
                .collect()
        } else {
            info!(path = %path.display(), "client registry not found, starting empty");
            let clients = HashMap::new();
            write_atomic(&path, &clients).await?;
            clients
        };

        Ok(Self {
            clients: RwLock::new(clients),
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    /// Register a client in memory without persisting.
    ///
    /// Used for clients declared in static configuration. A later persisted
    /// write includes them.
    pub fn insert(&self, client: Client) {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        clients.insert(client.id.clone(), client);
    }

    pub fn get(&self, id: &str) -> Option<Client> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        clients.get(id).cloned()
    }

    /// All clients sorted by id.
    pub fn list(&self) -> Vec<Client> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<Client> = clients.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn len(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add or replace a client and persist.
    pub async fn set(&self, client: Client) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let id = client.id.clone();
        let snapshot = {
            let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
            clients.insert(id.clone(), client);
            clients.clone()
        };
        debug!(client_id = %id, "registered client");
        self.persist(&snapshot).await
    }

    /// Remove a client and persist. Returns the removed client if it existed.
    pub async fn remove(&self, id: &str) -> Result<Option<Client>> {
        let _guard = self.write_lock.lock().await;
        let (removed, snapshot) = {
            let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
            let removed = clients.remove(id);
            (removed, clients.clone())
        };
        if removed.is_some() {
            debug!(client_id = %id, "removed client");
            self.persist(&snapshot).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, clients: &HashMap<String, Client>) -> Result<()> {
        match &self.path {
            Some(path) => write_atomic(path, clients).await,
            None => Ok(()),
        }
    }
}

impl ClientStore for ClientRegistry {
    fn get_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, oauth2_core::Result<Option<Client>>> {
        Box::pin(async move { Ok(self.get(id)) })
    }
}

/// Write the registry to `path` atomically with 0600 permissions.
async fn write_atomic(path: &Path, clients: &HashMap<String, Client>) -> Result<()> {
    let records: HashMap<&str, ClientRecord> = clients
        .iter()
        .map(|(id, client)| (id.as_str(), ClientRecord::from_client(client)))
        .collect();
    let json = serde_json::to_string_pretty(&records)
        .map_err(|e| Error::Encoding(format!("serializing client registry: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("client registry path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".clients.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp client registry: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting client registry permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp client registry: {e}")))?;

    debug!(path = %path.display(), clients = clients.len(), "persisted client registry");
    Ok(())
}
