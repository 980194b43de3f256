//! Reference-counted token store over a [`KvBackend`]
//!
//! Access and refresh tokens are thin pointers to a shared basic record.
//! Removing one pointer deletes the basic record only when no sibling
//! pointer still resolves to it, so revoking an access token leaves the
//! refresh token usable and vice versa.

use std::sync::Arc;

use chrono::Utc;
use oauth2_core::{BoxFuture, TokenInfo, TokenStore};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::kv::{KvBackend, WriteBatch};
use crate::record::{Keys, RecordState, RecordTtls};

/// [`TokenStore`] persisting records as JSON in a key-value backend.
#[derive(Clone)]
pub struct KvTokenStore {
    backend: Arc<dyn KvBackend>,
    keys: Keys,
}

impl KvTokenStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self::with_namespace(backend, "")
    }

    /// Store every key under `namespace`, e.g. `"oauth2:"`.
    pub fn with_namespace(backend: Arc<dyn KvBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            keys: Keys::new(namespace),
        }
    }

    async fn put(&self, info: &TokenInfo) -> Result<()> {
        let state = RecordState::of(info)
            .ok_or_else(|| Error::InvalidRecord("record has no code or access token".into()))?;
        let ttls = RecordTtls::compute(info, state, Utc::now());
        let json = serde_json::to_string(info)?;

        let mut batch = WriteBatch::new();
        match state {
            RecordState::CodeOnly => {
                let code = info.code().unwrap_or_default();
                batch.put(self.keys.code(code), json, ttls.code);
            }
            RecordState::AccessOnly | RecordState::AccessAndRefresh => {
                let basic_id = Uuid::new_v4().to_string();
                batch.put(self.keys.basic(&basic_id), json, ttls.basic);
                if let Some(refresh) = info.refresh() {
                    batch.put(self.keys.refresh(refresh), basic_id.clone(), ttls.refresh);
                }
                let access = info.access().unwrap_or_default();
                batch.put(self.keys.access(access), basic_id, ttls.access);
            }
        }

        self.backend.commit(batch).await?;
        debug!(client_id = %info.client_id, state = ?state, "stored token record");
        Ok(())
    }

    async fn load_json(&self, key: &str) -> Result<Option<TokenInfo>> {
        match self.backend.get(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn load_basic(&self, pointer_key: &str) -> Result<Option<TokenInfo>> {
        match self.backend.get(pointer_key).await? {
            Some(basic_id) => self.load_json(&self.keys.basic(&basic_id)).await,
            None => Ok(None),
        }
    }

    /// Delete `pointer_key`, then the basic record it names unless the
    /// sibling pointer still resolves to the same record.
    async fn remove_pointer(&self, pointer_key: &str, sibling: Sibling) -> Result<()> {
        let Some(basic_id) = self.backend.get(pointer_key).await? else {
            return Ok(());
        };
        self.backend.delete(pointer_key).await?;

        let basic_key = self.keys.basic(&basic_id);
        let Some(info) = self.load_json(&basic_key).await? else {
            return Ok(());
        };

        let sibling_key = match sibling {
            Sibling::Access => info.access().map(|a| self.keys.access(a)),
            Sibling::Refresh => info.refresh().map(|r| self.keys.refresh(r)),
        };
        let sibling_live = match sibling_key {
            Some(key) => self.backend.get(&key).await?.as_deref() == Some(basic_id.as_str()),
            None => false,
        };

        if !sibling_live {
            self.backend.delete(&basic_key).await?;
            debug!(client_id = %info.client_id, "removed basic record");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Sibling {
    Access,
    Refresh,
}

impl TokenStore for KvTokenStore {
    fn create<'a>(&'a self, info: &'a TokenInfo) -> BoxFuture<'a, oauth2_core::Result<()>> {
        Box::pin(async move { Ok(self.put(info).await?) })
    }

    fn remove_by_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, oauth2_core::Result<bool>> {
        Box::pin(async move {
            let removed = self.backend.delete(&self.keys.code(code)).await?;
            debug!(removed, "consumed authorization code");
            Ok(removed)
        })
    }

    fn remove_by_access<'a>(&'a self, access: &'a str) -> BoxFuture<'a, oauth2_core::Result<()>> {
        Box::pin(async move {
            Ok(self
                .remove_pointer(&self.keys.access(access), Sibling::Refresh)
                .await?)
        })
    }

    fn remove_by_refresh<'a>(&'a self, refresh: &'a str) -> BoxFuture<'a, oauth2_core::Result<()>> {
        Box::pin(async move {
            Ok(self
                .remove_pointer(&self.keys.refresh(refresh), Sibling::Access)
                .await?)
        })
    }

    fn get_by_code<'a>(
        &'a self,
        code: &'a str,
    ) -> BoxFuture<'a, oauth2_core::Result<Option<TokenInfo>>> {
        Box::pin(async move { Ok(self.load_json(&self.keys.code(code)).await?) })
    }

    fn get_by_access<'a>(
        &'a self,
        access: &'a str,
    ) -> BoxFuture<'a, oauth2_core::Result<Option<TokenInfo>>> {
        Box::pin(async move { Ok(self.load_basic(&self.keys.access(access)).await?) })
    }

    fn get_by_refresh<'a>(
        &'a self,
        refresh: &'a str,
    ) -> BoxFuture<'a, oauth2_core::Result<Option<TokenInfo>>> {
        Box::pin(async move { Ok(self.load_basic(&self.keys.refresh(refresh)).await?) })
    }
}
