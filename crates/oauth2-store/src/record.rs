//! Record layout for the key-value token store
//!
//! A `TokenInfo` is persisted in one of three shapes:
//!
//! - `CodeOnly`: `code:<code>` holds the full record.
//! - `AccessOnly`: `basic:<id>` holds the full record and `access:<token>`
//!   points at `<id>`.
//! - `AccessAndRefresh`: as `AccessOnly` plus `refresh:<token>` pointing at
//!   the same `<id>`.
//!
//! Pointers and the basic record are written in one batch, so a pointer is
//! never visible without the record it names.

use std::time::Duration;

use chrono::{DateTime, Utc};
use oauth2_core::TokenInfo;

/// Which lookup keys a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    CodeOnly,
    AccessOnly,
    AccessAndRefresh,
}

impl RecordState {
    /// Classify a record. A code takes precedence: a record with a code is
    /// always stored by code. `None` when the record has no lookup key.
    pub fn of(info: &TokenInfo) -> Option<Self> {
        if info.code().is_some() {
            return Some(Self::CodeOnly);
        }
        match (info.access(), info.refresh()) {
            (Some(_), Some(_)) => Some(Self::AccessAndRefresh),
            (Some(_), None) => Some(Self::AccessOnly),
            _ => None,
        }
    }
}

/// Key TTLs for a record about to be written.
///
/// `None` means the key never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTtls {
    pub code: Option<Duration>,
    pub access: Option<Duration>,
    pub refresh: Option<Duration>,
    pub basic: Option<Duration>,
}

impl RecordTtls {
    /// Compute TTLs so that the access pointer never outlives the refresh
    /// pointer and the basic record outlives both.
    pub fn compute(info: &TokenInfo, state: RecordState, now: DateTime<Utc>) -> Self {
        match state {
            RecordState::CodeOnly => Self {
                code: info.code_remaining(now),
                access: None,
                refresh: None,
                basic: None,
            },
            RecordState::AccessOnly => {
                let access = info.access_remaining(now);
                Self {
                    code: None,
                    access,
                    refresh: None,
                    basic: access,
                }
            }
            RecordState::AccessAndRefresh => {
                let refresh = info.refresh_remaining(now);
                let access = shorter(info.access_remaining(now), refresh);
                Self {
                    code: None,
                    access,
                    refresh,
                    basic: longer(access, refresh),
                }
            }
        }
    }
}

/// Key naming inside a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn code(&self, code: &str) -> String {
        format!("{}code:{code}", self.namespace)
    }

    pub fn access(&self, access: &str) -> String {
        format!("{}access:{access}", self.namespace)
    }

    pub fn refresh(&self, refresh: &str) -> String {
        format!("{}refresh:{refresh}", self.namespace)
    }

    pub fn basic(&self, id: &str) -> String {
        format!("{}basic:{id}", self.namespace)
    }
}

fn shorter(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn longer(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}
