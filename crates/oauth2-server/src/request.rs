//! Transport-neutral view of an inbound request
//!
//! The adaptor hands the engine the method, headers and the decoded form
//! parameters. Query and body parameters are merged into one map; a body
//! value wins over a query value of the same name.

use std::borrow::Cow;
use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::{HeaderMap, Method, header};

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub headers: HeaderMap,
    params: HashMap<String, String>,
}

impl Request {
    pub fn new(method: Method, headers: HeaderMap) -> Self {
        Self {
            method,
            headers,
            params: HashMap::new(),
        }
    }

    /// Build from the raw query string and a form-urlencoded body.
    pub fn from_parts(
        method: Method,
        headers: HeaderMap,
        query: Option<&str>,
        body: Option<&[u8]>,
    ) -> Self {
        let mut request = Self::new(method, headers);
        if let Some(query) = query {
            request.extend(url::form_urlencoded::parse(query.as_bytes()));
        }
        if let Some(body) = body {
            request.extend(url::form_urlencoded::parse(body));
        }
        request
    }

    /// Add or replace a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// A form value, empty when absent.
    pub fn form_value(&self, key: &str) -> &str {
        self.params.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Credentials from an `Authorization: Basic` header.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        let value = self.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let encoded = strip_scheme(value, "Basic")?;
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, pass) = decoded.split_once(':')?;
        Some((user.to_owned(), pass.to_owned()))
    }

    /// Token from an `Authorization: Bearer` header.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        strip_scheme(value, "Bearer")
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    fn extend<'a>(&mut self, pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>) {
        for (key, value) in pairs {
            self.params.insert(key.into_owned(), value.into_owned());
        }
    }
}

/// Strip an auth scheme prefix, case-insensitively.
fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (given, rest) = value.split_once(' ')?;
    given.eq_ignore_ascii_case(scheme).then_some(rest)
}
