//! Redirect URI validation
//!
//! The default policy accepts a redirect URI whose scheme matches the
//! client's registered domain and whose host equals it or is a subdomain of
//! it on a label boundary (`app.example.com` under `example.com`, but not
//! `badexample.com`).

use oauth2_core::{Error, Result};
use url::Url;

/// Accept `redirect_uri` for a client registered with `base_uri`.
pub fn validate_uri(base_uri: &str, redirect_uri: &str) -> Result<()> {
    if base_uri.is_empty() || redirect_uri.is_empty() {
        return Err(Error::InvalidRedirectUri);
    }
    let base = Url::parse(base_uri).map_err(|_| Error::InvalidRedirectUri)?;
    let redirect = Url::parse(redirect_uri).map_err(|_| Error::InvalidRedirectUri)?;

    if base.scheme() != redirect.scheme() {
        return Err(Error::InvalidRedirectUri);
    }

    let (Some(base_host), Some(redirect_host)) = (base.host_str(), redirect.host_str()) else {
        return Err(Error::InvalidRedirectUri);
    };
    let base_host = base_host.to_ascii_lowercase();
    let redirect_host = redirect_host.to_ascii_lowercase();

    let host_ok = redirect_host == base_host
        || redirect_host
            .strip_suffix(base_host.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'));
    if !host_ok {
        return Err(Error::InvalidRedirectUri);
    }

    // An explicit port on the registered domain pins it
    if base.port().is_some() && base.port_or_known_default() != redirect.port_or_known_default() {
        return Err(Error::InvalidRedirectUri);
    }
    Ok(())
}
