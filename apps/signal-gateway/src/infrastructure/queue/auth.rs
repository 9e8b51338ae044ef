//! Storage account SharedKey authorization.
//!
//! Each request is signed with HMAC-SHA256 over a canonical string built
//! from the verb, standard headers, `x-ms-*` headers and the resource path.
//! The account key is decoded once when credentials are created.

use std::collections::BTreeMap;
use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Request, Url};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Standard headers in signing order. `Date` stays empty; `x-ms-date` is
/// signed as a canonical header instead.
const SIGNED_STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// Credential errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    /// Account name is empty.
    #[error("storage account name is empty")]
    EmptyAccountName,

    /// Account key is not valid base64.
    #[error("storage account key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),

    /// Signature could not be attached to the request.
    #[error("failed to sign request: {0}")]
    Signing(String),
}

/// Storage account name and decoded key.
#[derive(Clone)]
pub struct StorageCredentials {
    account_name: String,
    key: Vec<u8>,
}

impl StorageCredentials {
    /// Create credentials from an account name and base64 account key.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or the key is not base64.
    pub fn new(account_name: &str, account_key: &str) -> Result<Self, CredentialsError> {
        let account_name = account_name.trim();
        if account_name.is_empty() {
            return Err(CredentialsError::EmptyAccountName);
        }
        let key = BASE64.decode(account_key.trim())?;
        Ok(Self {
            account_name: account_name.to_string(),
            key,
        })
    }

    /// Storage account name.
    #[must_use]
    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// Attach a SharedKey `Authorization` header to `request`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::Signing`] if the header cannot be built.
    pub fn authorize(&self, request: &mut Request) -> Result<(), CredentialsError> {
        let content_length = request
            .body()
            .and_then(reqwest::Body::as_bytes)
            .map_or(0, <[u8]>::len);
        let to_sign = string_to_sign(
            request.method().as_str(),
            request.headers(),
            request.url(),
            content_length,
            &self.account_name,
        );
        let signature = self.sign(&to_sign)?;
        let value = HeaderValue::from_str(&format!("SharedKey {}:{signature}", self.account_name))
            .map_err(|e| CredentialsError::Signing(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    fn sign(&self, to_sign: &str) -> Result<String, CredentialsError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| CredentialsError::Signing(e.to_string()))?;
        mac.update(to_sign.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("account_name", &self.account_name)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Build the SharedKey string-to-sign for a queue request.
#[must_use]
pub fn string_to_sign(
    method: &str,
    headers: &HeaderMap,
    url: &Url,
    content_length: usize,
    account_name: &str,
) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(method);
    out.push('\n');

    for name in SIGNED_STANDARD_HEADERS {
        if name == "content-length" {
            if content_length > 0 {
                out.push_str(&content_length.to_string());
            }
        } else if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            out.push_str(value);
        }
        out.push('\n');
    }

    let mut ms_headers: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, value) in headers {
        if !name.as_str().starts_with("x-ms-") {
            continue;
        }
        if let Ok(value) = value.to_str() {
            ms_headers.entry(name.as_str()).or_default().push(value.trim());
        }
    }
    for (name, values) in ms_headers {
        out.push_str(name);
        out.push(':');
        out.push_str(&values.join(","));
        out.push('\n');
    }

    out.push('/');
    out.push_str(account_name);
    out.push_str(url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        out.push('\n');
        out.push_str(&name);
        out.push(':');
        out.push_str(&values.join(","));
    }

    out
}
