//! Canonical request construction for AWS Signature Version 4.
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! The signer and the verifier build the same [`CanonicalRequest`] from the
//! same inputs, so both sides agree on the bytes being signed.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// Characters left unencoded in a path segment (RFC 3986 unreserved).
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A normalized request ready to be hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    method: String,
    uri: String,
    query: String,
    /// Signed headers only, lowercase name to normalized value.
    headers: BTreeMap<String, String>,
    payload_hash: String,
}

impl CanonicalRequest {
    /// Build from request parts, keeping only `signed_headers`.
    ///
    /// Every signed header must be present in `headers`.
    pub fn new(
        method: &str,
        uri: &http::Uri,
        headers: &http::HeaderMap,
        signed_headers: &[&str],
        payload_hash: &str,
    ) -> Result<Self, AuthError> {
        let mut canonical_headers = BTreeMap::new();
        for name in signed_headers {
            let name = name.to_ascii_lowercase();
            let values = headers.get_all(name.as_str());
            let mut joined: Option<String> = None;
            for value in values {
                let value = value
                    .to_str()
                    .map_err(|_| AuthError::MissingHeader(name.clone()))?;
                let value = collapse_whitespace(value.trim());
                match joined.as_mut() {
                    Some(existing) => {
                        existing.push(',');
                        existing.push_str(&value);
                    }
                    None => joined = Some(value),
                }
            }
            let value = joined.ok_or_else(|| AuthError::MissingHeader(name.clone()))?;
            canonical_headers.insert(name, value);
        }

        Ok(Self {
            method: method.to_owned(),
            uri: canonical_uri(uri.path()),
            query: canonical_query(uri.query().unwrap_or("")),
            headers: canonical_headers,
            payload_hash: payload_hash.to_owned(),
        })
    }

    /// The `SignedHeaders` value: sorted lowercase names joined by `;`.
    #[must_use]
    pub fn signed_headers(&self) -> String {
        self.headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    /// Render the canonical request text.
    #[must_use]
    pub fn render(&self) -> String {
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n{}\n{}\n{headers}\n\n{}\n{}",
            self.method,
            self.uri,
            self.query,
            self.signed_headers(),
            self.payload_hash
        )
    }

    /// Hex SHA-256 of the rendered request.
    #[must_use]
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.render().as_bytes()))
    }
}

/// URI-encode each path segment; `/` separators are kept and an empty path
/// becomes `/`.
///
/// # Examples
///
/// ```
/// use dynastack_auth::canonical::canonical_uri;
///
/// assert_eq!(canonical_uri(""), "/");
/// assert_eq!(canonical_uri("/hello world"), "/hello%20world");
/// ```
#[must_use]
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }
    path.split('/')
        .map(|segment| {
            let decoded = percent_decode_str(segment).decode_utf8_lossy();
            utf8_percent_encode(&decoded, URI_ENCODE_SET).to_string()
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Sort query parameters by key, then value. Values are kept as sent.
#[must_use]
pub fn canonical_query(query: &str) -> String {
    let mut params: Vec<(&str, &str)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|param| param.split_once('=').unwrap_or((param, "")))
        .collect();
    params.sort_unstable();
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
            }
            prev_was_space = true;
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}
