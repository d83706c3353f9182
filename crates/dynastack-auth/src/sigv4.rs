//! AWS Signature Version 4 signing and verification.
//!
//! Signing:
//!
//! 1. Stamp the request with `x-amz-date` (and `x-amz-security-token`).
//! 2. Build the canonical request over the signed headers and the SHA-256 of
//!    the body.
//! 3. Build the string to sign from the timestamp, credential scope, and
//!    canonical request hash.
//! 4. Derive the signing key and attach the `Authorization` header.
//!
//! Verification runs the same steps from the received `Authorization` header
//! and compares signatures in constant time.

use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::CanonicalRequest;
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::AuthError;

/// The only algorithm supported by this implementation.
const SUPPORTED_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Headers signed when present on the request.
const SIGNABLE_HEADERS: [&str; 5] = [
    "content-type",
    "host",
    "x-amz-date",
    "x-amz-security-token",
    "x-amz-target",
];

type HmacSha256 = Hmac<Sha256>;

/// Signs requests for one service in one region.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    credentials: Credentials,
    region: String,
    service: String,
}

impl SigV4Signer {
    /// Signer for the `dynamodb` service.
    pub fn new(credentials: Credentials, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
            service: "dynamodb".to_owned(),
        }
    }

    /// Override the service name in the credential scope.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// The region in the credential scope.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign `request` with the current time.
    pub fn sign<B: AsRef<[u8]>>(
        &self,
        request: http::Request<B>,
    ) -> Result<http::Request<B>, AuthError> {
        self.sign_at(request, Utc::now())
    }

    /// Sign `request` as of `now`.
    ///
    /// A missing `host` header is filled in from the URI authority. Any
    /// previous `Authorization` header is replaced.
    pub fn sign_at<B: AsRef<[u8]>>(
        &self,
        mut request: http::Request<B>,
        now: DateTime<Utc>,
    ) -> Result<http::Request<B>, AuthError> {
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let host = request.uri().authority().map(ToString::to_string);
        let headers = request.headers_mut();
        if !headers.contains_key(http::header::HOST) {
            let host = host.ok_or_else(|| AuthError::MissingHeader("host".to_owned()))?;
            headers.insert(http::header::HOST, header_value("host", &host)?);
        }
        headers.insert("x-amz-date", header_value("x-amz-date", &timestamp)?);
        if let Some(token) = &self.credentials.session_token {
            headers.insert(
                "x-amz-security-token",
                header_value("x-amz-security-token", token)?,
            );
        }

        let signed: Vec<&str> = SIGNABLE_HEADERS
            .iter()
            .copied()
            .filter(|name| request.headers().contains_key(*name))
            .collect();
        let payload_hash = hash_payload(request.body().as_ref());
        let canonical = CanonicalRequest::new(
            request.method().as_str(),
            request.uri(),
            request.headers(),
            &signed,
            &payload_hash,
        )?;

        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = build_string_to_sign(&timestamp, &scope, &canonical.hash());
        let key = derive_signing_key(
            &self.credentials.secret_access_key,
            &date,
            &self.region,
            &self.service,
        );
        let signature = compute_signature(&key, &string_to_sign);

        let authorization = format!(
            "{SUPPORTED_ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
            self.credentials.access_key_id,
            canonical.signed_headers(),
        );
        request.headers_mut().insert(
            http::header::AUTHORIZATION,
            header_value("authorization", &authorization)?,
        );
        debug!(scope, signed_headers = %canonical.signed_headers(), "signed request");
        Ok(request)
    }
}

fn header_value(name: &'static str, value: &str) -> Result<http::HeaderValue, AuthError> {
    http::HeaderValue::from_str(value).map_err(|_| AuthError::InvalidHeaderValue(name))
}

/// The result of a successful SigV4 verification.
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// The access key ID that signed the request.
    pub access_key_id: String,
    /// The AWS region from the credential scope.
    pub region: String,
    /// The AWS service from the credential scope.
    pub service: String,
    /// The list of headers that were included in the signature.
    pub signed_headers: Vec<String>,
}

/// Parsed components of an AWS SigV4 `Authorization` header.
///
/// ```text
/// AWS4-HMAC-SHA256 Credential=AKID/20130524/us-east-1/dynamodb/aws4_request,
///   SignedHeaders=content-type;host;x-amz-date;x-amz-target,
///   Signature=<hex-signature>
/// ```
#[derive(Debug, Clone)]
pub struct ParsedAuth {
    /// The access key ID.
    pub access_key_id: String,
    /// The date component of the credential scope (YYYYMMDD).
    pub date: String,
    /// The AWS region from the credential scope.
    pub region: String,
    /// The AWS service from the credential scope.
    pub service: String,
    /// The list of signed header names (lowercase).
    pub signed_headers: Vec<String>,
    /// The hex-encoded signature.
    pub signature: String,
}

/// Parse an AWS SigV4 `Authorization` header value into its components.
pub fn parse_authorization_header(header: &str) -> Result<ParsedAuth, AuthError> {
    let (algorithm, rest) = header.split_once(' ').ok_or(AuthError::InvalidAuthHeader)?;
    if algorithm != SUPPORTED_ALGORITHM {
        return Err(AuthError::UnsupportedAlgorithm(algorithm.to_owned()));
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("Credential=") {
            credential = Some(value);
        } else if let Some(value) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(value);
        } else if let Some(value) = part.strip_prefix("Signature=") {
            signature = Some(value);
        }
    }
    let credential = credential.ok_or(AuthError::InvalidAuthHeader)?;
    let signed_headers = signed_headers.ok_or(AuthError::InvalidAuthHeader)?;
    let signature = signature.ok_or(AuthError::InvalidAuthHeader)?;

    let scope: Vec<&str> = credential.splitn(5, '/').collect();
    let [access_key_id, date, region, service, "aws4_request"] = scope.as_slice() else {
        return Err(AuthError::InvalidCredential);
    };

    Ok(ParsedAuth {
        access_key_id: (*access_key_id).to_owned(),
        date: (*date).to_owned(),
        region: (*region).to_owned(),
        service: (*service).to_owned(),
        signed_headers: signed_headers.split(';').map(ToOwned::to_owned).collect(),
        signature: signature.to_owned(),
    })
}

/// Build the SigV4 string to sign.
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request_hash: &str,
) -> String {
    format!("{SUPPORTED_ALGORITHM}\n{timestamp}\n{credential_scope}\n{canonical_request_hash}")
}

/// Derive the SigV4 signing key using the HMAC-SHA256 chain.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    hmac_sha256(&date_region_service_key, b"aws4_request")
}

/// Hex-encoded HMAC-SHA256 of `data` under `signing_key`.
#[must_use]
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    hex::encode(hmac_sha256(signing_key, data.as_bytes()))
}

/// Verify a SigV4-signed request against a credential store.
pub fn verify_sigv4<B: AsRef<[u8]>>(
    request: &http::Request<B>,
    credential_provider: &dyn CredentialProvider,
) -> Result<AuthResult, AuthError> {
    let auth_header = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;
    let parsed = parse_authorization_header(auth_header)?;
    let secret_key = credential_provider.get_secret_key(&parsed.access_key_id)?;
    let timestamp = request
        .headers()
        .get("x-amz-date")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AuthError::MissingHeader("x-amz-date".to_owned()))?;

    let signed: Vec<&str> = parsed.signed_headers.iter().map(String::as_str).collect();
    let canonical = CanonicalRequest::new(
        request.method().as_str(),
        request.uri(),
        request.headers(),
        &signed,
        &hash_payload(request.body().as_ref()),
    )?;
    let scope = format!(
        "{}/{}/{}/aws4_request",
        parsed.date, parsed.region, parsed.service
    );
    let string_to_sign = build_string_to_sign(timestamp, &scope, &canonical.hash());
    let key = derive_signing_key(&secret_key, &parsed.date, &parsed.region, &parsed.service);

    let provided = hex::decode(&parsed.signature).map_err(|_| AuthError::SignatureDoesNotMatch)?;
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC can accept keys of any length");
    mac.update(string_to_sign.as_bytes());
    if mac.verify_slice(&provided).is_err() {
        debug!(access_key_id = %parsed.access_key_id, "signature mismatch");
        return Err(AuthError::SignatureDoesNotMatch);
    }

    Ok(AuthResult {
        access_key_id: parsed.access_key_id,
        region: parsed.region,
        service: parsed.service,
        signed_headers: parsed.signed_headers,
    })
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Hex SHA-256 of a request body.
///
/// # Examples
///
/// ```
/// use dynastack_auth::sigv4::hash_payload;
///
/// assert_eq!(
///     hash_payload(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}
