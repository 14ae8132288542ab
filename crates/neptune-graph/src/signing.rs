//! AWS Signature Version 4 request signing.
//!
//! Builds the canonical request, string to sign and signing key as described
//! in the SigV4 documentation, and attaches `Authorization`, `X-Amz-Date` and
//! (for temporary credentials) `X-Amz-Security-Token` headers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::credentials::Credentials;
use crate::error::{GraphError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signing service name for Neptune data-plane requests.
pub const NEPTUNE_SERVICE: &str = "neptune-db";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// A request before signing.
#[derive(Debug, Clone)]
pub struct UnsignedRequest {
    pub method: Method,
    pub url: Url,
    /// Extra headers to send and sign, e.g. `content-type`.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl UnsignedRequest {
    /// A `POST` with the given content type and body.
    pub fn post(url: Url, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body,
        }
    }
}

/// A request ready to send. Produced once per attempt and never modified.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl SignedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Signs requests for one service in one region.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    service: String,
    region: String,
}

impl RequestSigner {
    pub fn new(service: &str, region: &str) -> Self {
        Self {
            service: service.to_string(),
            region: region.to_string(),
        }
    }

    /// Signer for the Neptune data plane in `region`.
    pub fn neptune(region: &str) -> Self {
        Self::new(NEPTUNE_SERVICE, region)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sign with the current time.
    pub fn sign(&self, request: UnsignedRequest, credentials: &Credentials) -> Result<SignedRequest> {
        self.sign_at(request, credentials, Utc::now())
    }

    /// Sign as of `now`.
    pub fn sign_at(
        &self,
        request: UnsignedRequest,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<SignedRequest> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        // Lowercased name -> trimmed value; BTreeMap keeps them in canonical order.
        let mut signed: BTreeMap<String, String> = BTreeMap::new();
        signed.insert("host".to_string(), host_header(&request.url)?);
        signed.insert("x-amz-date".to_string(), amz_date.clone());
        if let Some(token) = &credentials.session_token {
            signed.insert("x-amz-security-token".to_string(), token.clone());
        }
        for (name, value) in &request.headers {
            signed.insert(name.to_lowercase(), collapse_whitespace(value));
        }

        let signed_headers = signed.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_headers: String = signed
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.method.as_str(),
            canonical_uri(&request.url),
            canonical_query(&request.url),
            canonical_headers,
            signed_headers,
            hex_sha256(&request.body),
        );

        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );

        let key = signing_key(&credentials.secret_key, &date, &self.region, &self.service)?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.access_key
        );

        let mut headers = HeaderMap::new();
        for (name, value) in &signed {
            insert_header(&mut headers, name, value)?;
        }
        insert_header(&mut headers, "authorization", &authorization)?;

        Ok(SignedRequest {
            method: request.method,
            url: request.url,
            headers,
            body: request.body,
        })
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| GraphError::Signing(format!("invalid header name {name}: {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| GraphError::Signing(format!("invalid header value for {name}: {e}")))?;
    headers.insert(header_name, header_value);
    Ok(())
}

/// Derive the SigV4 signing key for a date, region and service.
pub fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{secret_key}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| GraphError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `Host` as the server sees it: the port is included only when non-default.
fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| GraphError::Signing(format!("URL has no host: {url}")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Each segment of the already-encoded path is encoded again, as SigV4 requires
/// for every service except S3.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 encoding of everything except unreserved characters.
fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
