//! DRM - license acquisition for protected sources
//!
//! A protected source needs a license before its engine may open it. The
//! [`LicenseLoader`] resolves one from a certificate URL, a license URL and a
//! content id:
//!
//! ```text
//!   certificate URL ──GET──▶ certificate ──▶ KeyExchange ──▶ key request (SPC)
//!                                                              │
//!   license URL ◀──────────────────POST────────────────────────┘
//!        │
//!        └──▶ license blob (CKC) ──▶ OpenRequest.license
//! ```
//!
//! Loaders are raced against the session's cancellation token, so dropping the
//! in-flight future is how a resolve is aborted.

use crate::error::{Error, Result};
use crate::types::DrmParams;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Opaque license returned by the license server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseBlob {
    /// Content id the license was issued for
    pub content_id: String,
    /// License bytes handed to the engine
    pub data: Bytes,
}

impl LicenseBlob {
    pub fn new(content_id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_id: content_id.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// License request for one protected source
#[derive(Debug, Clone)]
pub struct LicenseRequest {
    /// Certificate URL, absent for systems that need none
    pub certificate_url: Option<Url>,
    /// License server URL
    pub license_url: Url,
    /// Content id for the key exchange
    pub content_id: String,
    /// Request headers
    pub headers: HashMap<String, String>,
}

impl LicenseRequest {
    pub fn from_params(params: &DrmParams, headers: &HashMap<String, String>) -> Self {
        Self {
            certificate_url: params.certificate_url.clone(),
            license_url: params.license_url.clone(),
            content_id: params.content_id.clone(),
            headers: headers.clone(),
        }
    }
}

/// Resolves licenses for protected sources
#[async_trait]
pub trait LicenseLoader: Send + Sync {
    /// Fetch the certificate, exchange keys and return the license.
    /// Failures are reported as `Error::DrmFailure`.
    async fn resolve(&self, request: &LicenseRequest) -> Result<LicenseBlob>;
}

/// Loader for hosts without DRM support; every protected source fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLicenseLoader;

#[async_trait]
impl LicenseLoader for NoLicenseLoader {
    async fn resolve(&self, request: &LicenseRequest) -> Result<LicenseBlob> {
        Err(Error::drm(format!(
            "no license loader configured for {}",
            request.content_id
        )))
    }
}

/// Run a resolve unless `cancel` fires first.
/// Returns `None` when cancelled; the in-flight request is dropped.
pub async fn resolve_cancellable(
    loader: &dyn LicenseLoader,
    request: &LicenseRequest,
    cancel: &CancellationToken,
) -> Option<Result<LicenseBlob>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(content_id = %request.content_id, "License resolution cancelled");
            None
        }
        result = loader.resolve(request) => Some(result.map_err(|e| match e {
            Error::DrmFailure { .. } => e,
            other => Error::drm(other.to_string()),
        })),
    }
}

/// Produces the engine-specific key request from a certificate
pub trait KeyExchange: Send + Sync {
    /// Build the key request (e.g. a FairPlay SPC) for `content_id`
    fn key_request(&self, certificate: &[u8], content_id: &str) -> Result<Vec<u8>>;
}

/// How the license server encodes its response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseEncoding {
    /// Raw license bytes
    #[default]
    Raw,
    /// Base64 text (common for FairPlay CKC responses)
    Base64,
}

/// License loader speaking plain HTTP to a certificate and license server
pub struct HttpLicenseLoader {
    client: reqwest::Client,
    key_exchange: std::sync::Arc<dyn KeyExchange>,
    encoding: ResponseEncoding,
}

impl HttpLicenseLoader {
    /// Create a loader with the default HTTP client
    pub fn new(key_exchange: std::sync::Arc<dyn KeyExchange>) -> Self {
        Self::with_client(reqwest::Client::new(), key_exchange)
    }

    pub fn with_client(client: reqwest::Client, key_exchange: std::sync::Arc<dyn KeyExchange>) -> Self {
        Self {
            client,
            key_exchange,
            encoding: ResponseEncoding::Raw,
        }
    }

    /// Set the response encoding
    pub fn with_encoding(mut self, encoding: ResponseEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn apply_headers(
        mut builder: reqwest::RequestBuilder,
        headers: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder {
        for (key, value) in headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder
    }

    async fn fetch_certificate(&self, url: &Url, headers: &HashMap<String, String>) -> Result<Bytes> {
        let response = Self::apply_headers(self.client.get(url.clone()), headers)
            .send()
            .await
            .map_err(|e| Error::drm(format!("certificate request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::drm(format!(
                "certificate server returned {}",
                response.status()
            )));
        }

        let certificate = response
            .bytes()
            .await
            .map_err(|e| Error::drm(format!("certificate body unreadable: {e}")))?;
        if certificate.is_empty() {
            return Err(Error::drm("empty certificate"));
        }
        Ok(certificate)
    }
}

#[async_trait]
impl LicenseLoader for HttpLicenseLoader {
    #[instrument(skip(self, request), fields(content_id = %request.content_id))]
    async fn resolve(&self, request: &LicenseRequest) -> Result<LicenseBlob> {
        let certificate = match &request.certificate_url {
            Some(url) => self.fetch_certificate(url, &request.headers).await?,
            None => Bytes::new(),
        };

        let challenge = self
            .key_exchange
            .key_request(&certificate, &request.content_id)?;

        debug!(
            certificate_bytes = certificate.len(),
            challenge_bytes = challenge.len(),
            "Requesting license"
        );

        let response = Self::apply_headers(
            self.client.post(request.license_url.clone()),
            &request.headers,
        )
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(challenge)
        .send()
        .await
        .map_err(|e| Error::drm(format!("license request failed: {e}")))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "License server rejected request");
            return Err(Error::drm(format!("license server returned {}", response.status())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::drm(format!("license body unreadable: {e}")))?;

        let license = decode_license(&body, self.encoding)?;
        info!(license_bytes = license.len(), "License acquired");
        Ok(LicenseBlob::new(request.content_id.clone(), license))
    }
}

/// Decode a license response body
pub fn decode_license(body: &[u8], encoding: ResponseEncoding) -> Result<Bytes> {
    use base64::Engine as _;

    let license = match encoding {
        ResponseEncoding::Raw => Bytes::copy_from_slice(body),
        ResponseEncoding::Base64 => {
            let text: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(text)
                .map_err(|e| Error::drm(format!("license is not valid base64: {e}")))?;
            Bytes::from(decoded)
        }
    };

    if license.is_empty() {
        return Err(Error::drm("empty license"));
    }
    Ok(license)
}
