// Copyright 2026 MCP Trends Contributors
// SPDX-License-Identifier: Apache-2.0

//! Single-hop HTTP fetches for the probe engine.
//!
//! Redirects are never followed here: the engine walks them itself so the
//! chain can be recorded. Bodies are read chunk by chunk and cut at the
//! configured cap.

use crate::config::ScanConfig;
use crate::model::{TlsSummary, TlsVersion};
use async_trait::async_trait;
use std::time::Duration;

/// One GET to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

/// Raw response of a single hop.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchResponse {
    pub status: u16,
    pub location: Option<String>,
    pub retry_after: Option<String>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: Vec<u8>,
    pub truncated: bool,
    /// `None` for plaintext responses.
    pub tls: Option<TlsSummary>,
}

impl FetchResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// A 200 carrying a JSON document.
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200)
            .with_body(body)
            .with_content_type("application/json")
    }

    /// A redirect to `location`.
    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self::new(status).with_location(location)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, value: impl Into<String>) -> Self {
        self.last_modified = Some(value.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsSummary) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// Why a hop produced no HTTP response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out")]
    Timeout,
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Transport seam. Production uses [`ReqwestFetcher`]; tests script one.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// reqwest-backed fetcher.
///
/// reqwest does not expose the negotiated protocol, so it is inferred from
/// which client in the ladder completed the handshake: a TLS 1.3-only
/// client first, then one capped at TLS 1.2, then (with `strict_tls` off) a
/// client that accepts invalid certificates.
#[derive(Clone)]
pub struct ReqwestFetcher {
    modern: reqwest::Client,
    legacy: reqwest::Client,
    lax: Option<reqwest::Client>,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str, strict_tls: bool) -> Result<Self, FetchError> {
        let modern = base_builder(user_agent)
            .min_tls_version(reqwest::tls::Version::TLS_1_3)
            .build()
            .map_err(|e| FetchError::Other(error_chain(&e)))?;
        let legacy = base_builder(user_agent)
            .max_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()
            .map_err(|e| FetchError::Other(error_chain(&e)))?;
        let lax = if strict_tls {
            None
        } else {
            Some(
                base_builder(user_agent)
                    .danger_accept_invalid_certs(true)
                    .build()
                    .map_err(|e| FetchError::Other(error_chain(&e)))?,
            )
        };
        Ok(Self { modern, legacy, lax })
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self, FetchError> {
        Self::new(&config.user_agent, config.strict_tls)
    }

    async fn send(
        &self,
        client: &reqwest::Client,
        request: &FetchRequest,
        tls: Option<TlsSummary>,
    ) -> Result<FetchResponse, FetchError> {
        let resp = client
            .get(&request.url)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        let header = |name: reqwest::header::HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let status = resp.status().as_u16();
        let location = header(reqwest::header::LOCATION);
        let retry_after = header(reqwest::header::RETRY_AFTER);
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let etag = header(reqwest::header::ETAG);
        let last_modified = header(reqwest::header::LAST_MODIFIED);

        let (body, truncated) = read_capped(resp, request.max_body_bytes)
            .await
            .map_err(|e| classify_error(&e))?;

        Ok(FetchResponse {
            status,
            location,
            retry_after,
            content_type,
            etag,
            last_modified,
            body,
            truncated,
            tls,
        })
    }

    async fn send_lax(
        &self,
        request: &FetchRequest,
        cert_error: String,
    ) -> Result<FetchResponse, FetchError> {
        match &self.lax {
            Some(lax) => {
                let tls = TlsSummary {
                    protocol_version: None,
                    cipher_strength: None,
                    cert_valid: false,
                };
                self.send(lax, request, Some(tls)).await
            }
            None => Err(FetchError::Tls(cert_error)),
        }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        if request.url.starts_with("http://") {
            return self.send(&self.modern, request, None).await;
        }

        let modern = self
            .send(&self.modern, request, Some(verified(TlsVersion::Tls13)))
            .await;
        match modern {
            Err(FetchError::Tls(msg)) if is_certificate_error(&msg) => {
                self.send_lax(request, msg).await
            }
            Err(FetchError::Tls(_)) => {
                let legacy = self
                    .send(&self.legacy, request, Some(verified(TlsVersion::Tls12)))
                    .await;
                match legacy {
                    Err(FetchError::Tls(msg)) if is_certificate_error(&msg) => {
                        self.send_lax(request, msg).await
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}

fn base_builder(user_agent: &str) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(user_agent)
        .use_rustls_tls()
}

fn verified(version: TlsVersion) -> TlsSummary {
    TlsSummary {
        protocol_version: Some(version),
        cipher_strength: None,
        cert_valid: true,
    }
}

async fn read_capped(
    mut resp: reqwest::Response,
    cap: usize,
) -> Result<(Vec<u8>, bool), reqwest::Error> {
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        let room = cap.saturating_sub(body.len());
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !msg.contains(&text) {
            msg.push_str(": ");
            msg.push_str(&text);
        }
        source = inner.source();
    }
    msg
}

fn classify_error(err: &reqwest::Error) -> FetchError {
    classify_message(error_chain(err), err.is_timeout(), err.is_connect())
}

pub(crate) fn classify_message(chain: String, is_timeout: bool, is_connect: bool) -> FetchError {
    if is_timeout {
        return FetchError::Timeout;
    }
    let lower = chain.to_ascii_lowercase();
    const DNS_MARKERS: &[&str] = &[
        "dns error",
        "failed to lookup address",
        "name or service not known",
        "no such host",
        "nodename nor servname",
        "no address associated",
    ];
    const TLS_MARKERS: &[&str] = &[
        "certificate",
        "tls",
        "handshake",
        "peer is incompatible",
        "received fatal alert",
    ];
    if DNS_MARKERS.iter().any(|m| lower.contains(m)) {
        FetchError::Dns(chain)
    } else if TLS_MARKERS.iter().any(|m| lower.contains(m)) {
        FetchError::Tls(chain)
    } else if is_connect {
        FetchError::Connect(chain)
    } else {
        FetchError::Other(chain)
    }
}

/// Whether a TLS failure is about the peer certificate rather than the
/// protocol negotiation.
pub fn is_certificate_error(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("certificate") || lower.contains("unknownissuer") || lower.contains("expired")
}
