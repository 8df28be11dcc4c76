//! reqwest-backed transport for IPFS gateways and pinning services

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use pinup_core::config::PinupConfig;
use pinup_core::types::{PinListResponse, PinRequest, PinStatus, TaskContent, UploadResponse};

use crate::auth::CredentialProvider;
use crate::error::TransportError;
use crate::traits::{PinTransport, ProgressFn, UploadRequest, UploadTransport};

/// Query string the gateway expects for CIDv1 / sha2-256 uploads
const ADD_PATH: &str = "/api/v0/add?pin=true&cid-version=1&hash=sha2-256";
const PINS_PATH: &str = "/psa/pins";
/// Slice size when streaming in-memory content
const MEMORY_CHUNK: usize = 64 * 1024;
/// How much of an error body to keep in `TransportError::Status`
const ERROR_BODY_LIMIT: usize = 512;

type ContentStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

/// Minimal config needed to build a transport
/// (full config lives in pinup-core's PinupConfig)
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub upload_url: String,
    pub pin_url: String,
    pub timeout: Duration,
    pub transfer_timeout: Duration,
}

/// Talks to one upload gateway and one pinning service
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pinup/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            config: TransportConfig {
                upload_url: config.upload_url.trim_end_matches('/').to_string(),
                pin_url: config.pin_url.trim_end_matches('/').to_string(),
                ..config
            },
            credentials,
        })
    }

    /// Build a transport from pinup-core config, validating endpoints first.
    pub fn from_core_config(
        config: &PinupConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        config.validate().context("validating gateway config")?;

        Self::new(
            TransportConfig {
                upload_url: config.gateway.upload.base_url().to_string(),
                pin_url: config.gateway.pin.base_url().to_string(),
                timeout: Duration::from_secs(config.http.timeout_secs),
                transfer_timeout: Duration::from_secs(config.http.transfer_timeout_secs),
            },
            credentials,
        )
    }

    pub fn upload_url(&self) -> &str {
        &self.config.upload_url
    }

    pub fn pin_url(&self) -> &str {
        &self.config.pin_url
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn authorization(&self, url: &str) -> Result<String, TransportError> {
        self.credentials
            .authorization()
            .await
            .map(|secret| secret.expose_secret().to_string())
            .ok_or_else(|| TransportError::MissingCredential(url.to_string()))
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: Option<ProgressFn>,
    ) -> Result<UploadResponse, TransportError> {
        let url = format!("{}{ADD_PATH}", self.config.upload_url);
        let auth = self.authorization(&url).await?;

        let (content, total) = open_content(request.content).await?;
        let mut sent = 0u64;
        let content = content.inspect_ok(move |chunk| {
            sent += chunk.len() as u64;
            if let Some(cb) = &progress {
                cb(sent, total);
            }
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(content), total)
            .file_name(request.file_name.clone());
        let form = Form::new().part("file", part);

        debug!(url = %url, file = %request.file_name, bytes = total, "uploading");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, auth)
            .timeout(self.config.transfer_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        let body = read_success_body(&url, response).await?;
        let uploaded: UploadResponse = decode_last_line(&url, &body)?;
        info!(
            file = %request.file_name,
            cid = %uploaded.content_id,
            size = %uploaded.size,
            "uploaded"
        );
        Ok(uploaded)
    }
}

#[async_trait]
impl PinTransport for HttpTransport {
    async fn pin(&self, request: PinRequest) -> Result<PinStatus, TransportError> {
        let url = format!("{}{PINS_PATH}", self.config.pin_url);
        let auth = self.authorization(&url).await?;

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, auth)
            .timeout(self.config.transfer_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        let status: PinStatus = decode_json(&url, &read_success_body(&url, response).await?)?;
        info!(
            cid = %request.cid,
            request_id = %status.request_id,
            status = %status.status,
            "pin requested"
        );
        Ok(status)
    }

    async fn list_pins(&self, limit: usize) -> Result<PinListResponse, TransportError> {
        let url = format!("{}{PINS_PATH}?limit={limit}", self.config.pin_url);
        let auth = self.authorization(&url).await?;

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, auth)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        decode_json(&url, &read_success_body(&url, response).await?)
    }

    async fn remove_pin(&self, request_id: &str) -> Result<(), TransportError> {
        let url = format!("{}{PINS_PATH}/{request_id}", self.config.pin_url);
        let auth = self.authorization(&url).await?;

        let response = self
            .client
            .delete(&url)
            .header(AUTHORIZATION, auth)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.clone(),
                source,
            })?;

        read_success_body(&url, response).await?;
        info!(request_id, "pin removed");
        Ok(())
    }
}

/// Turn task content into a byte stream plus its total length.
async fn open_content(content: TaskContent) -> Result<(ContentStream, u64), TransportError> {
    match content {
        TaskContent::Memory(data) => {
            let total = data.len() as u64;
            let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
                .step_by(MEMORY_CHUNK)
                .map(|start| Ok(data.slice(start..(start + MEMORY_CHUNK).min(data.len()))))
                .collect();
            Ok((Box::pin(stream::iter(chunks)), total))
        }
        TaskContent::File(path) => {
            let file = tokio::fs::File::open(&path).await?;
            let total = file.metadata().await?.len();
            Ok((Box::pin(tokio_util::io::ReaderStream::new(file)), total))
        }
    }
}

/// Read the full body, mapping non-2xx answers to `TransportError::Status`.
async fn read_success_body(url: &str, response: reqwest::Response) -> Result<Bytes, TransportError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;

    if !status.is_success() {
        let text: String = String::from_utf8_lossy(&body)
            .chars()
            .take(ERROR_BODY_LIMIT)
            .collect();
        return Err(TransportError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(body)
}

fn decode_json<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(body).map_err(|source| TransportError::Decode {
        url: url.to_string(),
        source,
    })
}

/// `/api/v0/add` streams one JSON object per line; the last one describes
/// the top-level object.
fn decode_last_line<T: DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, TransportError> {
    let last = body
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .last()
        .unwrap_or(body);
    decode_json(url, last)
}
