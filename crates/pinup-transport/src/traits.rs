//! Seams between the pipeline and the remote services.

use async_trait::async_trait;
use std::sync::Arc;

use pinup_core::types::{PinListResponse, PinRequest, PinStatus, TaskContent, UploadResponse};

use crate::error::TransportError;

/// Progress callback (bytes_sent, bytes_total)
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// One file to push to the gateway
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub content: TaskContent,
}

/// Content-addressed upload endpoint
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: Option<ProgressFn>,
    ) -> Result<UploadResponse, TransportError>;
}

/// Pinning service endpoint
#[async_trait]
pub trait PinTransport: Send + Sync {
    async fn pin(&self, request: PinRequest) -> Result<PinStatus, TransportError>;

    async fn list_pins(&self, limit: usize) -> Result<PinListResponse, TransportError>;

    async fn remove_pin(&self, request_id: &str) -> Result<(), TransportError>;
}
