//! Endpoint health checks

use anyhow::Result;

use crate::client::HttpTransport;
use crate::traits::PinTransport;

/// Reachability of the two configured endpoints
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub gateway: Result<u16, String>,
    pub pin_service: Result<(), String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.gateway.is_ok() && self.pin_service.is_ok()
    }
}

/// Any HTTP answer from the gateway counts as reachable; gateways commonly
/// reject bare GETs on the API root.
pub async fn check_gateway(transport: &HttpTransport) -> Result<u16> {
    let response = transport
        .client()
        .get(transport.upload_url())
        .timeout(transport.timeout())
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("gateway health check failed: {e}"))?;
    Ok(response.status().as_u16())
}

/// Listing a single pin is the lightest authenticated call
pub async fn check_pin_service(transport: &HttpTransport) -> Result<()> {
    transport
        .list_pins(1)
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("pin service health check failed: {e}"))
}

pub async fn check_health(transport: &HttpTransport) -> HealthReport {
    let (gateway, pin_service) =
        tokio::join!(check_gateway(transport), check_pin_service(transport));
    HealthReport {
        gateway: gateway.map_err(|e| e.to_string()),
        pin_service: pin_service.map_err(|e| e.to_string()),
    }
}
