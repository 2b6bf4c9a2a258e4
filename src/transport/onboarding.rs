//! Client for the device onboarding service's capability probe.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::OnboardingSettings;

/// Devices are always probed over ONVIF on the standard HTTP port.
pub const ONVIF_HTTP_PORT: u16 = 80;
const CAMERA_TYPE_ONVIF: &str = "onvif";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("onboarding service unreachable: {0}")]
    Unreachable(String),
    #[error("onboarding service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("onboarding service returned an unreadable body: {0}")]
    InvalidResponse(String),
    #[error("onboarding request timed out after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    /// Transport-level failures, as opposed to the service answering badly.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, GatewayError::Unreachable(_) | GatewayError::Timeout(_))
    }
}

#[derive(Debug, Serialize)]
pub struct DiscoveryRequest<'a> {
    pub camera_type: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub password: &'a str,
}

impl<'a> DiscoveryRequest<'a> {
    pub fn onvif(host: &'a str, username: &'a str, password: &'a str) -> Self {
        Self {
            camera_type: CAMERA_TYPE_ONVIF,
            host,
            port: ONVIF_HTTP_PORT,
            username,
            password,
        }
    }
}

pub trait OnboardingGateway: Send + Sync {
    /// Run a capability probe and return the raw payload. Blocks.
    fn discover(&self, request: &DiscoveryRequest<'_>) -> Result<Value, GatewayError>;
}

pub struct HttpOnboardingGateway {
    url: String,
    agent: ureq::Agent,
}

impl HttpOnboardingGateway {
    pub fn new(settings: &OnboardingSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.timeout)
            .build();
        Self {
            url: settings.url.clone(),
            agent,
        }
    }
}

impl OnboardingGateway for HttpOnboardingGateway {
    fn discover(&self, request: &DiscoveryRequest<'_>) -> Result<Value, GatewayError> {
        let response = match self.agent.post(&self.url).send_json(request) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                log::error!("device_onboarding returned non-200: {} - {}", status, body);
                return Err(GatewayError::Status { status, body });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(GatewayError::Unreachable(transport.to_string()));
            }
        };
        if response.status() != 200 {
            let status = response.status();
            let body = response.into_string().unwrap_or_default();
            log::error!("device_onboarding returned non-200: {} - {}", status, body);
            return Err(GatewayError::Status { status, body });
        }
        response
            .into_json::<Value>()
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}
