//! Request orchestration for the two inbound operations.
//!
//! Frame: directory lookup -> endpoint resolution -> capture.
//! Capabilities: directory lookup -> onboarding probe -> normalization.
//!
//! Every blocking collaborator call runs on the blocking pool so the
//! request-handling runtime never waits on sqlite, decoding or HTTP.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::capture::FrameAcquirer;
use crate::config::ControllerConfig;
use crate::device::{DeviceClass, DeviceRecord};
use crate::discovery::{normalize, DiscoverySummary};
use crate::error::{Result, StreamError};
use crate::resolve::EndpointResolver;
use crate::storage::DeviceDirectory;
use crate::transport::{DiscoveryRequest, GatewayError, OnboardingGateway};

const CAPTURE_FAILED: &str = "Failed to fetch frame from RTSP";
const ONBOARDING_FAILED: &str = "Failed to contact device_onboarding service";

#[derive(Clone, Debug, Deserialize)]
pub struct FrameRequest {
    pub device_id: String,
    pub device_type: String,
    #[serde(default)]
    pub camera_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CapabilitiesRequest {
    pub device_id: String,
    pub ip: String,
    pub port: u16,
}

/// JPEG bytes plus the identifiers they were captured for.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub device_id: String,
    pub camera_id: Option<String>,
    pub jpeg: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EncodedFrame {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    /// Base64 JPEG.
    pub frame: String,
}

impl CapturedFrame {
    pub fn encoded(&self) -> EncodedFrame {
        EncodedFrame {
            device_id: self.device_id.clone(),
            camera_id: self.camera_id.clone(),
            frame: base64::engine::general_purpose::STANDARD.encode(&self.jpeg),
        }
    }
}

pub struct StreamController {
    directory: Arc<dyn DeviceDirectory>,
    onboarding: Arc<dyn OnboardingGateway>,
    resolver: EndpointResolver,
    acquirer: FrameAcquirer,
    probe_slots: Arc<Semaphore>,
    onboarding_timeout: Duration,
}

impl StreamController {
    pub fn new(
        config: &ControllerConfig,
        directory: Arc<dyn DeviceDirectory>,
        onboarding: Arc<dyn OnboardingGateway>,
        acquirer: FrameAcquirer,
    ) -> Self {
        Self {
            directory,
            onboarding,
            resolver: EndpointResolver::new(config.nvr.clone()),
            acquirer,
            probe_slots: Arc::new(Semaphore::new(config.onboarding.workers.max(1))),
            onboarding_timeout: config.onboarding.timeout,
        }
    }

    pub async fn frame(&self, request: &FrameRequest) -> Result<CapturedFrame> {
        let device = self.fetch_device(&request.device_id).await?;
        let declared: DeviceClass = request
            .device_type
            .parse()
            .map_err(|_| StreamError::BadRequest("device_type must be 'camera' or 'nvr'".into()))?;
        let camera_id = request.camera_id.as_deref();

        let uri = self.resolver.resolve(&device, declared, camera_id)?;

        match self.acquirer.acquire(uri).await {
            Ok(jpeg) => Ok(CapturedFrame {
                device_id: device.device_id,
                camera_id: request.camera_id.clone(),
                jpeg,
            }),
            Err(err) => {
                match camera_id {
                    Some(camera_id) => log::error!(
                        "Failed to grab frame for NVR {} camera {}: {}",
                        device.device_id,
                        camera_id,
                        err
                    ),
                    None => log::error!(
                        "Failed to grab frame for camera {}: {}",
                        device.device_id,
                        err
                    ),
                }
                Err(StreamError::Upstream(CAPTURE_FAILED.to_string()))
            }
        }
    }

    pub async fn capabilities(&self, request: &CapabilitiesRequest) -> Result<DiscoverySummary> {
        let device = self.fetch_device(&request.device_id).await?;
        let (username, password) = device
            .credentials()
            .map(|(user, pass)| (user.to_string(), pass.to_string()))
            .ok_or_else(|| StreamError::BadRequest("Device credentials not available".into()))?;

        if request.port != crate::transport::ONVIF_HTTP_PORT {
            log::debug!(
                "capability probe for {} ignores requested port {}",
                device.device_id,
                request.port
            );
        }

        let gateway = self.onboarding.clone();
        let host = request.ip.clone();
        let slots = self.probe_slots.clone();
        // Waiting for a slot counts against the timeout; the permit stays with
        // the worker until the blocking call returns.
        let probe = async move {
            let permit = slots
                .acquire_owned()
                .await
                .map_err(|_| GatewayError::Unreachable("onboarding pool closed".to_string()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                gateway.discover(&DiscoveryRequest::onvif(&host, &username, &password))
            })
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?
        };
        let outcome = match tokio::time::timeout(self.onboarding_timeout, probe).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::Timeout(self.onboarding_timeout)),
        };

        match outcome {
            Ok(payload) => Ok(normalize(&device.device_id, device.device_class, &payload)),
            Err(err) => {
                if err.is_unreachable() {
                    log::error!(
                        "device_onboarding request failed for {}: {}",
                        device.device_id,
                        err
                    );
                } else {
                    log::error!(
                        "Unexpected error calling device_onboarding for {}: {}",
                        device.device_id,
                        err
                    );
                }
                Err(StreamError::Upstream(ONBOARDING_FAILED.to_string()))
            }
        }
    }

    async fn fetch_device(&self, device_id: &str) -> Result<DeviceRecord> {
        let directory = self.directory.clone();
        let id = device_id.to_string();
        let lookup = tokio::task::spawn_blocking(move || directory.get_device(&id))
            .await
            .map_err(|e| StreamError::Internal(format!("device lookup worker failed: {}", e)))?;
        match lookup {
            Ok(Some(device)) => Ok(device),
            Ok(None) => Err(StreamError::NotFound("Device not found".to_string())),
            Err(err) => {
                log::error!("device directory lookup for {} failed: {:#}", device_id, err);
                Err(StreamError::Internal("Device directory unavailable".to_string()))
            }
        }
    }
}
