//! Streaming controller
//!
//! Serves single JPEG frames from registered cameras and NVR sub-cameras,
//! and normalizes capability probes run by the device onboarding service.
//!
//! # Module Structure
//!
//! - `device`: registry record types (DeviceClass, DeviceRecord)
//! - `storage`: device directory (sqlite and in-memory)
//! - `resolve`: device record + optional sub-camera id -> stream URI
//! - `capture`: single-frame acquisition and JPEG encoding
//! - `discovery`: capability payload normalization
//! - `transport`: outbound onboarding service client
//! - `service`: request orchestration (StreamController)
//! - `api`: HTTP surface

pub mod api;
pub mod capture;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod resolve;
pub mod service;
pub mod storage;
pub mod transport;

pub use capture::{CaptureBackend, CaptureError, DefaultCaptureBackend, FrameAcquirer, StubBackend};
pub use config::ControllerConfig;
pub use device::{DeviceClass, DeviceRecord};
pub use discovery::DiscoverySummary;
pub use error::StreamError;
pub use resolve::{EndpointResolver, ResolveError};
pub use service::{CapabilitiesRequest, CapturedFrame, EncodedFrame, FrameRequest, StreamController};
pub use storage::{DeviceDirectory, InMemoryDeviceDirectory, SqliteDeviceDirectory};
pub use transport::{HttpOnboardingGateway, OnboardingGateway};
