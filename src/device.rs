//! Device records as stored in the device directory.
//!
//! The controller only ever reads these; mutation is limited to the
//! `device_admin` tool through the sqlite directory.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Class of a registered streaming device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// A single IP camera with one stream.
    Camera,
    /// A multi-camera unit multiplexing several sub-cameras.
    Nvr,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Camera => "camera",
            DeviceClass::Nvr => "nvr",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "camera" => Ok(DeviceClass::Camera),
            "nvr" => Ok(DeviceClass::Nvr),
            other => Err(anyhow!(
                "device_type must be 'camera' or 'nvr', got '{}'",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub device_class: DeviceClass,
    /// Network address of the device (IP or hostname).
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Stream metadata; shape depends on class and on when the device was registered.
    pub metadata: Option<serde_json::Value>,
}

impl DeviceRecord {
    pub fn new(device_id: impl Into<String>, device_class: DeviceClass) -> Self {
        Self {
            device_id: device_id.into(),
            device_class,
            host: None,
            port: None,
            username: None,
            password: None,
            metadata: None,
        }
    }

    /// Stored credential pair, only when both halves are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}
