//! Endpoint resolution.
//!
//! Maps a stored device record plus an optional sub-camera identifier onto a
//! concrete RTSP connection URI. Device metadata has been written in several
//! shapes over time, so it is first parsed into [`StreamMetadata`] and only
//! then resolved:
//!
//! - camera: `{"rtsp_url": "rtsp://..."}`
//! - nvr, sub-camera records: `[{"camera_id": "...", "rtsp_url": "..."}]` or
//!   `{"cameras": [...]}`
//! - nvr, bare tokens: `["VideoSourceToken1", ...]` or `{"tokens": [...]}`.
//!   No URI is stored; one is synthesized from the device address.

use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::config::NvrSettings;
use crate::device::{DeviceClass, DeviceRecord};

pub const DEFAULT_CHANNEL: &str = "01";
const TOKEN_SEPARATOR: &str = "Token";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("device_type mismatch with stored device (declared {declared}, stored {stored})")]
    ClassMismatch {
        declared: DeviceClass,
        stored: DeviceClass,
    },
    #[error("camera_id is required for nvr devices")]
    MissingSubCamera,
    #[error("Invalid meta_data format for {0}")]
    MalformedMetadata(DeviceClass),
    #[error("RTSP url not found in meta_data")]
    MissingStreamUri,
    #[error("RTSP url not found for camera_id {0} in meta_data")]
    SubCameraNotFound(String),
    #[error("device has no network address to build a channel url")]
    MissingAddress,
    #[error("device address {0} does not form a valid stream url")]
    InvalidAddress(String),
}

impl ResolveError {
    /// Unknown sub-cameras are missing resources; everything else is bad input.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::SubCameraNotFound(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCamera {
    pub camera_id: String,
    pub rtsp_url: Option<String>,
}

/// Device metadata after boundary parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMetadata {
    Direct { rtsp_url: String },
    SubCameras(Vec<SubCamera>),
    Tokens(Vec<String>),
}

impl StreamMetadata {
    pub fn parse(class: DeviceClass, meta: Option<&Value>) -> Result<Self, ResolveError> {
        let meta = meta.ok_or(ResolveError::MalformedMetadata(class))?;
        match class {
            DeviceClass::Camera => {
                let map = meta
                    .as_object()
                    .ok_or(ResolveError::MalformedMetadata(class))?;
                let rtsp_url =
                    non_empty_str(map, "rtsp_url").ok_or(ResolveError::MissingStreamUri)?;
                Ok(StreamMetadata::Direct {
                    rtsp_url: rtsp_url.to_string(),
                })
            }
            DeviceClass::Nvr => match meta {
                Value::Array(entries) => Ok(parse_nvr_list(entries)),
                Value::Object(map) => {
                    if let Some(Value::Array(cameras)) = map.get("cameras") {
                        return Ok(StreamMetadata::SubCameras(sub_cameras(cameras)));
                    }
                    if let Some(Value::Array(tokens)) = map.get("tokens") {
                        return Ok(StreamMetadata::Tokens(string_entries(tokens)));
                    }
                    Err(ResolveError::MalformedMetadata(class))
                }
                _ => Err(ResolveError::MalformedMetadata(class)),
            },
        }
    }
}

fn parse_nvr_list(entries: &[Value]) -> StreamMetadata {
    if !entries.is_empty() && entries.iter().all(Value::is_string) {
        StreamMetadata::Tokens(string_entries(entries))
    } else {
        StreamMetadata::SubCameras(sub_cameras(entries))
    }
}

fn sub_cameras(entries: &[Value]) -> Vec<SubCamera> {
    entries
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|entry| {
            let camera_id = entry.get("camera_id")?.as_str()?;
            Some(SubCamera {
                camera_id: camera_id.to_string(),
                rtsp_url: non_empty_str(entry, "rtsp_url").map(str::to_string),
            })
        })
        .collect()
}

fn string_entries(entries: &[Value]) -> Vec<String> {
    entries
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

/// Channel number addressed by an ONVIF video source token.
///
/// `VideoSourceToken3` -> `03`, `VideoSourceToken` -> `01`.
pub fn channel_from_token(token: &str) -> String {
    token
        .rsplit_once(TOKEN_SEPARATOR)
        .map(|(_, suffix)| suffix)
        .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
        .map(|suffix| format!("{:0>2}", suffix))
        .unwrap_or_else(|| DEFAULT_CHANNEL.to_string())
}

pub struct EndpointResolver {
    nvr: NvrSettings,
}

impl EndpointResolver {
    pub fn new(nvr: NvrSettings) -> Self {
        Self { nvr }
    }

    /// Resolve the RTSP URI for `record`.
    ///
    /// The declared class and the presence of `sub_camera_id` are checked
    /// before the metadata is looked at.
    pub fn resolve(
        &self,
        record: &DeviceRecord,
        declared: DeviceClass,
        sub_camera_id: Option<&str>,
    ) -> Result<String, ResolveError> {
        if declared != record.device_class {
            return Err(ResolveError::ClassMismatch {
                declared,
                stored: record.device_class,
            });
        }
        let sub_camera_id = sub_camera_id.filter(|id| !id.is_empty());
        if declared == DeviceClass::Nvr && sub_camera_id.is_none() {
            return Err(ResolveError::MissingSubCamera);
        }

        let metadata = StreamMetadata::parse(declared, record.metadata.as_ref())?;
        match (metadata, sub_camera_id) {
            (StreamMetadata::Direct { rtsp_url }, _) => Ok(rtsp_url),
            (StreamMetadata::SubCameras(cameras), Some(id)) => cameras
                .into_iter()
                .find(|camera| camera.camera_id == id)
                .and_then(|camera| camera.rtsp_url)
                .ok_or_else(|| ResolveError::SubCameraNotFound(id.to_string())),
            (StreamMetadata::Tokens(tokens), Some(id)) => {
                if !tokens.iter().any(|token| token == id) {
                    return Err(ResolveError::SubCameraNotFound(id.to_string()));
                }
                self.channel_url(record, id)
            }
            (_, None) => Err(ResolveError::MissingSubCamera),
        }
    }

    /// Build a unicast channel URI for a token-only NVR sub-camera.
    ///
    /// The two-digit channel is written twice (`channels/0303`). That matches
    /// the NVRs this was deployed against but has not been confirmed against
    /// other firmware.
    fn channel_url(&self, record: &DeviceRecord, token: &str) -> Result<String, ResolveError> {
        let host = record
            .host
            .as_deref()
            .filter(|host| !host.is_empty())
            .ok_or(ResolveError::MissingAddress)?;
        let (username, password) = record.credentials().unwrap_or((
            self.nvr.default_username.as_str(),
            self.nvr.default_password.as_str(),
        ));
        let port = record.port.unwrap_or(self.nvr.rtsp_port);
        let channel = channel_from_token(token);
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]", host)
        } else {
            host.to_string()
        };
        let invalid = || ResolveError::InvalidAddress(host.clone());
        let mut url = Url::parse(&format!(
            "rtsp://{}:{}/Streaming/Unicast/channels/{}{}",
            host, port, channel, channel
        ))
        .map_err(|_| invalid())?;
        // Userinfo setters percent-encode reserved characters in stored credentials.
        url.set_username(username).map_err(|_| invalid())?;
        url.set_password(Some(password)).map_err(|_| invalid())?;
        Ok(url.to_string())
    }
}

/// Strip userinfo from a connection URI before it is logged.
pub fn redact_uri(uri: &str) -> String {
    match Url::parse(uri) {
        Ok(mut url) => {
            if !url.username().is_empty() || url.password().is_some() {
                let _ = url.set_username("***");
                let _ = url.set_password(None);
            }
            url.to_string()
        }
        Err(_) => "<unparseable uri>".to_string(),
    }
}
