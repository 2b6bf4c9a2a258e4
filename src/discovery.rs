//! Capability discovery normalization.
//!
//! The onboarding service returns whatever its ONVIF probe produced. Only the
//! list of video source tokens is of interest, and discovery data is advisory:
//! anything that does not look like `data.video_sources.sources[*]` is
//! treated as "no sources" instead of an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::DeviceClass;

const SOURCES_POINTER: &str = "/data/video_sources/sources";
const SOURCE_ID_FIELDS: [&str; 2] = ["token", "VideoSourceToken"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "device_type", rename_all = "lowercase")]
pub enum DiscoverySummary {
    Camera {
        device_id: String,
    },
    Nvr {
        device_id: String,
        camera_count: usize,
        camera_id_sources: Vec<String>,
    },
}

impl DiscoverySummary {
    pub fn device_id(&self) -> &str {
        match self {
            DiscoverySummary::Camera { device_id } | DiscoverySummary::Nvr { device_id, .. } => {
                device_id
            }
        }
    }
}

/// Video source identifiers in upstream order. Duplicates are kept.
pub fn source_tokens(payload: &Value) -> Vec<String> {
    let Some(sources) = payload.pointer(SOURCES_POINTER) else {
        log::debug!("discovery payload has no {}", SOURCES_POINTER);
        return Vec::new();
    };
    let Some(sources) = sources.as_array() else {
        log::warn!("discovery payload {} is not a list", SOURCES_POINTER);
        return Vec::new();
    };

    sources
        .iter()
        .filter_map(|source| {
            let source = source.as_object()?;
            SOURCE_ID_FIELDS.iter().find_map(|field| {
                source
                    .get(*field)
                    .and_then(Value::as_str)
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
            })
        })
        .collect()
}

pub fn normalize(device_id: &str, class: DeviceClass, payload: &Value) -> DiscoverySummary {
    match class {
        DeviceClass::Camera => DiscoverySummary::Camera {
            device_id: device_id.to_string(),
        },
        DeviceClass::Nvr => {
            let camera_id_sources = source_tokens(payload);
            DiscoverySummary::Nvr {
                device_id: device_id.to_string(),
                camera_count: camera_id_sources.len(),
                camera_id_sources,
            }
        }
    }
}
