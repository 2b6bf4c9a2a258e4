use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

const DEFAULT_DB_PATH: &str = "streaming_controller.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_ONBOARDING_URL: &str = "http://localhost:8001/api/v1/cameras/capabilities";
const DEFAULT_ONBOARDING_TIMEOUT_SECS: u64 = 20;
const DEFAULT_CAPTURE_ATTEMPTS: u32 = 5;
const DEFAULT_CAPTURE_WORKERS: usize = 4;
const DEFAULT_ONBOARDING_WORKERS: usize = 2;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_CAPTURE_READ_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_NVR_USERNAME: &str = "admin";
const DEFAULT_NVR_PASSWORD: &str = "admin";
pub const DEFAULT_RTSP_PORT: u16 = 554;

#[derive(Debug, Deserialize, Default)]
struct ControllerConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    onboarding: Option<OnboardingConfigFile>,
    capture: Option<CaptureConfigFile>,
    nvr: Option<NvrConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OnboardingConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
    workers: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    max_attempts: Option<u32>,
    workers: Option<usize>,
    jpeg_quality: Option<u8>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct NvrConfigFile {
    default_username: Option<String>,
    default_password: Option<String>,
    rtsp_port: Option<u16>,
}

/// Process-wide settings, built once at startup and handed to constructors.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub db_path: String,
    pub api_addr: String,
    pub onboarding: OnboardingSettings,
    pub capture: CaptureSettings,
    pub nvr: NvrSettings,
}

#[derive(Debug, Clone)]
pub struct OnboardingSettings {
    pub url: String,
    pub timeout: Duration,
    /// Concurrent capability probes. A probe that outlives its request keeps its slot.
    pub workers: usize,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Frames read before giving up on a stream that has not warmed up.
    pub max_attempts: u32,
    /// Concurrent capture slots.
    pub workers: usize,
    pub jpeg_quality: u8,
    /// Upper bound for a single frame read on a live backend.
    pub read_timeout: Duration,
}

/// Fallbacks used when synthesizing channel URIs for token-only NVR metadata.
#[derive(Debug, Clone)]
pub struct NvrSettings {
    pub default_username: String,
    pub default_password: String,
    pub rtsp_port: u16,
}

impl Default for OnboardingSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_ONBOARDING_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_ONBOARDING_TIMEOUT_SECS),
            workers: DEFAULT_ONBOARDING_WORKERS,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CAPTURE_ATTEMPTS,
            workers: DEFAULT_CAPTURE_WORKERS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            read_timeout: Duration::from_millis(DEFAULT_CAPTURE_READ_TIMEOUT_MS),
        }
    }
}

impl Default for NvrSettings {
    fn default() -> Self {
        Self {
            default_username: DEFAULT_NVR_USERNAME.to_string(),
            default_password: DEFAULT_NVR_PASSWORD.to_string(),
            rtsp_port: DEFAULT_RTSP_PORT,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            api_addr: DEFAULT_API_ADDR.to_string(),
            onboarding: OnboardingSettings::default(),
            capture: CaptureSettings::default(),
            nvr: NvrSettings::default(),
        }
    }
}

impl ControllerConfig {
    /// Load from the file named by `STREAMING_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STREAMING_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ControllerConfigFile) -> Self {
        let defaults = Self::default();
        let onboarding = file.onboarding.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let nvr = file.nvr.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or(defaults.db_path),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or(defaults.api_addr),
            onboarding: OnboardingSettings {
                url: onboarding.url.unwrap_or(defaults.onboarding.url),
                timeout: onboarding
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.onboarding.timeout),
                workers: onboarding.workers.unwrap_or(defaults.onboarding.workers),
            },
            capture: CaptureSettings {
                max_attempts: capture
                    .max_attempts
                    .unwrap_or(defaults.capture.max_attempts),
                workers: capture.workers.unwrap_or(defaults.capture.workers),
                jpeg_quality: capture
                    .jpeg_quality
                    .unwrap_or(defaults.capture.jpeg_quality),
                read_timeout: capture
                    .read_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.capture.read_timeout),
            },
            nvr: NvrSettings {
                default_username: nvr
                    .default_username
                    .unwrap_or(defaults.nvr.default_username),
                default_password: nvr
                    .default_password
                    .unwrap_or(defaults.nvr.default_password),
                rtsp_port: nvr.rtsp_port.unwrap_or(defaults.nvr.rtsp_port),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("STREAMING_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = env_string("STREAMING_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(url) = env_string("SERVICE_DEVICE_ONBOARDING_URL") {
            self.onboarding.url = url;
        }
        if let Some(secs) = env_parsed::<u64>("STREAMING_ONBOARDING_TIMEOUT_SECS")? {
            self.onboarding.timeout = Duration::from_secs(secs);
        }
        if let Some(workers) = env_parsed::<usize>("STREAMING_ONBOARDING_WORKERS")? {
            self.onboarding.workers = workers;
        }
        if let Some(attempts) = env_parsed::<u32>("STREAMING_CAPTURE_ATTEMPTS")? {
            self.capture.max_attempts = attempts;
        }
        if let Some(workers) = env_parsed::<usize>("STREAMING_CAPTURE_WORKERS")? {
            self.capture.workers = workers;
        }
        if let Some(quality) = env_parsed::<u8>("STREAMING_JPEG_QUALITY")? {
            self.capture.jpeg_quality = quality;
        }
        if let Some(ms) = env_parsed::<u64>("STREAMING_CAPTURE_READ_TIMEOUT_MS")? {
            self.capture.read_timeout = Duration::from_millis(ms);
        }
        if let Some(username) = env_string("STREAMING_NVR_DEFAULT_USERNAME") {
            self.nvr.default_username = username;
        }
        if let Some(password) = env_string("STREAMING_NVR_DEFAULT_PASSWORD") {
            self.nvr.default_password = password;
        }
        if let Some(port) = env_parsed::<u16>("STREAMING_NVR_RTSP_PORT")? {
            self.nvr.rtsp_port = port;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.onboarding.url)
            .with_context(|| format!("invalid onboarding url '{}'", self.onboarding.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "onboarding url must use http or https, got '{}'",
                url.scheme()
            ));
        }
        if self.onboarding.timeout.is_zero() {
            return Err(anyhow!("onboarding timeout must be greater than zero"));
        }
        if self.onboarding.workers == 0 {
            return Err(anyhow!("onboarding workers must be at least 1"));
        }
        if self.capture.max_attempts == 0 {
            return Err(anyhow!("capture max_attempts must be at least 1"));
        }
        if self.capture.workers == 0 {
            return Err(anyhow!("capture workers must be at least 1"));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if self.capture.read_timeout.is_zero() {
            return Err(anyhow!("capture read timeout must be greater than zero"));
        }
        if self.nvr.rtsp_port == 0 {
            return Err(anyhow!("nvr rtsp_port must be non-zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ControllerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        None => Ok(None),
    }
}
