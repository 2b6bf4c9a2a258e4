use anyhow::Result;
use base64::Engine;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use streaming_controller::api::{ApiConfig, ApiHandle, ApiServer};
use streaming_controller::transport::{DiscoveryRequest, GatewayError, OnboardingGateway};
use streaming_controller::{
    ControllerConfig, DeviceClass, DeviceRecord, FrameAcquirer, InMemoryDeviceDirectory,
    StreamController, StubBackend,
};

struct CannedGateway;

impl OnboardingGateway for CannedGateway {
    fn discover(&self, request: &DiscoveryRequest<'_>) -> Result<Value, GatewayError> {
        if request.host == "10.8.8.8" {
            std::thread::sleep(Duration::from_secs(3));
        }
        if request.host == "10.9.9.9" {
            return Err(GatewayError::Unreachable("connection refused".to_string()));
        }
        Ok(json!({
            "data": {
                "video_sources": {
                    "sources": [{"token": "VideoSourceToken1"}, {"VideoSourceToken": "VideoSourceToken2"}, "junk"]
                }
            }
        }))
    }
}

fn directory() -> InMemoryDeviceDirectory {
    InMemoryDeviceDirectory::new()
        .with_device(DeviceRecord {
            metadata: Some(json!({"rtsp_url": "stub://front?warmup=1&width=32&height=24"})),
            username: Some("viewer".to_string()),
            password: Some("pw".to_string()),
            ..DeviceRecord::new("cam-front", DeviceClass::Camera)
        })
        .with_device(DeviceRecord {
            host: Some("10.0.0.20".to_string()),
            username: Some("admin".to_string()),
            password: Some("nvrpass".to_string()),
            metadata: Some(json!({"cameras": [
                {"camera_id": "yard", "rtsp_url": "stub://yard"},
                {"camera_id": "gate", "rtsp_url": "stub://offline"}
            ]})),
            ..DeviceRecord::new("nvr-main", DeviceClass::Nvr)
        })
}

fn read_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(response.len());
    let headers = String::from_utf8_lossy(&response[..split]).to_string();
    let body = response.get(split + 4..).unwrap_or_default().to_vec();
    Ok((headers, body))
}

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        Self::with_config(ControllerConfig::default())
    }

    fn with_config(config: ControllerConfig) -> Result<Self> {
        let acquirer = FrameAcquirer::new(Arc::new(StubBackend), &config.capture);
        let controller = StreamController::new(
            &config,
            Arc::new(directory()),
            Arc::new(CannedGateway),
            acquirer,
        );
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            capture_workers: config.capture.workers,
            onboarding_workers: config.onboarding.workers,
        };
        let api_handle = ApiServer::new(api_config, Arc::new(controller)).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn post(&self, path: &str, body: &Value) -> Result<(String, Vec<u8>)> {
        post_to(self.handle().addr, path, body)
    }
}

fn post_to(addr: SocketAddr, path: &str, body: &Value) -> Result<(String, Vec<u8>)> {
    let payload = body.to_string();
    let mut stream = TcpStream::connect(addr)?;
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{payload}",
        payload.len()
    );
    stream.write_all(request.as_bytes())?;
    read_response(&mut stream)
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn detail(body: &[u8]) -> String {
    let value: Value = serde_json::from_slice(body).expect("json error body");
    value["detail"].as_str().unwrap_or_default().to_string()
}

#[test]
fn health_endpoint_responds() -> Result<()> {
    let api = TestApi::new()?;

    let mut stream = TcpStream::connect(api.handle().addr)?;
    stream.write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let (headers, body) = read_response(&mut stream)?;
    assert!(headers.contains("200 OK"));
    assert!(String::from_utf8_lossy(&body).contains(r#""status":"ok""#));

    Ok(())
}

#[test]
fn camera_frame_is_returned_as_jpeg() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = api.post(
        "/api/v1/stream/frame",
        &json!({"device_id": "cam-front", "device_type": "camera"}),
    )?;
    assert!(headers.contains("200 OK"), "{headers}");
    assert!(headers.contains("Content-Type: image/jpeg"));
    let frame = image::load_from_memory(&body)?;
    assert_eq!((frame.width(), frame.height()), (32, 24));

    Ok(())
}

#[test]
fn nvr_frame_is_returned_base64_encoded() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = api.post(
        "/api/v1/stream/frame/encoded",
        &json!({"device_id": "nvr-main", "device_type": "nvr", "camera_id": "yard"}),
    )?;
    assert!(headers.contains("200 OK"), "{headers}");
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["device_id"], "nvr-main");
    assert_eq!(value["camera_id"], "yard");
    let jpeg = base64::engine::general_purpose::STANDARD
        .decode(value["frame"].as_str().unwrap_or_default())?;
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    Ok(())
}

#[test]
fn frame_errors_carry_status_and_detail() -> Result<()> {
    let api = TestApi::new()?;

    let cases = [
        (json!({"device_id": "ghost", "device_type": "camera"}), "404 Not Found", "Device not found"),
        (json!({"device_id": "cam-front", "device_type": "doorbell"}), "400 Bad Request", "device_type"),
        (json!({"device_id": "nvr-main", "device_type": "nvr"}), "400 Bad Request", "camera_id"),
        (json!({"device_id": "nvr-main", "device_type": "nvr", "camera_id": "attic"}), "404 Not Found", "attic"),
        (json!({"device_id": "nvr-main", "device_type": "nvr", "camera_id": "gate"}), "502 Bad Gateway", "Failed to fetch frame from RTSP"),
    ];
    for (request, status, message) in cases {
        let (headers, body) = api.post("/api/v1/stream/frame", &request)?;
        assert!(headers.contains(status), "{request}: {headers}");
        assert!(detail(&body).contains(message), "{request}: {}", detail(&body));
    }

    Ok(())
}

#[test]
fn capabilities_are_normalized_per_device_class() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = api.post(
        "/api/v1/stream/capabilities",
        &json!({"device_id": "nvr-main", "ip": "10.0.0.20", "port": 8000}),
    )?;
    assert!(headers.contains("200 OK"), "{headers}");
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(
        value,
        json!({
            "device_id": "nvr-main",
            "device_type": "nvr",
            "camera_count": 2,
            "camera_id_sources": ["VideoSourceToken1", "VideoSourceToken2"]
        })
    );

    let (headers, body) = api.post(
        "/api/v1/stream/capabilities",
        &json!({"device_id": "cam-front", "ip": "10.0.0.21", "port": 80}),
    )?;
    assert!(headers.contains("200 OK"), "{headers}");
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value, json!({"device_id": "cam-front", "device_type": "camera"}));

    Ok(())
}

#[test]
fn capabilities_report_unreachable_onboarding_as_bad_gateway() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, body) = api.post(
        "/api/v1/stream/capabilities",
        &json!({"device_id": "cam-front", "ip": "10.9.9.9", "port": 80}),
    )?;
    assert!(headers.contains("502 Bad Gateway"), "{headers}");
    assert_eq!(detail(&body), "Failed to contact device_onboarding service");

    Ok(())
}

#[test]
fn malformed_and_misrouted_requests_are_rejected() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, _) = api.post("/api/v1/stream/frame", &json!({"device_type": "camera"}))?;
    assert!(headers.contains("400 Bad Request"), "{headers}");

    let mut stream = TcpStream::connect(api.handle().addr)?;
    stream.write_all(b"GET /api/v1/stream/frame HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let (headers, _) = read_response(&mut stream)?;
    assert!(headers.contains("405 Method Not Allowed"), "{headers}");

    let mut stream = TcpStream::connect(api.handle().addr)?;
    stream.write_all(b"GET /events HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let (headers, _) = read_response(&mut stream)?;
    assert!(headers.contains("404 Not Found"), "{headers}");

    let mut stream = TcpStream::connect(api.handle().addr)?;
    stream.write_all(
        b"POST /api/v1/stream/frame HTTP/1.1\r\nHost: localhost\r\nContent-Length: 1048576\r\n\r\n",
    )?;
    let (headers, _) = read_response(&mut stream)?;
    assert!(headers.contains("413 Payload Too Large"), "{headers}");

    Ok(())
}

#[test]
fn timed_out_probes_do_not_stall_frame_requests() -> Result<()> {
    let mut config = ControllerConfig::default();
    config.capture.workers = 1;
    config.onboarding.workers = 1;
    config.onboarding.timeout = Duration::from_millis(500);
    let api = TestApi::with_config(config)?;
    let addr = api.handle().addr;

    let probes: Vec<_> = (0..6)
        .map(|_| {
            std::thread::spawn(move || {
                post_to(
                    addr,
                    "/api/v1/stream/capabilities",
                    &json!({"device_id": "cam-front", "ip": "10.8.8.8", "port": 80}),
                )
            })
        })
        .collect();
    for probe in probes {
        let (headers, _) = probe.join().expect("probe client thread")?;
        assert!(headers.contains("502 Bad Gateway"), "{headers}");
    }

    let started = Instant::now();
    let (headers, _) = api.post(
        "/api/v1/stream/frame",
        &json!({"device_id": "cam-front", "device_type": "camera"}),
    )?;
    assert!(headers.contains("200 OK"), "{headers}");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "frame request waited {:?}",
        started.elapsed()
    );

    Ok(())
}

#[test]
fn dropping_the_handle_stops_the_server() -> Result<()> {
    let config = ControllerConfig::default();
    let acquirer = FrameAcquirer::new(Arc::new(StubBackend), &config.capture);
    let controller = StreamController::new(
        &config,
        Arc::new(directory()),
        Arc::new(CannedGateway),
        acquirer,
    );
    let api_config = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        ..ApiConfig::default()
    };
    let handle = ApiServer::new(api_config, Arc::new(controller)).spawn()?;
    let addr = handle.addr;
    drop(handle);

    assert!(TcpStream::connect(addr).is_err());
    Ok(())
}
