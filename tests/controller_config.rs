use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use streaming_controller::config::ControllerConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "STREAMING_CONFIG",
        "STREAMING_DB_PATH",
        "STREAMING_API_ADDR",
        "SERVICE_DEVICE_ONBOARDING_URL",
        "STREAMING_ONBOARDING_TIMEOUT_SECS",
        "STREAMING_ONBOARDING_WORKERS",
        "STREAMING_CAPTURE_ATTEMPTS",
        "STREAMING_CAPTURE_WORKERS",
        "STREAMING_JPEG_QUALITY",
        "STREAMING_CAPTURE_READ_TIMEOUT_MS",
        "STREAMING_NVR_DEFAULT_USERNAME",
        "STREAMING_NVR_DEFAULT_PASSWORD",
        "STREAMING_NVR_RTSP_PORT",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ControllerConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "streaming_controller.db");
    assert_eq!(
        cfg.onboarding.url,
        "http://localhost:8001/api/v1/cameras/capabilities"
    );
    assert_eq!(cfg.capture.max_attempts, 5);
    assert_eq!(cfg.onboarding.workers, 2);
    assert_eq!(cfg.nvr.default_username, "admin");
    assert_eq!(cfg.nvr.default_password, "admin");
    assert_eq!(cfg.nvr.rtsp_port, 554);
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "db_path": "devices_prod.db",
            "api": { "addr": "0.0.0.0:9100" },
            "onboarding": {
                "url": "http://onboarding:8001/api/v1/cameras/capabilities",
                "timeout_secs": 7,
                "workers": 3
            },
            "capture": {
                "max_attempts": 9,
                "workers": 2,
                "jpeg_quality": 75
            },
            "nvr": { "default_username": "operator" }
        }"#,
    );

    std::env::set_var("STREAMING_CONFIG", file.path());
    std::env::set_var("STREAMING_CAPTURE_WORKERS", "6");
    std::env::set_var("STREAMING_NVR_DEFAULT_PASSWORD", "s3cret");

    let cfg = ControllerConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "devices_prod.db");
    assert_eq!(cfg.api_addr, "0.0.0.0:9100");
    assert_eq!(
        cfg.onboarding.url,
        "http://onboarding:8001/api/v1/cameras/capabilities"
    );
    assert_eq!(cfg.onboarding.timeout, Duration::from_secs(7));
    assert_eq!(cfg.onboarding.workers, 3);
    assert_eq!(cfg.capture.max_attempts, 9);
    assert_eq!(cfg.capture.workers, 6);
    assert_eq!(cfg.capture.jpeg_quality, 75);
    assert_eq!(cfg.nvr.default_username, "operator");
    assert_eq!(cfg.nvr.default_password, "s3cret");

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
db_path = "devices.db"

[capture]
read_timeout_ms = 500

[nvr]
rtsp_port = 8554
"#,
    );
    std::env::set_var("STREAMING_CONFIG", file.path());

    let cfg = ControllerConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "devices.db");
    assert_eq!(cfg.capture.read_timeout, Duration::from_millis(500));
    assert_eq!(cfg.nvr.rtsp_port, 8554);

    clear_env();
}

#[test]
fn onboarding_url_comes_from_service_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var(
        "SERVICE_DEVICE_ONBOARDING_URL",
        "https://onboarding.internal/api/v1/cameras/capabilities",
    );
    let cfg = ControllerConfig::load().expect("load config");
    assert_eq!(
        cfg.onboarding.url,
        "https://onboarding.internal/api/v1/cameras/capabilities"
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("SERVICE_DEVICE_ONBOARDING_URL", "ftp://onboarding/probe"),
        ("STREAMING_CAPTURE_ATTEMPTS", "0"),
        ("STREAMING_CAPTURE_WORKERS", "many"),
        ("STREAMING_JPEG_QUALITY", "0"),
        ("STREAMING_ONBOARDING_TIMEOUT_SECS", "0"),
        ("STREAMING_ONBOARDING_WORKERS", "0"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            ControllerConfig::load().is_err(),
            "{key}={value} should be rejected"
        );
    }

    clear_env();
}

#[test]
fn rejects_malformed_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(".json", "{ not json");
    std::env::set_var("STREAMING_CONFIG", file.path());
    let err = ControllerConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}
