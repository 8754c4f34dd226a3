use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Response envelope produced by the backend for every REST endpoint.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

/// Envelope acknowledgement for endpoints that carry no data payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ack {
    pub message: Option<String>,
}

/// Payload of a successful login or registration.
#[derive(Clone, Debug, Deserialize)]
pub struct LoginData {
    pub token: String,
    #[serde(default)]
    pub user: JsonValue,
}

/// Request body for `/compile/start`.
#[derive(Clone, Debug, Serialize)]
pub struct CompileOptions {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_threads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_email_notification: Option<bool>,
}

impl CompileOptions {
    /// Builds the minimal compile request for a target device.
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: None,
            packages: Vec::new(),
            compile_threads: None,
            enable_email_notification: None,
        }
    }
}

/// Snapshot of the compile lifecycle, as reported by `/compile/status`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CompileStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Snapshot of the repository lifecycle, as reported by
/// `/repository/status`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RepositoryStatus {
    #[serde(default)]
    pub cloned: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// A compile target known to the backend device catalog.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Result page of `/devices/search`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeviceSearch {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub total: u64,
}

/// Generated build configuration for one device.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub config: String,
}

/// The two file collections the backend manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Firmware,
    Config,
}

impl FileKind {
    /// Path segment used by the `/files/<kind>/...` endpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            FileKind::Firmware => "firmware",
            FileKind::Config => "configs",
        }
    }
}

/// A firmware or config file listed by the backend.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Checksum validation result for a stored file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileValidation {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub md5_match: Option<bool>,
    #[serde(default)]
    pub sha256_match: Option<bool>,
}

/// Storage usage as reported by `/files/storage`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StorageInfo {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub free: u64,
}

/// A selectable build configuration template.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Result of a `/health` probe. Never an error: an unreachable backend is
/// reported as `healthy: false`.
#[derive(Clone, Debug)]
pub struct Health {
    pub healthy: bool,
    pub detail: Option<JsonValue>,
    pub error: Option<String>,
}
