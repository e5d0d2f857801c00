//! Persistent host settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use voxbridge_core::recognizer::{RecognizerOptions, INT16_GAIN};
use voxbridge_core::{CaptureConfig, WorkerConfig};

pub const MODEL_REF_ENV: &str = "VOXBRIDGE_MODEL_REF";
pub const STORAGE_DIR_ENV: &str = "VOXBRIDGE_STORAGE_DIR";

const MIN_BUFFER_SIZE: usize = 256;
const MAX_BUFFER_SIZE: usize = 16_384;
const MAX_CALL_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Model directory to cache and load.
    pub model_ref: String,
    /// Cache root; empty means next to the settings file.
    pub storage_dir: Option<PathBuf>,
    pub preferred_input_device: Option<String>,
    pub buffer_size: usize,
    pub input_gain: f32,
    pub allow_downsampling: bool,
    /// Timeout for `start`/`stop`; 0 waits indefinitely.
    pub call_timeout_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_ref: WorkerConfig::default().model_ref,
            storage_dir: None,
            preferred_input_device: None,
            buffer_size: voxbridge_core::capture::DEFAULT_BUFFER_SIZE,
            input_gain: INT16_GAIN,
            allow_downsampling: true,
            call_timeout_ms: 0,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.model_ref = self.model_ref.trim().to_string();
        if self.model_ref.is_empty() {
            self.model_ref = WorkerConfig::default().model_ref;
        }
        self.storage_dir = self
            .storage_dir
            .take()
            .filter(|dir| !dir.as_os_str().is_empty());
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.buffer_size = normalize_buffer_size(self.buffer_size);
        if !self.input_gain.is_finite() || self.input_gain <= 0.0 {
            self.input_gain = INT16_GAIN;
        }
        self.input_gain = self.input_gain.clamp(1.0, 65_536.0);
        self.call_timeout_ms = self.call_timeout_ms.min(MAX_CALL_TIMEOUT_MS);
    }

    /// Let the environment override the model and cache location.
    pub fn apply_env_overrides(&mut self) {
        if let Some(model_ref) = non_empty_env(MODEL_REF_ENV) {
            self.model_ref = model_ref;
        }
        if let Some(dir) = non_empty_env(STORAGE_DIR_ENV) {
            self.storage_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn storage_root(&self, settings_path: &Path) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            settings_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("models")
        })
    }

    pub fn worker_config(&self, settings_path: &Path) -> WorkerConfig {
        WorkerConfig {
            model_ref: self.model_ref.clone(),
            storage_root: self.storage_root(settings_path),
            allow_downsampling: self.allow_downsampling,
        }
    }

    pub fn recognizer_options(&self) -> RecognizerOptions {
        RecognizerOptions {
            capture: CaptureConfig {
                buffer_size: self.buffer_size,
                channels: 1,
                preferred_device: self.preferred_input_device.clone(),
            },
            gain: self.input_gain,
            call_timeout: (self.call_timeout_ms > 0)
                .then(|| Duration::from_millis(self.call_timeout_ms)),
        }
    }
}

/// Nearest power of two inside the supported buffer range.
pub fn normalize_buffer_size(raw: usize) -> usize {
    let clamped = raw.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
    if clamped.is_power_of_two() {
        return clamped;
    }
    let up = clamped.next_power_of_two();
    let down = up / 2;
    if clamped - down <= up - clamped {
        down
    } else {
        up.min(MAX_BUFFER_SIZE)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("VoxBridge")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("voxbridge")
            .join("settings.json")
    }
}

/// Read settings, falling back to defaults for a missing or corrupt file.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| match serde_json::from_str::<AppSettings>(&raw) {
            Ok(settings) => Some(settings),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring unreadable settings: {e}");
                None
            }
        })
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
