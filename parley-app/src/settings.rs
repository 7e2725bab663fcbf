//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_core::{EngineConfig, ResamplerKind};
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws/interview";
const DEFAULT_API_BASE: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub endpoint: String,
    pub api_base: String,
    pub preferred_input_device: Option<String>,
    pub resampler: ResamplerKind,
    pub frame_size: usize,
    pub turn_release_margin_ms: u64,
    pub final_turn_grace_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            api_base: DEFAULT_API_BASE.into(),
            preferred_input_device: None,
            resampler: ResamplerKind::Nearest,
            frame_size: 4096,
            turn_release_margin_ms: 800,
            final_turn_grace_ms: 5_000,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.endpoint = normalize_endpoint(&self.endpoint);
        self.api_base = normalize_api_base(&self.api_base);
        self.frame_size = self.frame_size.clamp(256, 16_384);
        self.turn_release_margin_ms = self.turn_release_margin_ms.clamp(100, 5_000);
        self.final_turn_grace_ms = self.final_turn_grace_ms.min(60_000);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Apply `PARLEY_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PARLEY_ENDPOINT") {
            self.endpoint = v;
        }
        if let Some(v) = lookup("PARLEY_API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = lookup("PARLEY_INPUT_DEVICE") {
            self.preferred_input_device = Some(v);
        }
        if let Some(v) = lookup("PARLEY_RESAMPLER") {
            match v.trim().to_ascii_lowercase().as_str() {
                "nearest" => self.resampler = ResamplerKind::Nearest,
                "rubato" => self.resampler = ResamplerKind::Rubato,
                other => tracing::warn!("ignoring unknown PARLEY_RESAMPLER '{other}'"),
            }
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            endpoint: self.endpoint.clone(),
            api_base: self.api_base.clone(),
            frame_size: self.frame_size,
            resampler: self.resampler,
            turn_release_margin: Duration::from_millis(self.turn_release_margin_ms),
            final_turn_grace: Duration::from_millis(self.final_turn_grace_ms),
            preferred_input_device: self.preferred_input_device.clone(),
            ..EngineConfig::default()
        }
    }
}

/// Channel endpoints must be `ws`/`wss`. Bare hosts get `ws://`; `http(s)`
/// is mapped to the matching WebSocket scheme.
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_ENDPOINT.into();
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("ws://{trimmed}")
    };
    let Ok(mut url) = Url::parse(&with_scheme) else {
        return with_scheme;
    };
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return url.into(),
    };
    if url.set_scheme(scheme).is_err() {
        return with_scheme;
    }
    url.into()
}

pub fn normalize_api_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_API_BASE.into();
    }
    if let Some(rest) = trimmed.strip_prefix("wss://") {
        return format!("https://{rest}");
    }
    if let Some(rest) = trimmed.strip_prefix("ws://") {
        return format!("http://{rest}");
    }
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Parley")
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
            .join("parley")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_schemes_are_fixed_up() {
        assert_eq!(
            normalize_endpoint("http://api.example.com/ws/interview"),
            "ws://api.example.com/ws/interview"
        );
        assert_eq!(
            normalize_endpoint(" https://api.example.com/ws "),
            "wss://api.example.com/ws"
        );
        assert_eq!(
            normalize_endpoint("localhost:8000/ws/interview"),
            "ws://localhost:8000/ws/interview"
        );
        assert_eq!(normalize_endpoint(""), DEFAULT_ENDPOINT);
    }

    #[test]
    fn api_base_loses_trailing_slash_and_ws_scheme() {
        assert_eq!(normalize_api_base("https://api.example.com/"), "https://api.example.com");
        assert_eq!(normalize_api_base("wss://api.example.com"), "https://api.example.com");
        assert_eq!(normalize_api_base("localhost:8000"), "http://localhost:8000");
    }

    #[test]
    fn normalize_clamps_tuning_and_trims_device() {
        let mut s = AppSettings {
            frame_size: 3,
            turn_release_margin_ms: 0,
            final_turn_grace_ms: 1_000_000,
            preferred_input_device: Some("   ".into()),
            ..AppSettings::default()
        };
        s.normalize();
        assert_eq!(s.frame_size, 256);
        assert_eq!(s.turn_release_margin_ms, 100);
        assert_eq!(s.final_turn_grace_ms, 60_000);
        assert_eq!(s.preferred_input_device, None);
    }

    #[test]
    fn missing_or_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        assert_eq!(load_settings(&path), AppSettings::default());

        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"endpoint":"http://interview.local/ws","resampler":"rubato"}"#,
        )
        .unwrap();
        let s = load_settings(&path);
        assert_eq!(s.endpoint, "ws://interview.local/ws");
        assert_eq!(s.resampler, ResamplerKind::Rubato);
        assert_eq!(s.turn_release_margin_ms, 800);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut s = AppSettings {
            preferred_input_device: Some("USB Microphone".into()),
            final_turn_grace_ms: 2_500,
            ..AppSettings::default()
        };
        s.normalize();
        save_settings(&path, &s).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"preferredInputDevice\""));
        assert_eq!(load_settings(&path), s);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut s = AppSettings::default();
        s.apply_env_overrides(|key| match key {
            "PARLEY_ENDPOINT" => Some("https://prod.example.com/ws".into()),
            "PARLEY_RESAMPLER" => Some("Rubato".into()),
            _ => None,
        });
        s.normalize();
        assert_eq!(s.endpoint, "wss://prod.example.com/ws");
        assert_eq!(s.resampler, ResamplerKind::Rubato);
        assert_eq!(s.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn engine_config_carries_tuning() {
        let s = AppSettings {
            turn_release_margin_ms: 1_200,
            ..AppSettings::default()
        };
        let config = s.engine_config();
        assert_eq!(config.turn_release_margin, Duration::from_millis(1_200));
        assert_eq!(config.target_sample_rate, 16_000);
    }
}
