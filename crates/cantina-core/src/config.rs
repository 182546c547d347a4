use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{CantinaError, Result};
use crate::payloads::LogLevel;

/// Microphone capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device index; `None` picks the system default
    pub device_index: Option<usize>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per capture block
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            sample_rate: 16_000,
            channels: 1,
            block_size: 1_024,
        }
    }
}

/// Transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Wait after session close so in-flight final segments arrive
    pub flush_interval_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 250,
        }
    }
}

/// LLM turn settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    /// Approximate token budget for conversation memory
    pub max_tokens: usize,
    pub max_messages: usize,
    pub streaming: bool,
    pub rate_limit_per_minute: usize,
    /// Reset conversation memory at the start of every utterance
    pub reset_on_turn: bool,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 4_000,
            max_messages: 20,
            streaming: true,
            rate_limit_per_minute: 50,
            reset_on_turn: true,
            system_prompt: "You are DJ R3X, an upbeat droid DJ. Keep replies short and in character."
                .to_string(),
        }
    }
}

/// Music library and playback settings. Volumes are 0-100 integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicConfig {
    pub directory: PathBuf,
    /// Extra directories scanned when the primary one is empty or missing
    pub fallback_dirs: Vec<PathBuf>,
    pub normal_volume: u8,
    pub ducking_volume: u8,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./music"),
            fallback_dirs: vec![PathBuf::from("./assets/music"), PathBuf::from("./audio")],
            normal_volume: 70,
            ducking_volume: 30,
        }
    }
}

/// Dashboard bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Logging capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub session_dir: PathBuf,
    pub dedup_window_secs: u64,
    /// Circuit-breaker ceiling in records per second
    pub max_records_per_sec: u32,
    pub ring_capacity: usize,
    pub file_queue_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            session_dir: PathBuf::from("./logs"),
            dedup_window_secs: 30,
            max_records_per_sec: 50,
            ring_capacity: 1_000,
            file_queue_capacity: 10_000,
        }
    }
}

/// Mode manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Scheduler sleep around state mutation so subscribers observe
    /// transitions in order
    pub grace_period_ms: u64,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 100,
        }
    }
}

/// Debug service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub default_level: LogLevel,
    pub component_levels: HashMap<String, LogLevel>,
    pub trace_enabled: bool,
    pub metrics_enabled: bool,
    /// Per-metric warn ceilings, keyed by metric name
    pub metric_thresholds: HashMap<String, f64>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
            component_levels: HashMap::new(),
            trace_enabled: true,
            metrics_enabled: true,
            metric_thresholds: HashMap::new(),
        }
    }
}

/// Whole-runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub music: MusicConfig,
    pub web: WebConfig,
    pub logging: LoggingConfig,
    pub mode: ModeConfig,
    pub debug: DebugConfig,
}

impl AppConfig {
    /// Get the default config directory path
    pub fn default_config_dir() -> Result<PathBuf> {
        directories::ProjectDirs::from("io", "cantina-os", "CantinaOS")
            .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
            .ok_or_else(|| CantinaError::Config("Failed to get config directory".to_string()))
    }

    pub fn default_config_file() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join("config.toml"))
    }

    /// Load config from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CantinaError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Environment-sourced vendor secrets. All three are required at startup.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub stt_api_key: String,
    pub llm_api_key: String,
    pub tts_api_key: String,
}

impl Secrets {
    pub const STT_VAR: &'static str = "DEEPGRAM_API_KEY";
    pub const LLM_VAR: &'static str = "OPENAI_API_KEY";
    pub const TTS_VAR: &'static str = "ELEVENLABS_API_KEY";

    pub fn from_env() -> Result<Self> {
        let read = |var: &str| {
            std::env::var(var)
                .map_err(|_| CantinaError::Config(format!("missing required env var {var}")))
        };
        Ok(Self {
            stt_api_key: read(Self::STT_VAR)?,
            llm_api_key: read(Self::LLM_VAR)?,
            tts_api_key: read(Self::TTS_VAR)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capture_contract() {
        let config = AppConfig::default();
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.music.normal_volume, 70);
        assert_eq!(config.music.ducking_volume, 30);
        assert_eq!(config.mode.grace_period_ms, 100);
        assert_eq!(config.logging.dedup_window_secs, 30);
        assert!(config.llm.reset_on_turn);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.web.port = 9001;
        config.llm.rate_limit_per_minute = 10;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.web.port, 9001);
        assert_eq!(loaded.llm.rate_limit_per_minute, 10);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[web]\nport = 8123\n").unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.web.port, 8123);
        assert_eq!(loaded.audio.sample_rate, 16_000);
    }
}
