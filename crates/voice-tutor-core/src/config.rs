//! Client configuration.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Default realtime endpoint.
pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Default realtime model.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

/// Settings for one voice client.
///
/// Every field has a default, so partial config files are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Signaling endpoint; the model is appended as a query parameter.
    pub realtime_url: String,
    pub model: String,
    /// Credential endpoint returning `{"client_secret": {"value": ...}}`.
    pub token_url: String,
    /// Label of the event data channel.
    pub channel_label: String,
    /// Model used for input audio transcription.
    pub transcription_model: String,
    /// Name of the shared transcript slot.
    pub storage_key: String,
    /// Maximum number of raw events kept in memory.
    pub log_capacity: usize,
    pub analysis_interval_secs: u64,
    /// Chat-completion-compatible endpoint used for transcript analysis.
    pub analysis_url: String,
    pub analysis_model: String,
    pub analysis_instructions: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            token_url: "http://127.0.0.1:3000/token".to_string(),
            channel_label: "oai-events".to_string(),
            transcription_model: "whisper-1".to_string(),
            storage_key: "transcript".to_string(),
            log_capacity: crate::event_log::DEFAULT_LOG_CAPACITY,
            analysis_interval_secs: 30,
            analysis_url: "http://127.0.0.1:3000/analyze".to_string(),
            analysis_model: "gpt-4o-mini".to_string(),
            analysis_instructions: DEFAULT_ANALYSIS_INSTRUCTIONS.to_string(),
        }
    }
}

const DEFAULT_ANALYSIS_INSTRUCTIONS: &str = "You are helping a parent follow their child's \
tutoring session. Summarize in a few sentences what the child is working on, how they are \
progressing, and anything the parent should step in to help with.";

impl RealtimeConfig {
    #[must_use]
    pub const fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_secs)
    }

    /// Signaling URL including the model query parameter.
    #[must_use]
    pub fn signaling_url(&self) -> String {
        format!("{}?model={}", self.realtime_url, self.model)
    }

    /// Apply `VOICE_TUTOR_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fields: [(&str, &mut String); 4] = [
            ("VOICE_TUTOR_REALTIME_URL", &mut self.realtime_url),
            ("VOICE_TUTOR_MODEL", &mut self.model),
            ("VOICE_TUTOR_TOKEN_URL", &mut self.token_url),
            ("VOICE_TUTOR_ANALYSIS_URL", &mut self.analysis_url),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = value;
            }
        }
        self
    }
}

/// Default config file location (`<config dir>/voice-tutor/config.json`).
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voice-tutor")
        .join("config.json")
}

/// Load configuration, falling back to defaults if the file is missing or
/// unparseable. Environment overrides are applied last.
#[must_use]
pub fn load_config(path: Option<&Path>) -> RealtimeConfig {
    let path = path.map_or_else(default_config_path, Path::to_path_buf);

    let config = match fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "Invalid config, using defaults: {e}");
            RealtimeConfig::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => RealtimeConfig::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to read config, using defaults: {e}");
            RealtimeConfig::default()
        }
    };

    config.with_env_overrides()
}
