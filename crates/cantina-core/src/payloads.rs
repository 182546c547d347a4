use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::command::Command;
use crate::llm::ToolCall;
use crate::mode::{SystemMode, TransitionStatus};
use crate::service::ServiceStatus;
use crate::topics::EventTopic;

/// Wire/schema revision stamped into every envelope.
pub const SCHEMA_VERSION: &str = "1.0";

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Seconds since epoch as floating point.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Immutable event envelope published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Process-wide monotonically unique id
    pub id: u64,
    /// Seconds since epoch
    pub timestamp: f64,
    /// Groups related events across a single voice turn
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub schema_version: String,
    pub topic: EventTopic,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(topic: EventTopic, payload: EventPayload) -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            timestamp: now_timestamp(),
            conversation_id: None,
            schema_version: SCHEMA_VERSION.to_string(),
            topic,
            payload,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Tagged payload variants, one per topic family.
///
/// Validation happens at the ingress edges; internal handlers consume these
/// records without re-parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Signal-only topics (shutdown request, mic control)
    Empty,
    ServiceStatus(ServiceStatusPayload),
    ModeRequest { mode: SystemMode },
    ModeTransition(ModeTransitionPayload),
    ModeChange { old_mode: SystemMode, new_mode: SystemMode },
    Command(Command),
    CliResponse { message: String, is_error: bool },
    AudioChunk { samples: Vec<i16>, timestamp_ms: u64 },
    Transcript { text: String },
    ListeningStopped { transcript: String },
    LlmResponse(LlmResponsePayload),
    Intent(IntentPayload),
    TtsRequest { text: String },
    SynthesisAmplitude { level: f32 },
    MusicCommand(MusicCommandPayload),
    PlaybackStarted {
        track: Track,
        duration: f32,
        start_timestamp: f64,
    },
    PlaybackStopped { track_name: Option<String> },
    Progress(ProgressPayload),
    Library { tracks: Vec<Track> },
    DjCommand(DjCommandPayload),
    DjMode { active: bool },
    EyeCommand(EyeCommandPayload),
    CommandTrace {
        command: String,
        service: String,
        execution_time_ms: f64,
        status: String,
    },
    Metric(MetricPayload),
    Log(LogEntry),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatusPayload {
    pub service: String,
    pub status: ServiceStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeTransitionPayload {
    pub old_mode: SystemMode,
    pub new_mode: SystemMode,
    #[serde(flatten)]
    pub status: TransitionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponsePayload {
    pub text: String,
    pub is_complete: bool,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentPayload {
    pub intent_name: String,
    pub parameters: serde_json::Value,
    pub original_text: String,
}

/// Music library entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub path: PathBuf,
    pub duration_seconds: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicAction {
    Play,
    Pause,
    Resume,
    Stop,
    Next,
    Queue,
    Volume,
    List,
    Install,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicCommandPayload {
    pub action: MusicAction,
    #[serde(default)]
    pub song_query: Option<String>,
    /// Volume in [0.0, 1.0] for the volume action
    #[serde(default)]
    pub volume: Option<f32>,
    /// Source directory for the install action
    #[serde(default)]
    pub install_dir: Option<String>,
}

impl MusicCommandPayload {
    pub fn action(action: MusicAction) -> Self {
        Self {
            action,
            song_query: None,
            volume: None,
            install_dir: None,
        }
    }

    pub fn play(song_query: impl Into<String>) -> Self {
        Self {
            action: MusicAction::Play,
            song_query: Some(song_query.into()),
            volume: None,
            install_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub track_name: String,
    pub position: f32,
    pub duration: f32,
    /// Fraction of the track elapsed, in [0, 1]
    pub progress: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DjAction {
    Start,
    Stop,
    Next,
    UpdateSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DjCommandPayload {
    pub action: DjAction,
    #[serde(default)]
    pub auto_transition: Option<bool>,
    #[serde(default)]
    pub transition_duration: Option<f32>,
    #[serde(default)]
    pub genre_preference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeCommandPayload {
    pub pattern: String,
    #[serde(default)]
    pub color: Option<String>,
    pub intensity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub component: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Structured log entry for the ring buffer, session file and dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: f64,
    pub level: LogLevel,
    pub service: String,
    pub message: String,
    pub session_id: String,
    pub entry_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub service: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_monotonic() {
        let a = Event::new(EventTopic::SystemStartup, EventPayload::Empty);
        let b = Event::new(EventTopic::SystemStartup, EventPayload::Empty);
        assert!(b.id > a.id);
    }

    #[test]
    fn envelope_serializes_with_tagged_payload() {
        let event = Event::new(
            EventTopic::MusicCommand,
            EventPayload::MusicCommand(MusicCommandPayload::play("cantina band")),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["kind"], "music_command");
        assert_eq!(json["payload"]["song_query"], "cantina band");
        assert_eq!(json["schema_version"], SCHEMA_VERSION);
    }

    #[test]
    fn transition_status_flattens_into_payload() {
        let payload = ModeTransitionPayload {
            old_mode: SystemMode::Idle,
            new_mode: SystemMode::Interactive,
            status: TransitionStatus::Failed {
                reason: "subscriber timed out".into(),
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "subscriber timed out");
    }

    #[test]
    fn conversation_id_rides_the_envelope() {
        let event = Event::new(
            EventTopic::IntentDetected,
            EventPayload::Intent(IntentPayload {
                intent_name: "play_music".into(),
                parameters: serde_json::json!({"track": "Cantina Band"}),
                original_text: String::new(),
            }),
        )
        .with_conversation("turn-1");
        assert_eq!(event.conversation_id.as_deref(), Some("turn-1"));
    }
}
