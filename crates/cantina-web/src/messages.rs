use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use cantina_core::payloads::LogEntry;

/// Per-service entry in the dashboard's aggregated status map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub status: String,
    pub last_update: String,
}

/// Dashboard-facing track record (`/api/music/library` rows use it too).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration: f32,
    pub file: String,
}

/// Dashboard-facing music status, re-validated before broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicStatusMessage {
    pub action: String,
    #[serde(default)]
    pub track: Option<TrackInfo>,
}

/// Dashboard-facing progress, re-validated before broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicProgressMessage {
    pub track_name: String,
    pub position: f32,
    pub duration: f32,
    pub progress: f32,
}

impl MusicProgressMessage {
    /// Progress outside [0, 1] marks a malformed payload.
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.progress) && self.position >= 0.0 && self.duration >= 0.0
    }
}

/// Outbound socket messages, tagged by kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Raw mirrored bus event for subscribed dashboards
    CantinaEvent {
        topic: String,
        payload: serde_json::Value,
    },
    ServiceStatusUpdate {
        services: BTreeMap<String, ServiceSnapshot>,
    },
    TranscriptionUpdate {
        text: String,
        is_final: bool,
    },
    VoiceStatus {
        status: String,
    },
    MusicStatus(MusicStatusMessage),
    MusicProgress(MusicProgressMessage),
    MusicQueue {
        queued: Option<String>,
    },
    DjStatus {
        active: bool,
    },
    LlmResponse {
        text: String,
        is_complete: bool,
    },
    SystemError {
        service: String,
        message: String,
    },
    SystemLog(LogEntry),
    CommandAck {
        command: String,
    },
    CommandError {
        command: String,
        message: String,
        validation_errors: Vec<String>,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            "{\"type\":\"system_error\",\"service\":\"web_bridge\",\"message\":\"serialization failure\"}"
                .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_snake_case_tags() {
        let msg = ServerMessage::VoiceStatus {
            status: "idle".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["type"], "voice_status");
        assert_eq!(json["status"], "idle");
    }

    #[test]
    fn progress_validation_rejects_out_of_range() {
        let good = MusicProgressMessage {
            track_name: "Cantina Band".into(),
            position: 10.0,
            duration: 180.0,
            progress: 0.05,
        };
        assert!(good.is_valid());

        let bad = MusicProgressMessage {
            progress: 1.4,
            ..good
        };
        assert!(!bad.is_valid());
    }

    #[test]
    fn command_error_lists_field_reasons() {
        let msg = ServerMessage::CommandError {
            command: "music_command".into(),
            message: "validation failed".into(),
            validation_errors: vec!["volume_level: must be within [0.0, 1.0]".into()],
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["validation_errors"][0], "volume_level: must be within [0.0, 1.0]");
    }
}
