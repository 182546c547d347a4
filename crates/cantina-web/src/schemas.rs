use serde::{Deserialize, Serialize};

use cantina_core::payloads::{
    DjAction, DjCommandPayload, EventPayload, MusicAction, MusicCommandPayload,
};
use cantina_core::{Command, EventTopic, SystemMode};

/// Inbound dashboard messages, tagged by kind.
///
/// Every kind validates against its own schema before anything touches
/// the bus; a failed validation is answered on the socket and goes no
/// further.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    VoiceCommand(VoiceCommand),
    MusicCommand(MusicCommand),
    DjCommand(DjCommand),
    SystemCommand(SystemCommand),
    SubscribeEvents {
        #[serde(default)]
        events: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceAction {
    Start,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceCommand {
    pub action: VoiceAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebMusicAction {
    Play,
    Pause,
    Resume,
    Stop,
    Next,
    Queue,
    Volume,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MusicCommand {
    pub action: WebMusicAction,
    #[serde(default)]
    pub track_name: Option<String>,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub volume_level: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebDjAction {
    Start,
    Stop,
    Next,
    UpdateSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DjCommand {
    pub action: WebDjAction,
    #[serde(default)]
    pub auto_transition: Option<bool>,
    #[serde(default)]
    pub transition_duration: Option<f32>,
    #[serde(default)]
    pub genre_preference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSystemAction {
    SetMode,
    Restart,
    RefreshConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemCommand {
    pub action: WebSystemAction,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub restart_delay: Option<f32>,
}

/// Field-level reasons collected during validation.
pub type ValidationErrors = Vec<String>;

impl MusicCommand {
    fn validate(&self) -> ValidationErrors {
        let mut errors = Vec::new();
        match self.action {
            WebMusicAction::Play | WebMusicAction::Queue => {
                let query = self
                    .track_name
                    .as_deref()
                    .or(self.track_id.as_deref())
                    .unwrap_or("");
                if query.trim().is_empty() {
                    errors.push("track_name: required for play/queue".to_string());
                } else if query.len() > 200 {
                    errors.push("track_name: too long (max 200 characters)".to_string());
                }
            }
            WebMusicAction::Volume => match self.volume_level {
                None => errors.push("volume_level: required for volume action".to_string()),
                Some(level) if !(0.0..=1.0).contains(&level) => {
                    errors.push("volume_level: must be within [0.0, 1.0]".to_string())
                }
                Some(_) => {}
            },
            _ => {}
        }
        errors
    }
}

impl DjCommand {
    fn validate(&self) -> ValidationErrors {
        let mut errors = Vec::new();
        if let Some(duration) = self.transition_duration {
            if !(1.0..=30.0).contains(&duration) {
                errors.push("transition_duration: must be within [1.0, 30.0] seconds".to_string());
            }
        }
        if let Some(genre) = &self.genre_preference {
            if genre.len() > 50 {
                errors.push("genre_preference: too long (max 50 characters)".to_string());
            }
        }
        errors
    }
}

impl SystemCommand {
    fn validate(&self) -> ValidationErrors {
        let mut errors = Vec::new();
        match self.action {
            WebSystemAction::SetMode => match self.mode.as_deref() {
                None => errors.push("mode: required for set_mode action".to_string()),
                Some(mode) => {
                    let parsed = mode.parse::<SystemMode>();
                    match parsed {
                        Ok(SystemMode::Startup) | Err(_) => errors.push(format!(
                            "mode: must be one of IDLE, AMBIENT, INTERACTIVE (got '{mode}')"
                        )),
                        Ok(_) => {}
                    }
                }
            },
            WebSystemAction::Restart => {
                if let Some(delay) = self.restart_delay {
                    if !(0.0..=60.0).contains(&delay) {
                        errors.push("restart_delay: must be within [0.0, 60.0] seconds".to_string());
                    }
                }
            }
            WebSystemAction::RefreshConfig => {}
        }
        errors
    }
}

impl ClientMessage {
    /// Validate and translate into the internal events this command
    /// produces. `Err` carries field-level reasons and means nothing may
    /// reach the bus.
    pub fn to_events(&self) -> Result<Vec<(EventTopic, EventPayload)>, ValidationErrors> {
        match self {
            ClientMessage::VoiceCommand(cmd) => Ok(vec![match cmd.action {
                VoiceAction::Start => (EventTopic::MicRecordingStart, EventPayload::Empty),
                VoiceAction::Stop => (EventTopic::MicRecordingStop, EventPayload::Empty),
            }]),
            ClientMessage::MusicCommand(cmd) => {
                let errors = cmd.validate();
                if !errors.is_empty() {
                    return Err(errors);
                }
                let query = cmd
                    .track_name
                    .clone()
                    .or_else(|| cmd.track_id.clone());
                let payload = match cmd.action {
                    WebMusicAction::Play => MusicCommandPayload {
                        action: MusicAction::Play,
                        song_query: query,
                        volume: None,
                        install_dir: None,
                    },
                    WebMusicAction::Queue => MusicCommandPayload {
                        action: MusicAction::Queue,
                        song_query: query,
                        volume: None,
                        install_dir: None,
                    },
                    WebMusicAction::Volume => MusicCommandPayload {
                        action: MusicAction::Volume,
                        song_query: None,
                        volume: cmd.volume_level,
                        install_dir: None,
                    },
                    WebMusicAction::Pause => MusicCommandPayload::action(MusicAction::Pause),
                    WebMusicAction::Resume => MusicCommandPayload::action(MusicAction::Resume),
                    WebMusicAction::Stop => MusicCommandPayload::action(MusicAction::Stop),
                    WebMusicAction::Next => MusicCommandPayload::action(MusicAction::Next),
                };
                Ok(vec![(
                    EventTopic::MusicCommand,
                    EventPayload::MusicCommand(payload),
                )])
            }
            ClientMessage::DjCommand(cmd) => {
                let errors = cmd.validate();
                if !errors.is_empty() {
                    return Err(errors);
                }
                Ok(vec![match cmd.action {
                    WebDjAction::Next => (EventTopic::DjNextTrack, EventPayload::Empty),
                    WebDjAction::Start | WebDjAction::Stop | WebDjAction::UpdateSettings => {
                        let action = match cmd.action {
                            WebDjAction::Start => DjAction::Start,
                            WebDjAction::Stop => DjAction::Stop,
                            _ => DjAction::UpdateSettings,
                        };
                        (
                            EventTopic::DjCommand,
                            EventPayload::DjCommand(DjCommandPayload {
                                action,
                                auto_transition: cmd.auto_transition,
                                transition_duration: cmd.transition_duration,
                                genre_preference: cmd.genre_preference.clone(),
                            }),
                        )
                    }
                }])
            }
            ClientMessage::SystemCommand(cmd) => {
                let errors = cmd.validate();
                if !errors.is_empty() {
                    return Err(errors);
                }
                Ok(match cmd.action {
                    WebSystemAction::SetMode => {
                        let mode = cmd
                            .mode
                            .as_deref()
                            .and_then(|m| m.parse::<SystemMode>().ok());
                        match mode {
                            Some(mode) => vec![(
                                EventTopic::SystemSetModeRequest,
                                EventPayload::ModeRequest { mode },
                            )],
                            None => Vec::new(),
                        }
                    }
                    WebSystemAction::Restart => {
                        vec![(EventTopic::SystemShutdown, EventPayload::Empty)]
                    }
                    WebSystemAction::RefreshConfig => vec![(
                        EventTopic::CliCommand,
                        EventPayload::Command(Command::new("refresh_config", "refresh_config")),
                    )],
                })
            }
            ClientMessage::SubscribeEvents { .. } => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ClientMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn music_play_translates_to_music_command() {
        let msg = parse(r#"{"type": "music_command", "action": "play", "track_name": "Cantina Band"}"#);
        let events = msg.to_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EventTopic::MusicCommand);
        match &events[0].1 {
            EventPayload::MusicCommand(cmd) => {
                assert_eq!(cmd.action, MusicAction::Play);
                assert_eq!(cmd.song_query.as_deref(), Some("Cantina Band"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn volume_bounds_are_enforced() {
        let ok = parse(r#"{"type": "music_command", "action": "volume", "volume_level": 1.0}"#);
        assert!(ok.to_events().is_ok());
        let ok = parse(r#"{"type": "music_command", "action": "volume", "volume_level": 0.0}"#);
        assert!(ok.to_events().is_ok());

        let bad = parse(r#"{"type": "music_command", "action": "volume", "volume_level": 1.01}"#);
        let errors = bad.to_events().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("volume_level")));

        let missing = parse(r#"{"type": "music_command", "action": "volume"}"#);
        assert!(missing.to_events().is_err());
    }

    #[test]
    fn transition_duration_bounds_are_enforced() {
        for duration in ["1.0", "30.0"] {
            let msg = parse(&format!(
                r#"{{"type": "dj_command", "action": "update_settings", "transition_duration": {duration}}}"#
            ));
            assert!(msg.to_events().is_ok(), "duration {duration} should pass");
        }
        for duration in ["0.9", "30.1"] {
            let msg = parse(&format!(
                r#"{{"type": "dj_command", "action": "update_settings", "transition_duration": {duration}}}"#
            ));
            let errors = msg.to_events().unwrap_err();
            assert!(errors.iter().any(|e| e.contains("transition_duration")));
        }
    }

    #[test]
    fn set_mode_accepts_only_runtime_modes() {
        let msg = parse(r#"{"type": "system_command", "action": "set_mode", "mode": "INTERACTIVE"}"#);
        let events = msg.to_events().unwrap();
        assert_eq!(events[0].0, EventTopic::SystemSetModeRequest);

        let startup =
            parse(r#"{"type": "system_command", "action": "set_mode", "mode": "STARTUP"}"#);
        assert!(startup.to_events().is_err());

        let unknown = parse(r#"{"type": "system_command", "action": "set_mode", "mode": "PARTY"}"#);
        assert!(unknown.to_events().is_err());

        let missing = parse(r#"{"type": "system_command", "action": "set_mode"}"#);
        assert!(missing.to_events().is_err());
    }

    #[test]
    fn restart_delay_bounds_are_enforced() {
        let ok = parse(r#"{"type": "system_command", "action": "restart", "restart_delay": 60.0}"#);
        assert!(ok.to_events().is_ok());
        let bad = parse(r#"{"type": "system_command", "action": "restart", "restart_delay": 61.0}"#);
        assert!(bad.to_events().is_err());
    }

    #[test]
    fn voice_commands_map_to_capture_control() {
        let start = parse(r#"{"type": "voice_command", "action": "start"}"#);
        assert_eq!(
            start.to_events().unwrap()[0].0,
            EventTopic::MicRecordingStart
        );
        let stop = parse(r#"{"type": "voice_command", "action": "stop"}"#);
        assert_eq!(stop.to_events().unwrap()[0].0, EventTopic::MicRecordingStop);
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type": "voice_command", "action": "shout"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn genre_preference_length_is_capped() {
        let long = "x".repeat(51);
        let msg = parse(&format!(
            r#"{{"type": "dj_command", "action": "update_settings", "genre_preference": "{long}"}}"#
        ));
        assert!(msg.to_events().is_err());
    }
}
