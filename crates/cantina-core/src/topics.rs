use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed enumeration of every bus topic.
///
/// Canonical form is lowercase dotted. Producers and consumers refer to
/// topics symbolically; the string form only appears at the web boundary
/// and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    // System lifecycle
    SystemStartup,
    SystemShutdown,
    SystemSetModeRequest,
    SystemModeChange,
    SystemError,

    // Service lifecycle
    ServiceStatusUpdate,

    // CLI
    CliCommand,
    CliResponse,

    // Mode transitions
    ModeTransitionStarted,
    ModeTransitionComplete,

    // Microphone control and raw audio
    MicRecordingStart,
    MicRecordingStop,
    AudioRawChunk,

    // Voice session lifecycle
    VoiceListeningStarted,
    VoiceListeningStopped,
    VoiceProcessingComplete,
    VoiceError,

    // Transcription
    TranscriptionInterim,
    TranscriptionFinal,
    TranscriptionError,

    // LLM
    LlmResponse,
    LlmProcessingStarted,
    LlmProcessingEnded,
    LlmMemoryReset,
    IntentDetected,

    // Speech synthesis
    TtsRequest,
    SpeechSynthesisStarted,
    SpeechSynthesisAmplitude,
    SpeechSynthesisCompleted,
    SpeechSynthesisEnded,

    // Music
    MusicCommand,
    MusicPlaybackStarted,
    MusicPlaybackStopped,
    MusicProgress,
    MusicLibraryUpdated,
    TrackEnded,

    // DJ mode
    DjCommand,
    DjNextTrack,
    DjModeChanged,

    // Peripherals
    EyeCommand,

    // Debug / metrics
    DebugCommand,
    DebugCommandTrace,
    PerformanceMetric,

    // Dashboard
    DashboardLog,
}

impl EventTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::SystemStartup => "system.lifecycle.startup",
            EventTopic::SystemShutdown => "system.lifecycle.shutdown",
            EventTopic::SystemSetModeRequest => "system.set_mode.request",
            EventTopic::SystemModeChange => "system.mode.change",
            EventTopic::SystemError => "system.error",
            EventTopic::ServiceStatusUpdate => "service.status.update",
            EventTopic::CliCommand => "cli.command",
            EventTopic::CliResponse => "cli.response",
            EventTopic::ModeTransitionStarted => "mode.transition.started",
            EventTopic::ModeTransitionComplete => "mode.transition.complete",
            EventTopic::MicRecordingStart => "mic.recording.start",
            EventTopic::MicRecordingStop => "mic.recording.stop",
            EventTopic::AudioRawChunk => "audio.raw.chunk",
            EventTopic::VoiceListeningStarted => "voice.listening.started",
            EventTopic::VoiceListeningStopped => "voice.listening.stopped",
            EventTopic::VoiceProcessingComplete => "voice.processing.complete",
            EventTopic::VoiceError => "voice.error",
            EventTopic::TranscriptionInterim => "transcription.interim",
            EventTopic::TranscriptionFinal => "transcription.final",
            EventTopic::TranscriptionError => "transcription.error",
            EventTopic::LlmResponse => "llm.response",
            EventTopic::LlmProcessingStarted => "llm.processing.started",
            EventTopic::LlmProcessingEnded => "llm.processing.ended",
            EventTopic::LlmMemoryReset => "llm.memory.reset",
            EventTopic::IntentDetected => "intent.detected",
            EventTopic::TtsRequest => "tts.request",
            EventTopic::SpeechSynthesisStarted => "speech.synthesis.started",
            EventTopic::SpeechSynthesisAmplitude => "speech.synthesis.amplitude",
            EventTopic::SpeechSynthesisCompleted => "speech.synthesis.completed",
            EventTopic::SpeechSynthesisEnded => "speech.synthesis.ended",
            EventTopic::MusicCommand => "music.command",
            EventTopic::MusicPlaybackStarted => "music.playback.started",
            EventTopic::MusicPlaybackStopped => "music.playback.stopped",
            EventTopic::MusicProgress => "music.progress",
            EventTopic::MusicLibraryUpdated => "music.library.updated",
            EventTopic::TrackEnded => "track.ended",
            EventTopic::DjCommand => "dj.command",
            EventTopic::DjNextTrack => "dj.next_track",
            EventTopic::DjModeChanged => "dj.mode.changed",
            EventTopic::EyeCommand => "eye.command",
            EventTopic::DebugCommand => "debug.command",
            EventTopic::DebugCommandTrace => "debug.command.trace",
            EventTopic::PerformanceMetric => "performance.metric",
            EventTopic::DashboardLog => "dashboard.log",
        }
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_strings_are_dotted_lowercase() {
        let topics = [
            EventTopic::SystemModeChange,
            EventTopic::VoiceListeningStopped,
            EventTopic::MusicPlaybackStarted,
            EventTopic::DashboardLog,
        ];
        for topic in topics {
            let s = topic.as_str();
            assert!(s.contains('.'), "{s} should be dotted");
            assert_eq!(s, s.to_lowercase());
            assert!(!s.contains('/'), "{s} must not use slashed form");
        }
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(
            EventTopic::ModeTransitionStarted.to_string(),
            "mode.transition.started"
        );
    }
}
