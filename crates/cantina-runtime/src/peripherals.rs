use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use cantina_core::payloads::EventPayload;
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{EventBus, EventTopic, Result, SystemMode};

fn pattern_for_mode(mode: SystemMode) -> &'static str {
    match mode {
        SystemMode::Startup => "startup",
        SystemMode::Idle => "idle",
        SystemMode::Ambient => "ambient",
        SystemMode::Interactive => "listening",
    }
}

struct EyeState {
    /// Pattern derived from the current mode, restored after speech.
    base_pattern: Mutex<String>,
    current: Mutex<String>,
}

impl EyeState {
    fn apply(&self, pattern: &str) {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if *current != pattern {
            debug!(pattern, "eye pattern changed");
            *current = pattern.to_string();
        }
    }
}

/// Eye LED peripheral, modeled as a plain status-driven subscriber.
///
/// Mode changes and the speech lifecycle drive the pattern; explicit
/// `eye.command` events (intent router, CLI) override it. The serial
/// protocol itself lives outside the core.
pub struct EyePeripheralService {
    core: Arc<ServiceCore>,
    state: Arc<EyeState>,
}

impl EyePeripheralService {
    pub const NAME: &'static str = "eye_peripheral";

    pub fn new(bus: EventBus) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(EyeState {
                base_pattern: Mutex::new("startup".to_string()),
                current: Mutex::new("startup".to_string()),
            }),
        }
    }

    pub fn current_pattern(&self) -> String {
        self.state
            .current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Service for EyePeripheralService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::SystemModeChange,
                    Arc::clone(&state),
                    |state, event| async move {
                        if let EventPayload::ModeChange { new_mode, .. } = &event.payload {
                            let pattern = pattern_for_mode(*new_mode);
                            *state
                                .base_pattern
                                .lock()
                                .unwrap_or_else(|p| p.into_inner()) = pattern.to_string();
                            state.apply(pattern);
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::SpeechSynthesisStarted,
                    Arc::clone(&state),
                    |state, _event| async move {
                        state.apply("speaking");
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::SpeechSynthesisEnded,
                    Arc::clone(&state),
                    |state, _event| async move {
                        let base = state
                            .base_pattern
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .clone();
                        state.apply(&base);
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::EyeCommand,
                    Arc::clone(&state),
                    |state, event| async move {
                        if let EventPayload::EyeCommand(cmd) = &event.payload {
                            state.apply(&cmd.pattern);
                        }
                        Ok(())
                    },
                );
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        self.core.run_stop(async { Ok(()) }).await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }
}

/// Plays a short acknowledgement cue on every completed mode change. The
/// hardware-free rendition records the cue and logs it.
pub struct ModeSoundService {
    core: Arc<ServiceCore>,
    last_cue: Arc<Mutex<Option<String>>>,
}

impl ModeSoundService {
    pub const NAME: &'static str = "mode_sound";

    pub fn new(bus: EventBus) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            last_cue: Arc::new(Mutex::new(None)),
        }
    }

    pub fn last_cue(&self) -> Option<String> {
        self.last_cue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Service for ModeSoundService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let last_cue = Arc::clone(&self.last_cue);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::SystemModeChange,
                    last_cue,
                    |last_cue, event| async move {
                        if let EventPayload::ModeChange { new_mode, .. } = &event.payload {
                            let cue = format!("mode-{}", new_mode.as_str().to_lowercase());
                            info!(%cue, "playing mode change cue");
                            *last_cue.lock().unwrap_or_else(|p| p.into_inner()) = Some(cue);
                        }
                        Ok(())
                    },
                );
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        self.core.run_stop(async { Ok(()) }).await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn eyes_follow_mode_and_speech() {
        let bus = EventBus::new();
        let eyes = EyePeripheralService::new(bus.clone());
        eyes.start().await.unwrap();

        bus.emit(
            EventTopic::SystemModeChange,
            EventPayload::ModeChange {
                old_mode: SystemMode::Startup,
                new_mode: SystemMode::Interactive,
            },
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(eyes.current_pattern(), "listening");

        bus.emit(EventTopic::SpeechSynthesisStarted, EventPayload::Empty);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(eyes.current_pattern(), "speaking");

        bus.emit(EventTopic::SpeechSynthesisEnded, EventPayload::Empty);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(eyes.current_pattern(), "listening");
    }

    #[tokio::test]
    async fn explicit_eye_command_overrides_pattern() {
        let bus = EventBus::new();
        let eyes = EyePeripheralService::new(bus.clone());
        eyes.start().await.unwrap();

        bus.emit(
            EventTopic::EyeCommand,
            EventPayload::EyeCommand(cantina_core::payloads::EyeCommandPayload {
                pattern: "rainbow".into(),
                color: Some("blue".into()),
                intensity: 0.8,
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(eyes.current_pattern(), "rainbow");
    }

    #[tokio::test]
    async fn mode_sound_records_cue() {
        let bus = EventBus::new();
        let sound = ModeSoundService::new(bus.clone());
        sound.start().await.unwrap();

        bus.emit(
            EventTopic::SystemModeChange,
            EventPayload::ModeChange {
                old_mode: SystemMode::Idle,
                new_mode: SystemMode::Ambient,
            },
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sound.last_cue().as_deref(), Some("mode-ambient"));
    }
}
