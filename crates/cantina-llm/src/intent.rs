use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use cantina_core::payloads::{
    EventPayload, EyeCommandPayload, IntentPayload, MusicAction, MusicCommandPayload,
};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{Event, EventBus, EventTopic, Result};

/// Translates detected intents into hardware command events.
///
/// Unknown intents are logged and dropped; nothing else keys off them.
pub struct IntentRouterService {
    core: Arc<ServiceCore>,
}

impl IntentRouterService {
    pub const NAME: &'static str = "intent_router";

    pub fn new(bus: EventBus) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
        }
    }

    fn route(core: &Arc<ServiceCore>, intent: &IntentPayload, event: &Event) {
        let conversation_id = event.conversation_id.as_deref().unwrap_or_default();
        match intent.intent_name.as_str() {
            "play_music" => {
                let Some(track) = intent.parameters.get("track").and_then(|v| v.as_str()) else {
                    warn!("play_music intent without a track, dropping");
                    return;
                };
                info!(track, "routing play_music intent");
                core.emit_in_conversation(
                    EventTopic::MusicCommand,
                    EventPayload::MusicCommand(MusicCommandPayload::play(track)),
                    conversation_id,
                );
            }
            "stop_music" => {
                info!("routing stop_music intent");
                core.emit_in_conversation(
                    EventTopic::MusicCommand,
                    EventPayload::MusicCommand(MusicCommandPayload::action(MusicAction::Stop)),
                    conversation_id,
                );
            }
            "set_eye_color" => {
                let Some(color) = intent.parameters.get("color").and_then(|v| v.as_str()) else {
                    warn!("set_eye_color intent without a color, dropping");
                    return;
                };
                let pattern = intent
                    .parameters
                    .get("pattern")
                    .and_then(|v| v.as_str())
                    .unwrap_or("solid");
                let intensity = intent
                    .parameters
                    .get("intensity")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(1.0) as f32;
                info!(color, pattern, "routing set_eye_color intent");
                core.emit_in_conversation(
                    EventTopic::EyeCommand,
                    EventPayload::EyeCommand(EyeCommandPayload {
                        pattern: pattern.to_string(),
                        color: Some(color.to_string()),
                        intensity,
                    }),
                    conversation_id,
                );
            }
            other => {
                warn!(intent = other, "unknown intent, dropping");
            }
        }
    }
}

#[async_trait]
impl Service for IntentRouterService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::IntentDetected,
                    Arc::clone(&core),
                    |core, event| async move {
                        if let EventPayload::Intent(intent) = &event.payload {
                            IntentRouterService::route(&core, intent, &event);
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
