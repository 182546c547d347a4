use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cantina_core::payloads::{ErrorPayload, EventPayload};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::tts::{SynthesisEvent, TtsSynthesizer};
use cantina_core::{BackoffPolicy, EventBus, EventTopic, Result};

struct SpeechState {
    synth: Arc<dyn TtsSynthesizer>,
    current: Mutex<Option<JoinHandle<()>>>,
    /// Conversation already queued via `tts.request`, so its complete
    /// `llm.response` must not synthesize a second time.
    requested_conversation: Mutex<Option<String>>,
    backoff: BackoffPolicy,
}

impl SpeechState {
    fn cancel_current(&self, core: &Arc<ServiceCore>) {
        let task = self
            .current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(task) = task {
            if !task.is_finished() {
                task.abort();
                // Restore downstream state (ducking, eyes) for the speech
                // we just cut off.
                core.emit(EventTopic::SpeechSynthesisEnded, EventPayload::Empty);
                debug!("cancelled in-flight synthesis");
            }
        }
    }
}

async fn run_synthesis(
    state: Arc<SpeechState>,
    core: Arc<ServiceCore>,
    text: String,
    conversation_id: Option<String>,
) {
    let emit = |topic: EventTopic, payload: EventPayload| match conversation_id.as_deref() {
        Some(id) => core.emit_in_conversation(topic, payload, id),
        None => core.emit(topic, payload),
    };

    let mut attempt = 0;
    let mut event_rx = loop {
        match state.synth.synthesize(&text).await {
            Ok(rx) => break rx,
            Err(e) => match state.backoff.delay_for(attempt) {
                Some(delay) => {
                    warn!(error = %e, attempt, "synthesis failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    warn!(error = %e, "synthesis retries exhausted");
                    emit(
                        EventTopic::VoiceError,
                        EventPayload::Error(ErrorPayload {
                            service: SpeechSynthesisService::NAME.to_string(),
                            message: format!("speech synthesis failed: {e}"),
                        }),
                    );
                    emit(EventTopic::SpeechSynthesisEnded, EventPayload::Empty);
                    return;
                }
            },
        }
    };

    while let Some(event) = event_rx.recv().await {
        match event {
            SynthesisEvent::Started => {
                info!("speech synthesis started");
                emit(EventTopic::SpeechSynthesisStarted, EventPayload::Empty);
            }
            SynthesisEvent::Amplitude { level } => {
                emit(
                    EventTopic::SpeechSynthesisAmplitude,
                    EventPayload::SynthesisAmplitude { level },
                );
            }
            SynthesisEvent::Completed { duration_secs } => {
                info!(duration_secs, "speech synthesis completed");
                emit(EventTopic::SpeechSynthesisCompleted, EventPayload::Empty);
                emit(EventTopic::SpeechSynthesisEnded, EventPayload::Empty);
                return;
            }
            SynthesisEvent::Error { message } => {
                warn!(%message, "vendor synthesis error");
                emit(
                    EventTopic::VoiceError,
                    EventPayload::Error(ErrorPayload {
                        service: SpeechSynthesisService::NAME.to_string(),
                        message,
                    }),
                );
                emit(EventTopic::SpeechSynthesisEnded, EventPayload::Empty);
                return;
            }
        }
    }
    // Vendor closed the stream without a terminal event.
    emit(EventTopic::SpeechSynthesisEnded, EventPayload::Empty);
}

/// Speech output service.
///
/// Drives the TTS vendor for every `tts.request` (or a complete
/// `llm.response` that did not come with one) and republishes the
/// synthesis lifecycle, which the music controller uses for ducking and
/// the peripherals for animation. At most one synthesis runs at a time.
pub struct SpeechSynthesisService {
    core: Arc<ServiceCore>,
    state: Arc<SpeechState>,
}

impl SpeechSynthesisService {
    pub const NAME: &'static str = "speech_synthesis";

    pub fn new(bus: EventBus, synth: Arc<dyn TtsSynthesizer>) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(SpeechState {
                synth,
                current: Mutex::new(None),
                requested_conversation: Mutex::new(None),
                backoff: BackoffPolicy::default(),
            }),
        }
    }

    fn begin(state: &Arc<SpeechState>, core: &Arc<ServiceCore>, text: String, conversation_id: Option<String>) {
        state.cancel_current(core);
        let task = tokio::spawn(run_synthesis(
            Arc::clone(state),
            Arc::clone(core),
            text,
            conversation_id,
        ));
        *state.current.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
    }
}

#[async_trait]
impl Service for SpeechSynthesisService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::TtsRequest,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), event| async move {
                        if let EventPayload::TtsRequest { text } = &event.payload {
                            *state
                                .requested_conversation
                                .lock()
                                .unwrap_or_else(|p| p.into_inner()) =
                                event.conversation_id.clone();
                            SpeechSynthesisService::begin(
                                &state,
                                &core,
                                text.clone(),
                                event.conversation_id.clone(),
                            );
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::LlmResponse,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), event| async move {
                        let EventPayload::LlmResponse(response) = &event.payload else {
                            return Ok(());
                        };
                        if !response.is_complete || response.text.trim().is_empty() {
                            return Ok(());
                        }
                        let already_requested = {
                            let requested = state
                                .requested_conversation
                                .lock()
                                .unwrap_or_else(|p| p.into_inner());
                            requested.is_some() && *requested == event.conversation_id
                        };
                        if already_requested {
                            debug!("conversation already synthesizing via tts.request");
                            return Ok(());
                        }
                        SpeechSynthesisService::begin(
                            &state,
                            &core,
                            response.text.clone(),
                            event.conversation_id.clone(),
                        );
                        Ok(())
                    },
                );
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        self.core
            .run_stop(async move {
                let task = state
                    .current
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .take();
                if let Some(task) = task {
                    task.abort();
                }
                Ok(())
            })
            .await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantina_core::payloads::LlmResponsePayload;
    use cantina_core::Event;
    use std::time::Duration;

    struct ScriptedSynth {
        script: Vec<SynthesisEvent>,
    }

    #[async_trait]
    impl TtsSynthesizer for ScriptedSynth {
        async fn synthesize(
            &self,
            _text: &str,
        ) -> Result<tokio::sync::mpsc::Receiver<SynthesisEvent>> {
            let (tx, rx) = tokio::sync::mpsc::channel(32);
            let script = self.script.clone();
            tokio::spawn(async move {
                for event in script {
                    let _ = tx.send(event).await;
                }
            });
            Ok(rx)
        }
    }

    fn collect(bus: &EventBus, topic: EventTopic) -> Arc<Mutex<Vec<Arc<Event>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = bus.subscribe(topic, "probe", move |event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(event);
                Ok(())
            }
        });
        seen
    }

    fn speaking_script() -> Vec<SynthesisEvent> {
        vec![
            SynthesisEvent::Started,
            SynthesisEvent::Amplitude { level: 0.4 },
            SynthesisEvent::Completed { duration_secs: 1.2 },
        ]
    }

    #[tokio::test]
    async fn lifecycle_events_flow_in_order() {
        let bus = EventBus::new();
        let started = collect(&bus, EventTopic::SpeechSynthesisStarted);
        let amplitude = collect(&bus, EventTopic::SpeechSynthesisAmplitude);
        let completed = collect(&bus, EventTopic::SpeechSynthesisCompleted);
        let ended = collect(&bus, EventTopic::SpeechSynthesisEnded);

        let service = SpeechSynthesisService::new(
            bus.clone(),
            Arc::new(ScriptedSynth {
                script: speaking_script(),
            }),
        );
        service.start().await.unwrap();

        bus.emit(
            EventTopic::TtsRequest,
            EventPayload::TtsRequest {
                text: "Welcome to the cantina!".into(),
            },
        );
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(started.lock().unwrap().len(), 1);
        assert_eq!(amplitude.lock().unwrap().len(), 1);
        assert_eq!(completed.lock().unwrap().len(), 1);
        assert_eq!(ended.lock().unwrap().len(), 1);

        let started = started.lock().unwrap();
        let ended = ended.lock().unwrap();
        assert!(started[0].id < ended[0].id);
    }

    #[tokio::test]
    async fn complete_llm_response_does_not_double_synthesize() {
        let bus = EventBus::new();
        let started = collect(&bus, EventTopic::SpeechSynthesisStarted);

        let service = SpeechSynthesisService::new(
            bus.clone(),
            Arc::new(ScriptedSynth {
                script: speaking_script(),
            }),
        );
        service.start().await.unwrap();

        // The LLM emits both for the same conversation; only one synthesis
        // may run.
        bus.emit_in_conversation(
            EventTopic::TtsRequest,
            EventPayload::TtsRequest { text: "Hey!".into() },
            "turn-1",
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.emit_in_conversation(
            EventTopic::LlmResponse,
            EventPayload::LlmResponse(LlmResponsePayload {
                text: "Hey!".into(),
                is_complete: true,
                tool_calls: Vec::new(),
            }),
            "turn-1",
        );
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(started.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vendor_error_still_ends_the_lifecycle() {
        let bus = EventBus::new();
        let ended = collect(&bus, EventTopic::SpeechSynthesisEnded);
        let errors = collect(&bus, EventTopic::VoiceError);

        let service = SpeechSynthesisService::new(
            bus.clone(),
            Arc::new(ScriptedSynth {
                script: vec![
                    SynthesisEvent::Started,
                    SynthesisEvent::Error {
                        message: "vendor 500".into(),
                    },
                ],
            }),
        );
        service.start().await.unwrap();

        bus.emit(
            EventTopic::TtsRequest,
            EventPayload::TtsRequest { text: "oops".into() },
        );
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(ended.lock().unwrap().len(), 1);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }
}
