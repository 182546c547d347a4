use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cantina_core::config::LlmConfig;
use cantina_core::llm::{ChatClient, ChatDelta, ChatMessage, ToolCall};
use cantina_core::payloads::{ErrorPayload, EventPayload, IntentPayload, LlmResponsePayload};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{BackoffPolicy, EventBus, EventTopic, Result};

use crate::memory::SessionMemory;
use crate::rate_limit::SlidingWindow;
use crate::toolcall::ToolCallAssembler;
use crate::tools::{builtin_tools, validate_arguments};

struct LlmState {
    config: LlmConfig,
    client: Arc<dyn ChatClient>,
    memory: Mutex<SessionMemory>,
    limiter: Mutex<SlidingWindow>,
    turn_task: Mutex<Option<JoinHandle<()>>>,
    backoff: BackoffPolicy,
}

/// Conversational reasoning service.
///
/// Turns a finished utterance into a streaming chat completion: text
/// chunks fan out on `llm.response`, tool calls become `intent.detected`
/// as soon as their arguments parse, and the final text is forwarded to
/// synthesis. Each turn owns a fresh conversation id.
pub struct LlmService {
    core: Arc<ServiceCore>,
    state: Arc<LlmState>,
}

impl LlmService {
    pub const NAME: &'static str = "llm";

    pub fn new(bus: EventBus, config: LlmConfig, client: Arc<dyn ChatClient>) -> Self {
        let memory = SessionMemory::new(
            config.system_prompt.clone(),
            config.max_tokens,
            config.max_messages,
        );
        let limiter = SlidingWindow::per_minute(config.rate_limit_per_minute);
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(LlmState {
                config,
                client,
                memory: Mutex::new(memory),
                limiter: Mutex::new(limiter),
                turn_task: Mutex::new(None),
                backoff: BackoffPolicy::default(),
            }),
        }
    }

    fn spawn_turn(state: &Arc<LlmState>, core: &Arc<ServiceCore>, transcript: String) {
        let mut slot = state.turn_task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let state = Arc::clone(state);
        let core = Arc::clone(core);
        *slot = Some(tokio::spawn(async move {
            run_turn(state, core, transcript).await;
        }));
    }
}

async fn run_turn(state: Arc<LlmState>, core: Arc<ServiceCore>, transcript: String) {
    let conversation_id = uuid::Uuid::new_v4().to_string();

    let admitted = state
        .limiter
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .try_acquire();
    if !admitted {
        warn!("request rate cap hit, failing turn");
        core.emit_in_conversation(
            EventTopic::VoiceError,
            EventPayload::Error(ErrorPayload {
                service: LlmService::NAME.to_string(),
                message: "request rate limit exceeded, try again shortly".to_string(),
            }),
            &conversation_id,
        );
        return;
    }

    let messages = {
        let mut memory = state.memory.lock().unwrap_or_else(|p| p.into_inner());
        if state.config.reset_on_turn {
            memory.reset();
        }
        memory.push(ChatMessage::user(transcript.clone()));
        memory.messages_for_api()
    };

    core.emit_in_conversation(
        EventTopic::LlmProcessingStarted,
        EventPayload::Empty,
        &conversation_id,
    );
    info!(%conversation_id, "opening chat completion");

    let Some(mut delta_rx) = open_stream_with_retry(&state, &core, messages, &conversation_id).await
    else {
        core.emit_in_conversation(
            EventTopic::LlmProcessingEnded,
            EventPayload::Empty,
            &conversation_id,
        );
        return;
    };

    let mut assembler = ToolCallAssembler::new();
    let mut full_text = String::new();
    let mut completed_calls: Vec<ToolCall> = Vec::new();

    while let Some(delta) = delta_rx.recv().await {
        match delta {
            ChatDelta::Text(chunk) => {
                full_text.push_str(&chunk);
                core.emit_in_conversation(
                    EventTopic::LlmResponse,
                    EventPayload::LlmResponse(LlmResponsePayload {
                        text: chunk,
                        is_complete: false,
                        tool_calls: Vec::new(),
                    }),
                    &conversation_id,
                );
            }
            ChatDelta::ToolCallFragment {
                index,
                id,
                name,
                arguments,
            } => {
                if let Some(call) = assembler.ingest(index, id, name, &arguments) {
                    dispatch_tool_call(&core, call, &transcript, &conversation_id, &mut completed_calls);
                }
            }
            ChatDelta::Error { message } => {
                warn!(%message, "chat stream failed mid-turn");
                core.emit_in_conversation(
                    EventTopic::VoiceError,
                    EventPayload::Error(ErrorPayload {
                        service: LlmService::NAME.to_string(),
                        message,
                    }),
                    &conversation_id,
                );
                break;
            }
            ChatDelta::Done => break,
        }
    }

    // Calls the model terminated implicitly surface here.
    for call in assembler.finish() {
        dispatch_tool_call(&core, call, &transcript, &conversation_id, &mut completed_calls);
    }

    {
        let mut memory = state.memory.lock().unwrap_or_else(|p| p.into_inner());
        memory.push(ChatMessage::assistant(
            full_text.clone(),
            completed_calls.clone(),
        ));
    }

    core.emit_in_conversation(
        EventTopic::LlmResponse,
        EventPayload::LlmResponse(LlmResponsePayload {
            text: full_text.clone(),
            is_complete: true,
            tool_calls: completed_calls,
        }),
        &conversation_id,
    );

    if !full_text.trim().is_empty() {
        core.emit_in_conversation(
            EventTopic::TtsRequest,
            EventPayload::TtsRequest {
                text: full_text.clone(),
            },
            &conversation_id,
        );
    }

    core.emit_in_conversation(
        EventTopic::LlmProcessingEnded,
        EventPayload::Empty,
        &conversation_id,
    );
    core.emit_in_conversation(
        EventTopic::VoiceProcessingComplete,
        EventPayload::Empty,
        &conversation_id,
    );
}

async fn open_stream_with_retry(
    state: &Arc<LlmState>,
    core: &Arc<ServiceCore>,
    messages: Vec<ChatMessage>,
    conversation_id: &str,
) -> Option<tokio::sync::mpsc::Receiver<ChatDelta>> {
    let tools = builtin_tools();
    let mut attempt = 0;
    loop {
        match state
            .client
            .stream_chat(messages.clone(), tools.clone())
            .await
        {
            Ok(rx) => return Some(rx),
            Err(e) => match state.backoff.delay_for(attempt) {
                Some(delay) => {
                    warn!(error = %e, attempt, "chat completion failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    warn!(error = %e, "chat completion retries exhausted");
                    core.emit_in_conversation(
                        EventTopic::VoiceError,
                        EventPayload::Error(ErrorPayload {
                            service: LlmService::NAME.to_string(),
                            message: format!("chat completion failed: {e}"),
                        }),
                        conversation_id,
                    );
                    return None;
                }
            },
        }
    }
}

fn dispatch_tool_call(
    core: &Arc<ServiceCore>,
    call: ToolCall,
    transcript: &str,
    conversation_id: &str,
    completed: &mut Vec<ToolCall>,
) {
    match validate_arguments(&call.name, &call.arguments) {
        Ok(()) => {
            info!(tool = %call.name, "tool call completed");
            core.emit_in_conversation(
                EventTopic::IntentDetected,
                EventPayload::Intent(IntentPayload {
                    intent_name: call.name.clone(),
                    parameters: call.arguments.clone(),
                    original_text: transcript.to_string(),
                }),
                conversation_id,
            );
            completed.push(call);
        }
        Err(e) => {
            warn!(tool = %call.name, error = %e, "dropping invalid tool call");
        }
    }
}

#[async_trait]
impl Service for LlmService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::VoiceListeningStopped,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), event| async move {
                        if let EventPayload::ListeningStopped { transcript } = &event.payload {
                            let transcript = transcript.trim();
                            if transcript.is_empty() {
                                debug!("empty transcript, skipping turn");
                            } else {
                                LlmService::spawn_turn(&state, &core, transcript.to_string());
                            }
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::LlmMemoryReset,
                    Arc::clone(&state),
                    |state, _event| async move {
                        state
                            .memory
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .reset();
                        info!("conversation memory reset");
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
                if let Some(task) = state
                    .turn_task
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .take()
                {
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
