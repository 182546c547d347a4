use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cantina_core::config::WebConfig;
use cantina_core::payloads::{now_timestamp, Event, EventPayload};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{CantinaError, EventBus, EventTopic, Result, Track};

use crate::messages::{
    MusicProgressMessage, MusicStatusMessage, ServerMessage, ServiceSnapshot, TrackInfo,
};
use crate::schemas::ClientMessage;

/// Interval between status-broadcast evaluations.
const STATUS_TICK: Duration = Duration::from_secs(5);
/// Ceiling after which the service map is resent even when unchanged.
const STATUS_RESEND_CEILING: f64 = 60.0;

pub struct BridgeState {
    bus: EventBus,
    started_at: f64,
    clients: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_client_id: AtomicU64,
    services: Mutex<BTreeMap<String, ServiceSnapshot>>,
    last_sent: Mutex<(BTreeMap<String, ServiceSnapshot>, f64)>,
    library: Mutex<Vec<TrackInfo>>,
}

impl BridgeState {
    fn client_count(&self) -> usize {
        self.clients.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Send one message to every connected dashboard, dropping sessions
    /// whose writer has gone away.
    fn broadcast(&self, message: &ServerMessage) {
        let text = message.to_json();
        let mut clients = self.clients.lock().unwrap_or_else(|p| p.into_inner());
        clients.retain(|id, tx| {
            let alive = tx.send(text.clone()).is_ok();
            if !alive {
                debug!(client = id, "dropping disconnected dashboard session");
            }
            alive
        });
    }

    fn track_info(track: &Track, index: usize) -> TrackInfo {
        TrackInfo {
            id: format!("{}", index + 1),
            title: track.name.clone(),
            artist: "Unknown".to_string(),
            duration: track.duration_seconds,
            file: track.path.display().to_string(),
        }
    }

    /// Re-validate a dashboard-shaped payload by round-tripping it
    /// through its schema. Returns `None` (after logging) when the
    /// payload does not conform.
    fn validate_roundtrip<T: Serialize + DeserializeOwned>(payload: &T) -> Option<T> {
        let value = serde_json::to_value(payload).ok()?;
        match serde_json::from_value(value) {
            Ok(valid) => Some(valid),
            Err(e) => {
                warn!(error = %e, "dashboard payload failed schema validation");
                None
            }
        }
    }

    /// Translate one bus event into the dashboard messages it produces.
    fn translate(&self, event: &Event) -> Vec<ServerMessage> {
        match (&event.topic, &event.payload) {
            (EventTopic::ServiceStatusUpdate, EventPayload::ServiceStatus(update)) => {
                let mut services = self.services.lock().unwrap_or_else(|p| p.into_inner());
                let changed = services
                    .get(&update.service)
                    .map(|snapshot| snapshot.status != update.status.as_str())
                    .unwrap_or(true);
                if changed {
                    services.insert(
                        update.service.clone(),
                        ServiceSnapshot {
                            status: update.status.as_str().to_string(),
                            last_update: format!("{:.3}", now_timestamp()),
                        },
                    );
                }
                Vec::new()
            }
            (EventTopic::TranscriptionInterim, EventPayload::Transcript { text }) => {
                vec![ServerMessage::TranscriptionUpdate {
                    text: text.clone(),
                    is_final: false,
                }]
            }
            (EventTopic::TranscriptionFinal, EventPayload::Transcript { text }) => {
                vec![ServerMessage::TranscriptionUpdate {
                    text: text.clone(),
                    is_final: true,
                }]
            }
            (EventTopic::VoiceListeningStarted, _) => vec![ServerMessage::VoiceStatus {
                status: "recording".to_string(),
            }],
            (EventTopic::VoiceListeningStopped, _) | (EventTopic::LlmProcessingStarted, _) => {
                vec![ServerMessage::VoiceStatus {
                    status: "processing".to_string(),
                }]
            }
            (EventTopic::SpeechSynthesisStarted, _) => vec![ServerMessage::VoiceStatus {
                status: "speaking".to_string(),
            }],
            // Any terminal or error outcome forces the indicator back to
            // idle so the UI can never stick on busy.
            (EventTopic::VoiceProcessingComplete, _)
            | (EventTopic::SpeechSynthesisCompleted, _)
            | (EventTopic::SpeechSynthesisEnded, _)
            | (EventTopic::LlmProcessingEnded, _) => vec![ServerMessage::VoiceStatus {
                status: "idle".to_string(),
            }],
            (EventTopic::VoiceError, EventPayload::Error(err)) => vec![
                ServerMessage::VoiceStatus {
                    status: "idle".to_string(),
                },
                ServerMessage::SystemError {
                    service: err.service.clone(),
                    message: err.message.clone(),
                },
            ],
            (EventTopic::SystemError, EventPayload::Error(err)) => {
                vec![ServerMessage::SystemError {
                    service: err.service.clone(),
                    message: err.message.clone(),
                }]
            }
            (EventTopic::LlmResponse, EventPayload::LlmResponse(response)) => {
                vec![ServerMessage::LlmResponse {
                    text: response.text.clone(),
                    is_complete: response.is_complete,
                }]
            }
            (EventTopic::MusicPlaybackStarted, EventPayload::PlaybackStarted { track, .. }) => {
                let status = MusicStatusMessage {
                    action: "started".to_string(),
                    track: Some(Self::track_info(track, 0)),
                };
                let validated = Self::validate_roundtrip(&status).unwrap_or(MusicStatusMessage {
                    action: "started".to_string(),
                    track: None,
                });
                vec![ServerMessage::MusicStatus(validated)]
            }
            (EventTopic::MusicPlaybackStopped, EventPayload::PlaybackStopped { .. }) => {
                vec![ServerMessage::MusicStatus(MusicStatusMessage {
                    action: "stopped".to_string(),
                    track: None,
                })]
            }
            (EventTopic::MusicProgress, EventPayload::Progress(progress)) => {
                let message = MusicProgressMessage {
                    track_name: progress.track_name.clone(),
                    position: progress.position,
                    duration: progress.duration,
                    progress: progress.progress,
                };
                if message.is_valid() {
                    vec![ServerMessage::MusicProgress(message)]
                } else {
                    warn!("music progress payload out of range, broadcasting fallback");
                    vec![ServerMessage::MusicProgress(MusicProgressMessage {
                        track_name: progress.track_name.clone(),
                        position: progress.position.max(0.0),
                        duration: progress.duration.max(0.0),
                        progress: progress.progress.clamp(0.0, 1.0),
                    })]
                }
            }
            (EventTopic::MusicCommand, EventPayload::MusicCommand(cmd))
                if cmd.action == cantina_core::payloads::MusicAction::Queue =>
            {
                vec![ServerMessage::MusicQueue {
                    queued: cmd.song_query.clone(),
                }]
            }
            (EventTopic::MusicLibraryUpdated, EventPayload::Library { tracks }) => {
                let infos: Vec<TrackInfo> = tracks
                    .iter()
                    .enumerate()
                    .map(|(i, t)| Self::track_info(t, i))
                    .collect();
                *self.library.lock().unwrap_or_else(|p| p.into_inner()) = infos;
                Vec::new()
            }
            (EventTopic::DjModeChanged, EventPayload::DjMode { active }) => {
                vec![ServerMessage::DjStatus { active: *active }]
            }
            (EventTopic::DashboardLog, EventPayload::Log(entry)) => {
                vec![ServerMessage::SystemLog(entry.clone())]
            }
            (EventTopic::SystemModeChange, payload) => {
                vec![ServerMessage::CantinaEvent {
                    topic: event.topic.as_str().to_string(),
                    payload: serde_json::to_value(payload).unwrap_or_default(),
                }]
            }
            _ => Vec::new(),
        }
    }

    /// Handle one inbound socket text frame. Returns the ack or error to
    /// send back; validation failures emit nothing on the bus.
    fn process_client_text(&self, text: &str) -> ServerMessage {
        let parsed: std::result::Result<ClientMessage, _> = serde_json::from_str(text);
        let message = match parsed {
            Ok(message) => message,
            Err(e) => {
                return ServerMessage::CommandError {
                    command: "unknown".to_string(),
                    message: format!("malformed command: {e}"),
                    validation_errors: Vec::new(),
                };
            }
        };

        let kind = match &message {
            ClientMessage::VoiceCommand(_) => "voice_command",
            ClientMessage::MusicCommand(_) => "music_command",
            ClientMessage::DjCommand(_) => "dj_command",
            ClientMessage::SystemCommand(_) => "system_command",
            ClientMessage::SubscribeEvents { .. } => "subscribe_events",
        };

        match message.to_events() {
            Ok(events) => {
                for (topic, payload) in events {
                    self.bus.emit(topic, payload);
                }
                ServerMessage::CommandAck {
                    command: kind.to_string(),
                }
            }
            Err(validation_errors) => ServerMessage::CommandError {
                command: kind.to_string(),
                message: "validation failed".to_string(),
                validation_errors,
            },
        }
    }

    /// Send the aggregated service map when it changed or the resend
    /// ceiling elapsed.
    fn broadcast_status_if_needed(&self) {
        let current = self
            .services
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let now = now_timestamp();
        let should_send = {
            let last = self.last_sent.lock().unwrap_or_else(|p| p.into_inner());
            last.0 != current || now - last.1 > STATUS_RESEND_CEILING
        };
        if should_send {
            self.broadcast(&ServerMessage::ServiceStatusUpdate {
                services: current.clone(),
            });
            *self.last_sent.lock().unwrap_or_else(|p| p.into_inner()) = (current, now);
        }
    }
}

async fn health(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "cantina-web-bridge",
        "status": "online",
        "cantina_os_connected": true,
        "dashboard_clients": state.client_count(),
        "timestamp": now_timestamp(),
        "uptime_seconds": now_timestamp() - state.started_at,
    }))
}

async fn system_status(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let services = state
        .services
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clone();
    Json(serde_json::json!({ "services": services }))
}

async fn music_library(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let library = state
        .library
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .clone();
    Json(library)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<BridgeState>) {
    let client_id = state.next_client_id.fetch_add(1, Ordering::Relaxed);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    state
        .clients
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .insert(client_id, out_tx.clone());
    info!(client = client_id, "dashboard session opened");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut reader = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let response = reader_state.process_client_text(text.as_str());
                    let _ = out_tx.send(response.to_json());
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state
        .clients
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .remove(&client_id);
    info!(client = client_id, "dashboard session closed");
}

/// Bridge between the bus and browser dashboards.
///
/// Serves the health/status/library HTTP endpoints and a WebSocket that
/// carries validated commands inbound and curated, re-validated bus
/// traffic outbound. The periodic status broadcast only resends the
/// service map when it changed or a 60 s ceiling passed.
pub struct WebBridgeService {
    core: Arc<ServiceCore>,
    state: Arc<BridgeState>,
    config: WebConfig,
    server: Mutex<Option<JoinHandle<()>>>,
    broadcaster: Mutex<Option<JoinHandle<()>>>,
}

impl WebBridgeService {
    pub const NAME: &'static str = "web_bridge";

    pub fn new(bus: EventBus, config: WebConfig) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus.clone()),
            state: Arc::new(BridgeState {
                bus,
                started_at: now_timestamp(),
                clients: Mutex::new(HashMap::new()),
                next_client_id: AtomicU64::new(1),
                services: Mutex::new(BTreeMap::new()),
                last_sent: Mutex::new((BTreeMap::new(), 0.0)),
                library: Mutex::new(Vec::new()),
            }),
            config,
            server: Mutex::new(None),
            broadcaster: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &Arc<BridgeState> {
        &self.state
    }

    fn router(state: Arc<BridgeState>) -> Router {
        Router::new()
            .route("/", get(health))
            .route("/api/system/status", get(system_status))
            .route("/api/music/library", get(music_library))
            .route("/ws", get(ws_upgrade))
            .layer(tower_http::cors::CorsLayer::permissive())
            .with_state(state)
    }

    /// Topics mirrored to the dashboard.
    const MIRRORED_TOPICS: [EventTopic; 18] = [
        EventTopic::ServiceStatusUpdate,
        EventTopic::TranscriptionInterim,
        EventTopic::TranscriptionFinal,
        EventTopic::VoiceListeningStarted,
        EventTopic::VoiceListeningStopped,
        EventTopic::VoiceProcessingComplete,
        EventTopic::VoiceError,
        EventTopic::LlmProcessingStarted,
        EventTopic::LlmProcessingEnded,
        EventTopic::LlmResponse,
        EventTopic::SpeechSynthesisStarted,
        EventTopic::SpeechSynthesisCompleted,
        EventTopic::SpeechSynthesisEnded,
        EventTopic::MusicPlaybackStarted,
        EventTopic::MusicPlaybackStopped,
        EventTopic::MusicProgress,
        EventTopic::MusicLibraryUpdated,
        EventTopic::DjModeChanged,
    ];
}

#[async_trait]
impl Service for WebBridgeService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let server_slot = &self.server;
        let broadcaster_slot = &self.broadcaster;

        self.core
            .run_start(async move {
                for topic in Self::MIRRORED_TOPICS {
                    core.subscribe(topic, Arc::clone(&state), |state, event| async move {
                        for message in state.translate(&event) {
                            state.broadcast(&message);
                        }
                        Ok(())
                    });
                }
                // Queue commands surface as music_queue updates.
                core.subscribe(
                    EventTopic::MusicCommand,
                    Arc::clone(&state),
                    |state, event| async move {
                        for message in state.translate(&event) {
                            state.broadcast(&message);
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::DashboardLog,
                    Arc::clone(&state),
                    |state, event| async move {
                        for message in state.translate(&event) {
                            state.broadcast(&message);
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::SystemError,
                    Arc::clone(&state),
                    |state, event| async move {
                        for message in state.translate(&event) {
                            state.broadcast(&message);
                        }
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::SystemModeChange,
                    Arc::clone(&state),
                    |state, event| async move {
                        for message in state.translate(&event) {
                            state.broadcast(&message);
                        }
                        Ok(())
                    },
                );

                let listener = tokio::net::TcpListener::bind(&bind_addr)
                    .await
                    .map_err(|e| {
                        CantinaError::ResourceUnavailable(format!(
                            "cannot bind web bridge to {bind_addr}: {e}"
                        ))
                    })?;
                info!(addr = %bind_addr, "web bridge listening");

                let app = Self::router(Arc::clone(&state));
                let server = tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app).await {
                        warn!(error = %e, "web server exited");
                    }
                });
                *server_slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(server);

                let broadcast_state = Arc::clone(&state);
                let broadcaster = tokio::spawn(async move {
                    let mut interval = tokio::time::interval(STATUS_TICK);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        interval.tick().await;
                        broadcast_state.broadcast_status_if_needed();
                    }
                });
                *broadcaster_slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(broadcaster);

                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        let server = self.server.lock().unwrap_or_else(|p| p.into_inner()).take();
        let broadcaster = self
            .broadcaster
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let state = Arc::clone(&self.state);
        self.core
            .run_stop(async move {
                if let Some(task) = broadcaster {
                    task.abort();
                }
                if let Some(task) = server {
                    task.abort();
                }
                state
                    .clients
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .clear();
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
    use cantina_core::payloads::{ErrorPayload, ProgressPayload, ServiceStatusPayload};
    use std::path::PathBuf;

    fn bridge() -> WebBridgeService {
        WebBridgeService::new(EventBus::new(), WebConfig::default())
    }

    fn attach_client(state: &Arc<BridgeState>) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .clients
            .lock()
            .unwrap()
            .insert(state.next_client_id.fetch_add(1, Ordering::Relaxed), tx);
        rx
    }

    fn received(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn voice_indicator_resets_to_idle_on_every_terminal_topic() {
        let service = bridge();
        let state = service.state();
        for topic in [
            EventTopic::VoiceProcessingComplete,
            EventTopic::SpeechSynthesisCompleted,
            EventTopic::SpeechSynthesisEnded,
            EventTopic::LlmProcessingEnded,
        ] {
            let event = Event::new(topic, EventPayload::Empty);
            let messages = state.translate(&event);
            assert_eq!(messages.len(), 1, "topic {topic} must reset the indicator");
            let json: serde_json::Value =
                serde_json::from_str(&messages[0].to_json()).unwrap();
            assert_eq!(json["type"], "voice_status");
            assert_eq!(json["status"], "idle");
        }

        // voice.error resets and reports.
        let event = Event::new(
            EventTopic::VoiceError,
            EventPayload::Error(ErrorPayload {
                service: "llm".into(),
                message: "rate limited".into(),
            }),
        );
        let messages = state.translate(&event);
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn invalid_command_reaches_no_bus_topic() {
        let bus = EventBus::new();
        let service = WebBridgeService::new(bus.clone(), WebConfig::default());
        let state = service.state();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = bus.subscribe(EventTopic::MusicCommand, "probe", move |event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(event);
                Ok(())
            }
        });

        let response = state.process_client_text(
            r#"{"type": "music_command", "action": "volume", "volume_level": 1.5}"#,
        );
        let json: serde_json::Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(json["type"], "command_error");
        assert!(json["validation_errors"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e.as_str().unwrap().contains("volume_level")));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn valid_command_is_acked_and_emitted() {
        let bus = EventBus::new();
        let service = WebBridgeService::new(bus.clone(), WebConfig::default());
        let state = service.state();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = bus.subscribe(EventTopic::MusicCommand, "probe", move |event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(event);
                Ok(())
            }
        });

        let response = state.process_client_text(
            r#"{"type": "music_command", "action": "play", "track_name": "Cantina Band"}"#,
        );
        let json: serde_json::Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(json["type"], "command_ack");
        assert_eq!(json["command"], "music_command");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_broadcast_only_resends_on_change() {
        let service = bridge();
        let state = service.state();
        let mut rx = attach_client(state);

        let update = Event::new(
            EventTopic::ServiceStatusUpdate,
            EventPayload::ServiceStatus(ServiceStatusPayload {
                service: "music_controller".into(),
                status: cantina_core::ServiceStatus::Running,
                message: "started".into(),
            }),
        );
        state.translate(&update);

        state.broadcast_status_if_needed();
        state.broadcast_status_if_needed();
        state.broadcast_status_if_needed();

        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1, "unchanged map must not be resent");
        assert_eq!(messages[0]["type"], "service_status_update");
        assert_eq!(
            messages[0]["services"]["music_controller"]["status"],
            "RUNNING"
        );

        // A real change triggers another send.
        let degraded = Event::new(
            EventTopic::ServiceStatusUpdate,
            EventPayload::ServiceStatus(ServiceStatusPayload {
                service: "music_controller".into(),
                status: cantina_core::ServiceStatus::Degraded,
                message: "handler fault".into(),
            }),
        );
        state.translate(&degraded);
        state.broadcast_status_if_needed();
        let messages = received(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0]["services"]["music_controller"]["status"],
            "DEGRADED"
        );
    }

    #[tokio::test]
    async fn library_updates_fill_the_http_cache() {
        let service = bridge();
        let state = service.state();

        let event = Event::new(
            EventTopic::MusicLibraryUpdated,
            EventPayload::Library {
                tracks: vec![Track {
                    name: "Cantina Band".into(),
                    path: PathBuf::from("/music/Cantina Band.mp3"),
                    duration_seconds: 180.0,
                }],
            },
        );
        state.translate(&event);

        let library = state.library.lock().unwrap().clone();
        assert_eq!(library.len(), 1);
        assert_eq!(library[0].title, "Cantina Band");
        assert_eq!(library[0].id, "1");
    }

    #[tokio::test]
    async fn progress_messages_pass_validation_or_fall_back() {
        let service = bridge();
        let state = service.state();

        let bad = Event::new(
            EventTopic::MusicProgress,
            EventPayload::Progress(ProgressPayload {
                track_name: "Cantina Band".into(),
                position: 10.0,
                duration: 180.0,
                progress: 2.5,
            }),
        );
        let messages = state.translate(&bad);
        let json: serde_json::Value = serde_json::from_str(&messages[0].to_json()).unwrap();
        assert_eq!(json["type"], "music_progress");
        assert!((json["progress"].as_f64().unwrap() - 1.0).abs() < 1e-6);
    }
}
