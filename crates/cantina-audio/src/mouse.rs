//! Global mouse-click capture toggle.
//!
//! `rdev::listen` blocks forever on its own OS thread; the callback only
//! hands clicks into a bounded channel, and a scheduler-side consumer
//! turns them into capture start/stop events. There is no graceful way to
//! interrupt the listen loop, so stop just flips a flag that silences the
//! callback.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cantina_core::payloads::EventPayload;
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{EventBus, EventTopic, Result, SystemMode};

const CLICK_QUEUE_CAPACITY: usize = 8;

struct MouseListener {
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl MouseListener {
    fn start(tx: mpsc::Sender<()>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let stop_for_thread = Arc::clone(&stop);
        let dropped_for_thread = Arc::clone(&dropped);

        std::thread::Builder::new()
            .name("mouse-listener".to_string())
            .spawn(move || {
                let result = rdev::listen(move |event| {
                    if stop_for_thread.load(Ordering::Relaxed) {
                        return;
                    }
                    if let rdev::EventType::ButtonPress(rdev::Button::Left) = event.event_type {
                        if tx.try_send(()).is_err() {
                            dropped_for_thread.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
                if let Err(e) = result {
                    warn!("mouse listener exited: {e:?}");
                }
            })
            .map_err(|e| {
                cantina_core::CantinaError::ResourceUnavailable(format!(
                    "failed to spawn mouse listener: {e}"
                ))
            })?;

        Ok(Self { stop, dropped })
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            debug!(dropped, "mouse clicks dropped under overload");
        }
    }
}

struct MouseState {
    mode: Mutex<SystemMode>,
    capturing: AtomicBool,
    listener: Mutex<Option<MouseListener>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

/// Mouse input service: a left click toggles the capture session while
/// the system is INTERACTIVE.
pub struct MouseInputService {
    core: Arc<ServiceCore>,
    state: Arc<MouseState>,
}

impl MouseInputService {
    pub const NAME: &'static str = "mouse_input";

    pub fn new(bus: EventBus) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(MouseState {
                mode: Mutex::new(SystemMode::Startup),
                capturing: AtomicBool::new(false),
                listener: Mutex::new(None),
                consumer: Mutex::new(None),
            }),
        }
    }
}

async fn consume_clicks(core: Arc<ServiceCore>, state: Arc<MouseState>, mut rx: mpsc::Receiver<()>) {
    while rx.recv().await.is_some() {
        let interactive =
            *state.mode.lock().unwrap_or_else(|p| p.into_inner()) == SystemMode::Interactive;
        if !interactive {
            continue;
        }
        if state.capturing.load(Ordering::Acquire) {
            info!("mouse click: stopping capture");
            core.emit(EventTopic::MicRecordingStop, EventPayload::Empty);
        } else {
            info!("mouse click: starting capture");
            core.emit(EventTopic::MicRecordingStart, EventPayload::Empty);
        }
    }
}

#[async_trait]
impl Service for MouseInputService {
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
                            *state.mode.lock().unwrap_or_else(|p| p.into_inner()) = *new_mode;
                        }
                        Ok(())
                    },
                );
                // The capture session itself is authoritative for the
                // toggle state, whatever surface started it.
                core.subscribe(
                    EventTopic::VoiceListeningStarted,
                    Arc::clone(&state),
                    |state, _event| async move {
                        state.capturing.store(true, Ordering::Release);
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::VoiceListeningStopped,
                    Arc::clone(&state),
                    |state, _event| async move {
                        state.capturing.store(false, Ordering::Release);
                        Ok(())
                    },
                );

                let (click_tx, click_rx) = mpsc::channel(CLICK_QUEUE_CAPACITY);
                let listener = MouseListener::start(click_tx)?;
                *state.listener.lock().unwrap_or_else(|p| p.into_inner()) = Some(listener);

                let consumer = tokio::spawn(consume_clicks(
                    Arc::clone(&core),
                    Arc::clone(&state),
                    click_rx,
                ));
                *state.consumer.lock().unwrap_or_else(|p| p.into_inner()) = Some(consumer);
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        self.core
            .run_stop(async move {
                if let Some(listener) = state
                    .listener
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .take()
                {
                    listener.stop();
                }
                if let Some(consumer) = state
                    .consumer
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .take()
                {
                    consumer.abort();
                }
                Ok(())
            })
            .await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }
}
