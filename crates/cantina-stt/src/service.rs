use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cantina_core::config::SttConfig;
use cantina_core::payloads::{ErrorPayload, EventPayload, MetricPayload};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::stt::{AudioFrame, SttEvent, SttStream};
use cantina_core::{EventBus, EventTopic, Result};

use crate::accumulator::TranscriptAccumulator;

/// Creates a fresh vendor stream per capture session.
pub type SttStreamFactory = Arc<dyn Fn() -> Box<dyn SttStream> + Send + Sync>;

struct Session {
    stream: Box<dyn SttStream>,
    accumulator: Arc<Mutex<TranscriptAccumulator>>,
    event_task: JoinHandle<()>,
    frames_sent: u64,
}

struct SttState {
    factory: SttStreamFactory,
    flush_interval: Duration,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl SttState {
    async fn open_session(&self, core: &Arc<ServiceCore>) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            debug!("transcription session already open, ignoring start");
            return Ok(());
        }

        let mut stream = (self.factory)();
        if let Err(e) = stream.start_session().await {
            core.emit(
                EventTopic::VoiceError,
                EventPayload::Error(ErrorPayload {
                    service: TranscriptionService::NAME.to_string(),
                    message: format!("failed to open vendor stream: {e}"),
                }),
            );
            return Err(e);
        }

        let event_rx = stream.subscribe_events().await;
        let accumulator = Arc::new(Mutex::new(TranscriptAccumulator::new()));
        let event_task = tokio::spawn(consume_vendor_events(
            Arc::clone(core),
            event_rx,
            Arc::clone(&accumulator),
        ));

        *guard = Some(Session {
            stream,
            accumulator,
            event_task,
            frames_sent: 0,
        });
        drop(guard);

        core.emit(EventTopic::VoiceListeningStarted, EventPayload::Empty);
        info!("listening session opened");
        Ok(())
    }

    async fn feed_audio(&self, samples: Vec<i16>, timestamp_ms: u64) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_mut() {
            let frame = AudioFrame {
                samples,
                timestamp_ms,
            };
            match session.stream.send_audio(frame).await {
                Ok(()) => session.frames_sent += 1,
                Err(e) => warn!(error = %e, "failed to feed audio frame"),
            }
        }
    }

    async fn close_session(&self, core: &Arc<ServiceCore>) {
        let Some(mut session) = self.session.lock().await.take() else {
            debug!("no transcription session open, ignoring stop");
            return;
        };

        if let Err(e) = session.stream.finish_session().await {
            warn!(error = %e, "error finishing vendor stream");
        }

        // Give in-flight final segments a chance to arrive before we
        // snapshot the transcript.
        tokio::time::sleep(self.flush_interval).await;
        session.event_task.abort();

        let (transcript, segments) = {
            let acc = session
                .accumulator
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            (acc.transcript(), acc.segment_count())
        };

        core.emit(
            EventTopic::VoiceListeningStopped,
            EventPayload::ListeningStopped { transcript },
        );
        core.emit(
            EventTopic::PerformanceMetric,
            EventPayload::Metric(MetricPayload {
                name: "transcript_segments".to_string(),
                value: segments as f64,
                unit: "segments".to_string(),
                component: TranscriptionService::NAME.to_string(),
            }),
        );
        info!(frames = session.frames_sent, segments, "listening session closed");
    }
}

async fn consume_vendor_events(
    core: Arc<ServiceCore>,
    mut event_rx: tokio::sync::mpsc::Receiver<SttEvent>,
    accumulator: Arc<Mutex<TranscriptAccumulator>>,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            SttEvent::Interim { text } => {
                if !text.is_empty() {
                    core.emit(
                        EventTopic::TranscriptionInterim,
                        EventPayload::Transcript { text },
                    );
                }
            }
            SttEvent::Final { text } => {
                if !text.is_empty() {
                    accumulator
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .push_final(&text);
                    core.emit(
                        EventTopic::TranscriptionFinal,
                        EventPayload::Transcript { text },
                    );
                }
            }
            SttEvent::Error { message } => {
                warn!(%message, "vendor transcription error");
                core.emit(
                    EventTopic::TranscriptionError,
                    EventPayload::Error(ErrorPayload {
                        service: TranscriptionService::NAME.to_string(),
                        message: message.clone(),
                    }),
                );
                core.emit(
                    EventTopic::VoiceError,
                    EventPayload::Error(ErrorPayload {
                        service: TranscriptionService::NAME.to_string(),
                        message,
                    }),
                );
            }
        }
    }
}

/// Streaming transcription service.
///
/// Bridges `mic.recording.start/stop` into a vendor STT session: audio
/// chunks from the bus feed the stream, interim results are published for
/// display, final segments accumulate into the utterance transcript that
/// rides `voice.listening.stopped`.
pub struct TranscriptionService {
    core: Arc<ServiceCore>,
    state: Arc<SttState>,
}

impl TranscriptionService {
    pub const NAME: &'static str = "transcription";

    pub fn new(bus: EventBus, config: SttConfig, factory: SttStreamFactory) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(SttState {
                factory,
                flush_interval: Duration::from_millis(config.flush_interval_ms),
                session: tokio::sync::Mutex::new(None),
            }),
        }
    }
}

#[async_trait]
impl Service for TranscriptionService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .run_start(async move {
                core.subscribe(
                    EventTopic::MicRecordingStart,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), _event| async move { state.open_session(&core).await },
                );
                core.subscribe(
                    EventTopic::MicRecordingStop,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), _event| async move {
                        state.close_session(&core).await;
                        Ok(())
                    },
                );
                core.subscribe(
                    EventTopic::AudioRawChunk,
                    Arc::clone(&state),
                    |state, event| async move {
                        if let EventPayload::AudioChunk {
                            samples,
                            timestamp_ms,
                        } = &event.payload
                        {
                            state.feed_audio(samples.clone(), *timestamp_ms).await;
                        }
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
                // Abandon any open session without emitting a stop event.
                if let Some(session) = state.session.lock().await.take() {
                    session.event_task.abort();
                }
                Ok(())
            })
            .await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }
}
