use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cantina_core::config::AudioConfig;
use cantina_core::payloads::{EventPayload, MetricPayload};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{EventBus, EventTopic, Result};

use crate::capture::{start_capture, CaptureHandle, RawBlock};
use crate::resample::Resampler;

/// Raw-block queue between the capture callback and the feed task.
const BLOCK_QUEUE_CAPACITY: usize = 64;

struct ActiveCapture {
    handle: CaptureHandle,
    feed_task: JoinHandle<()>,
}

struct MicState {
    config: AudioConfig,
    active: Mutex<Option<ActiveCapture>>,
}

impl MicState {
    fn begin_capture(self: &Arc<Self>, core: &Arc<ServiceCore>) -> Result<()> {
        {
            let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            if active.is_some() {
                debug!("capture already active, ignoring start");
                return Ok(());
            }
        }

        let (block_tx, block_rx) = mpsc::channel::<RawBlock>(BLOCK_QUEUE_CAPACITY);
        let handle = start_capture(&self.config, block_tx)?;
        let resampler = Resampler::new(
            handle.format.sample_rate,
            self.config.sample_rate,
            handle.format.channels,
        )?;

        let feed_task = tokio::spawn(feed_loop(Arc::clone(core), block_rx, resampler));

        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        *active = Some(ActiveCapture { handle, feed_task });
        info!("microphone capture session opened");
        Ok(())
    }

    fn end_capture(&self, core: &ServiceCore) {
        let Some(capture) = self
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        else {
            debug!("no capture active, ignoring stop");
            return;
        };

        let dropped = capture.handle.dropped_blocks();
        capture.handle.stop();
        capture.feed_task.abort();

        if dropped > 0 {
            warn!(dropped, "capture session dropped blocks under overload");
        }
        core.emit(
            EventTopic::PerformanceMetric,
            EventPayload::Metric(MetricPayload {
                name: "capture_dropped_blocks".to_string(),
                value: dropped as f64,
                unit: "blocks".to_string(),
                component: MicInputService::NAME.to_string(),
            }),
        );
        info!("microphone capture session closed");
    }
}

async fn feed_loop(
    core: Arc<ServiceCore>,
    mut block_rx: mpsc::Receiver<RawBlock>,
    resampler: Resampler,
) {
    let session_start = Instant::now();
    while let Some(block) = block_rx.recv().await {
        let samples = resampler.process(&block);
        if samples.is_empty() {
            continue;
        }
        core.emit(
            EventTopic::AudioRawChunk,
            EventPayload::AudioChunk {
                samples,
                timestamp_ms: session_start.elapsed().as_millis() as u64,
            },
        );
    }
    debug!("audio feed loop finished");
}

/// Microphone input service.
///
/// Owns the capture session exclusively: `mic.recording.start` opens the
/// device and begins publishing 16 kHz mono blocks on `audio.raw.chunk`,
/// `mic.recording.stop` tears it down and reports overflow drops as a
/// metric. At most one session is active at a time.
pub struct MicInputService {
    core: Arc<ServiceCore>,
    state: Arc<MicState>,
}

impl MicInputService {
    pub const NAME: &'static str = "mic_input";

    pub fn new(bus: EventBus, config: AudioConfig) -> Self {
        Self {
            core: ServiceCore::new(Self::NAME, bus),
            state: Arc::new(MicState {
                config,
                active: Mutex::new(None),
            }),
        }
    }
}

#[async_trait]
impl Service for MicInputService {
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
                    |(state, core), _event| async move { state.begin_capture(&core) },
                );
                core.subscribe(
                    EventTopic::MicRecordingStop,
                    (Arc::clone(&state), Arc::clone(&core)),
                    |(state, core), _event| async move {
                        state.end_capture(&core);
                        Ok(())
                    },
                );
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let state = Arc::clone(&self.state);
        self.core
            .run_stop(async move {
                state.end_capture(&core);
                Ok(())
            })
            .await
    }

    fn status(&self) -> ServiceStatus {
        self.core.status()
    }
}
