use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{info, warn, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use cantina_core::config::LoggingConfig;
use cantina_core::payloads::{EventPayload, LogEntry, LogLevel};
use cantina_core::service::{Service, ServiceCore, ServiceStatus};
use cantina_core::{CantinaError, EventBus, EventTopic, Result};

/// Minimum spacing between INFO-class dashboard messages per service, to
/// keep CLI chatter from flooding the browser.
const INFO_FANOUT_INTERVAL: Duration = Duration::from_millis(100);

/// Targets that must never re-enter the capture path: our own emits, the
/// bus (which logs while fanning out), and the socket/runtime libraries.
const FILTERED_TARGET_PREFIXES: [&str; 10] = [
    "cantina_runtime::logging",
    "cantina_core::bus",
    "tungstenite",
    "tokio_tungstenite",
    "hyper",
    "h2",
    "tower",
    "axum",
    "mio",
    "tokio",
];

fn should_filter(target: &str) -> bool {
    FILTERED_TARGET_PREFIXES
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

/// Stable service name derived from the log target.
fn service_for_target(target: &str) -> String {
    const MAP: [(&str, &str); 8] = [
        ("cantina_audio", "mic_input"),
        ("cantina_stt", "transcription"),
        ("cantina_llm", "llm"),
        ("cantina_speech", "speech_synthesis"),
        ("cantina_music", "music_controller"),
        ("cantina_web", "web_bridge"),
        ("cantina_runtime", "runtime"),
        ("cantina_core", "core"),
    ];
    for (prefix, service) in MAP {
        if target.starts_with(prefix) {
            return service.to_string();
        }
    }
    target
        .split("::")
        .next()
        .unwrap_or("unknown")
        .to_string()
}

fn map_level(level: &tracing::Level) -> LogLevel {
    if *level == tracing::Level::ERROR {
        LogLevel::Error
    } else if *level == tracing::Level::WARN {
        LogLevel::Warning
    } else if *level == tracing::Level::INFO {
        LogLevel::Info
    } else {
        LogLevel::Debug
    }
}

/// Emergency circuit breaker over raw record rate.
struct RateBreaker {
    ceiling: u32,
    second: u64,
    count: u32,
    engaged: bool,
}

impl RateBreaker {
    fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            second: 0,
            count: 0,
            engaged: false,
        }
    }

    fn allow(&mut self, now_second: u64) -> bool {
        if now_second != self.second {
            if self.engaged && self.count <= self.ceiling {
                self.engaged = false;
            }
            self.second = now_second;
            self.count = 0;
        }
        self.count += 1;
        if self.count > self.ceiling {
            self.engaged = true;
        }
        !self.engaged
    }
}

/// Shared capture state between the tracing layer and the service.
pub struct LogSink {
    session_id: String,
    entry_seq: AtomicU64,
    dedup_window: Duration,
    dedup: Mutex<HashMap<String, Instant>>,
    breaker: Mutex<RateBreaker>,
    ring: Mutex<VecDeque<LogEntry>>,
    ring_capacity: usize,
    file_tx: mpsc::Sender<LogEntry>,
    queue_dropped: AtomicU64,
    closed: AtomicBool,
}

impl LogSink {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Snapshot of the in-memory ring buffer.
    pub fn ring_snapshot(&self) -> Vec<LogEntry> {
        self.ring
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn record(&self, level: LogLevel, target: &str, message: String) {
        if self.closed.load(Ordering::Acquire) || should_filter(target) {
            return;
        }

        let now_second = cantina_core::payloads::now_timestamp() as u64;
        {
            let mut breaker = self.breaker.lock().unwrap_or_else(|p| p.into_inner());
            if !breaker.allow(now_second) {
                return;
            }
        }

        let service = service_for_target(target);
        let dedup_key = format!("{service}|{}|{message}", level.as_str());
        {
            let mut dedup = self.dedup.lock().unwrap_or_else(|p| p.into_inner());
            let now = Instant::now();
            if let Some(last) = dedup.get(&dedup_key) {
                if now.duration_since(*last) < self.dedup_window {
                    return;
                }
            }
            dedup.insert(dedup_key, now);
        }

        let entry = LogEntry {
            timestamp: cantina_core::payloads::now_timestamp(),
            level,
            service,
            message,
            session_id: self.session_id.clone(),
            entry_id: self.entry_seq.fetch_add(1, Ordering::Relaxed),
        };

        {
            let mut ring = self.ring.lock().unwrap_or_else(|p| p.into_inner());
            if ring.len() == self.ring_capacity {
                ring.pop_front();
            }
            ring.push_back(entry.clone());
        }

        if self.file_tx.try_send(entry).is_err() {
            self.queue_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// tracing layer that feeds every diagnostic record into the sink.
pub struct CaptureLayer {
    sink: Arc<LogSink>,
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);
        if visitor.message.is_empty() {
            return;
        }
        self.sink
            .record(map_level(metadata.level()), metadata.target(), visitor.message);
    }
}

struct FanoutThrottle {
    last_info: HashMap<String, Instant>,
}

impl FanoutThrottle {
    fn admit(&mut self, entry: &LogEntry) -> bool {
        if entry.level != LogLevel::Info {
            return true;
        }
        let now = Instant::now();
        match self.last_info.get(&entry.service) {
            Some(last) if now.duration_since(*last) < INFO_FANOUT_INTERVAL => false,
            _ => {
                self.last_info.insert(entry.service.clone(), now);
                true
            }
        }
    }
}

async fn consume_queue(
    core: Arc<ServiceCore>,
    mut file_rx: mpsc::Receiver<LogEntry>,
    mut writer: BufWriter<File>,
    shutdown: Arc<Notify>,
) {
    let mut throttle = FanoutThrottle {
        last_info: HashMap::new(),
    };

    let write_entry = |writer: &mut BufWriter<File>, entry: &LogEntry| {
        let line = format!(
            "{:.3} [{}] {} - {}\n",
            entry.timestamp,
            entry.level.as_str(),
            entry.service,
            entry.message
        );
        if let Err(e) = writer.write_all(line.as_bytes()) {
            eprintln!("logging: session file write failed: {e}");
        }
    };

    loop {
        tokio::select! {
            entry = file_rx.recv() => {
                let Some(entry) = entry else { break };
                write_entry(&mut writer, &entry);
                // Batch whatever else is already queued.
                let mut batch = vec![entry];
                while let Ok(next) = file_rx.try_recv() {
                    write_entry(&mut writer, &next);
                    batch.push(next);
                }
                let _ = writer.flush();
                for entry in batch {
                    if throttle.admit(&entry) {
                        core.emit(EventTopic::DashboardLog, EventPayload::Log(entry));
                    }
                }
            }
            _ = shutdown.notified() => {
                // Drain what is left, then close the session file.
                while let Ok(entry) = file_rx.try_recv() {
                    write_entry(&mut writer, &entry);
                }
                let _ = writer.flush();
                break;
            }
        }
    }
}

/// Process-wide log capture service.
///
/// A [`CaptureLayer`] installed on the tracing subscriber funnels every
/// crate's diagnostics here: filtered (so our own output never loops
/// back), de-duplicated within a window, rate-broken under load, kept in
/// a bounded ring, persisted to a timestamped session file and fanned out
/// to the dashboard.
pub struct LoggingService {
    core: Arc<ServiceCore>,
    sink: Arc<LogSink>,
    session_file: PathBuf,
    shutdown: Arc<Notify>,
    file_rx: Mutex<Option<mpsc::Receiver<LogEntry>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl LoggingService {
    pub const NAME: &'static str = "logging";

    /// Build the service and the layer to install on the subscriber.
    pub fn new(bus: EventBus, config: &LoggingConfig) -> (Self, CaptureLayer) {
        let session_id = format!(
            "cantina-session-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        );
        let session_file = config.session_dir.join(format!("{session_id}.log"));
        let (file_tx, file_rx) = mpsc::channel(config.file_queue_capacity);

        let sink = Arc::new(LogSink {
            session_id,
            entry_seq: AtomicU64::new(1),
            dedup_window: Duration::from_secs(config.dedup_window_secs),
            dedup: Mutex::new(HashMap::new()),
            breaker: Mutex::new(RateBreaker::new(config.max_records_per_sec)),
            ring: Mutex::new(VecDeque::with_capacity(config.ring_capacity)),
            ring_capacity: config.ring_capacity,
            file_tx,
            queue_dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let service = Self {
            core: ServiceCore::new(Self::NAME, bus),
            sink: Arc::clone(&sink),
            session_file,
            shutdown: Arc::new(Notify::new()),
            file_rx: Mutex::new(Some(file_rx)),
            consumer: Mutex::new(None),
        };
        (service, CaptureLayer { sink })
    }

    pub fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }

    pub fn session_file(&self) -> &PathBuf {
        &self.session_file
    }
}

#[async_trait]
impl Service for LoggingService {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self) -> Result<()> {
        let core = Arc::clone(&self.core);
        let session_file = self.session_file.clone();
        let file_rx = self
            .file_rx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let shutdown = Arc::clone(&self.shutdown);
        let session_id = self.sink.session_id().to_string();

        let consumer_slot = &self.consumer;
        self.core
            .run_start(async move {
                let Some(file_rx) = file_rx else {
                    // Already started once; start() stays idempotent.
                    return Ok(());
                };
                if let Some(parent) = session_file.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = File::create(&session_file).map_err(|e| {
                    CantinaError::ResourceUnavailable(format!(
                        "cannot create session log {}: {e}",
                        session_file.display()
                    ))
                })?;
                let writer = BufWriter::new(file);
                let task = tokio::spawn(consume_queue(core, file_rx, writer, shutdown));
                *consumer_slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
                info!(session = %session_id, "logging session started");
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<()> {
        let sink = Arc::clone(&self.sink);
        let shutdown = Arc::clone(&self.shutdown);
        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        self.core
            .run_stop(async move {
                sink.closed.store(true, Ordering::Release);
                shutdown.notify_one();
                if let Some(task) = consumer {
                    if task.await.is_err() {
                        warn!("logging consumer ended abnormally");
                    }
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
    use tracing_subscriber::layer::SubscriberExt;

    fn test_config(dir: &std::path::Path) -> LoggingConfig {
        LoggingConfig {
            session_dir: dir.to_path_buf(),
            dedup_window_secs: 30,
            max_records_per_sec: 50,
            ring_capacity: 1_000,
            file_queue_capacity: 10_000,
        }
    }

    fn collect(bus: &EventBus, topic: EventTopic) -> Arc<Mutex<Vec<Arc<cantina_core::Event>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = bus.subscribe(topic, "probe", move |event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap_or_else(|p| p.into_inner()).push(event);
                Ok(())
            }
        });
        seen
    }

    #[tokio::test]
    async fn identical_burst_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let dashboard = collect(&bus, EventTopic::DashboardLog);
        let (service, _layer) = LoggingService::new(bus.clone(), &test_config(dir.path()));
        service.start().await.unwrap();

        for _ in 0..100 {
            service.sink().record(
                LogLevel::Info,
                "cantina_llm::service",
                "same line every time".to_string(),
            );
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let ring = service.sink().ring_snapshot();
        let matching: Vec<_> = ring
            .iter()
            .filter(|e| e.message == "same line every time")
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(dashboard.lock().unwrap().len(), 1);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn own_and_socket_targets_never_reach_the_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let dashboard = collect(&bus, EventTopic::DashboardLog);
        let (service, _layer) = LoggingService::new(bus.clone(), &test_config(dir.path()));
        service.start().await.unwrap();

        service.sink().record(
            LogLevel::Error,
            "cantina_runtime::logging",
            "feedback loop".to_string(),
        );
        service
            .sink()
            .record(LogLevel::Error, "tungstenite::protocol", "ws noise".to_string());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(service.sink().ring_snapshot().is_empty());
        assert!(dashboard.lock().unwrap().is_empty());

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn rate_breaker_caps_a_flood_of_distinct_lines() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let mut config = test_config(dir.path());
        config.max_records_per_sec = 50;
        let (service, _layer) = LoggingService::new(bus.clone(), &config);
        service.start().await.unwrap();

        for i in 0..500 {
            service.sink().record(
                LogLevel::Debug,
                "cantina_music::service",
                format!("distinct line {i}"),
            );
        }
        // Everything lands inside one wall-clock second, so the breaker
        // must have cut in at the ceiling.
        assert!(service.sink().ring_snapshot().len() <= 51);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn session_file_receives_drained_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let (service, _layer) = LoggingService::new(bus.clone(), &test_config(dir.path()));
        service.start().await.unwrap();

        service.sink().record(
            LogLevel::Warning,
            "cantina_stt::service",
            "vendor hiccup".to_string(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.stop().await.unwrap();

        let contents = std::fs::read_to_string(service.session_file()).unwrap();
        assert!(contents.contains("vendor hiccup"));
        assert!(contents.contains("[WARNING] transcription"));
    }

    #[tokio::test]
    async fn capture_layer_feeds_tracing_events_into_the_sink() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let (service, layer) = LoggingService::new(bus.clone(), &test_config(dir.path()));
        service.start().await.unwrap();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "cantina_music::service", "tracked through the layer");
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let ring = service.sink().ring_snapshot();
        assert!(ring
            .iter()
            .any(|e| e.message.contains("tracked through the layer")
                && e.service == "music_controller"));

        service.stop().await.unwrap();
    }
}
