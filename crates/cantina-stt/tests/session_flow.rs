//! End-to-end transcription session flow against a scripted vendor stream.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cantina_core::config::SttConfig;
use cantina_core::payloads::{Event, EventPayload};
use cantina_core::service::Service;
use cantina_core::stt::{AudioFrame, SttEvent, SttStream};
use cantina_core::{EventBus, EventTopic, Result};
use cantina_stt::{SttStreamFactory, TranscriptionService};

/// Vendor fake that replays a script when the session is finished, the way
/// a real stream flushes trailing finals after close.
struct ScriptedStt {
    script: Vec<SttEvent>,
    frames: Arc<AtomicUsize>,
    event_tx: Mutex<Option<tokio::sync::mpsc::Sender<SttEvent>>>,
}

#[async_trait]
impl SttStream for ScriptedStt {
    async fn start_session(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send_audio(&mut self, _frame: AudioFrame) -> Result<()> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finish_session(&mut self) -> Result<()> {
        let tx = self.event_tx.lock().unwrap().take();
        if let Some(tx) = tx {
            for event in self.script.clone() {
                let _ = tx.send(event).await;
            }
        }
        Ok(())
    }

    async fn subscribe_events(&self) -> tokio::sync::mpsc::Receiver<SttEvent> {
        let (tx, rx) = tokio::sync::mpsc::channel(32);
        *self.event_tx.lock().unwrap() = Some(tx);
        rx
    }
}

fn scripted_factory(script: Vec<SttEvent>, frames: Arc<AtomicUsize>) -> SttStreamFactory {
    Arc::new(move || {
        Box::new(ScriptedStt {
            script: script.clone(),
            frames: Arc::clone(&frames),
            event_tx: Mutex::new(None),
        })
    })
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

fn chunk(samples: Vec<i16>) -> EventPayload {
    EventPayload::AudioChunk {
        samples,
        timestamp_ms: 0,
    }
}

#[tokio::test]
async fn capture_session_accumulates_finals_into_stopped_payload() {
    let bus = EventBus::new();
    let frames = Arc::new(AtomicUsize::new(0));
    let factory = scripted_factory(
        vec![
            SttEvent::Interim {
                text: "play".into(),
            },
            SttEvent::Final {
                text: "play cantina band".into(),
            },
        ],
        Arc::clone(&frames),
    );

    let started = collect(&bus, EventTopic::VoiceListeningStarted);
    let stopped = collect(&bus, EventTopic::VoiceListeningStopped);
    let interim = collect(&bus, EventTopic::TranscriptionInterim);
    let finals = collect(&bus, EventTopic::TranscriptionFinal);

    let service = TranscriptionService::new(
        bus.clone(),
        SttConfig {
            flush_interval_ms: 50,
        },
        factory,
    );
    service.start().await.unwrap();

    bus.emit(EventTopic::MicRecordingStart, EventPayload::Empty);
    tokio::time::sleep(Duration::from_millis(50)).await;

    for _ in 0..3 {
        bus.emit(EventTopic::AudioRawChunk, chunk(vec![0; 320]));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    bus.emit(EventTopic::MicRecordingStop, EventPayload::Empty);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(started.lock().unwrap().len(), 1);
    assert_eq!(frames.load(Ordering::SeqCst), 3);
    assert_eq!(interim.lock().unwrap().len(), 1);
    assert_eq!(finals.lock().unwrap().len(), 1);

    let stopped = stopped.lock().unwrap();
    assert_eq!(stopped.len(), 1);
    match &stopped[0].payload {
        EventPayload::ListeningStopped { transcript } => {
            assert_eq!(transcript, "play cantina band");
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn stop_without_start_emits_nothing() {
    let bus = EventBus::new();
    let factory = scripted_factory(Vec::new(), Arc::new(AtomicUsize::new(0)));
    let stopped = collect(&bus, EventTopic::VoiceListeningStopped);

    let service = TranscriptionService::new(
        bus.clone(),
        SttConfig {
            flush_interval_ms: 10,
        },
        factory,
    );
    service.start().await.unwrap();

    bus.emit(EventTopic::MicRecordingStop, EventPayload::Empty);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(stopped.lock().unwrap().is_empty());
}

#[tokio::test]
async fn double_start_opens_a_single_session() {
    let bus = EventBus::new();
    let factory = scripted_factory(Vec::new(), Arc::new(AtomicUsize::new(0)));
    let started = collect(&bus, EventTopic::VoiceListeningStarted);

    let service = TranscriptionService::new(
        bus.clone(),
        SttConfig {
            flush_interval_ms: 10,
        },
        factory,
    );
    service.start().await.unwrap();

    bus.emit(EventTopic::MicRecordingStart, EventPayload::Empty);
    bus.emit(EventTopic::MicRecordingStart, EventPayload::Empty);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(started.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn multiple_finals_concatenate_in_order() {
    let bus = EventBus::new();
    let factory = scripted_factory(
        vec![
            SttEvent::Final {
                text: "open the".into(),
            },
            SttEvent::Final {
                text: "pod bay doors".into(),
            },
        ],
        Arc::new(AtomicUsize::new(0)),
    );
    let stopped = collect(&bus, EventTopic::VoiceListeningStopped);

    let service = TranscriptionService::new(
        bus.clone(),
        SttConfig {
            flush_interval_ms: 50,
        },
        factory,
    );
    service.start().await.unwrap();

    bus.emit(EventTopic::MicRecordingStart, EventPayload::Empty);
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.emit(EventTopic::MicRecordingStop, EventPayload::Empty);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopped = stopped.lock().unwrap();
    match &stopped[0].payload {
        EventPayload::ListeningStopped { transcript } => {
            assert_eq!(transcript, "open the pod bay doors");
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}
