use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Audio frame handed to the STT vendor.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples (16-bit mono, 16 kHz)
    pub samples: Vec<i16>,
    /// Milliseconds from capture-session start
    pub timestamp_ms: u64,
}

/// Transcription events from the vendor stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SttEvent {
    /// Unstable partial result, display only
    Interim { text: String },
    /// Stabilized result, safe to accumulate
    Final { text: String },
    Error { message: String },
}

/// Streaming speech-to-text vendor contract.
///
/// The runtime only consumes this interface; concrete vendor clients live
/// outside the core.
#[async_trait]
pub trait SttStream: Send + Sync {
    /// Open a streaming session with the vendor.
    async fn start_session(&mut self) -> Result<()>;

    /// Feed one audio frame into the open session.
    async fn send_audio(&mut self, frame: AudioFrame) -> Result<()>;

    /// Close the session, flushing any in-flight segment.
    async fn finish_session(&mut self) -> Result<()>;

    /// Subscribe to transcription events for the current session.
    async fn subscribe_events(&self) -> tokio::sync::mpsc::Receiver<SttEvent>;
}
