use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Events from a running synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SynthesisEvent {
    Started,
    /// Instantaneous output amplitude in [0, 1], for peripheral animation
    Amplitude { level: f32 },
    Completed { duration_secs: f32 },
    Error { message: String },
}

/// Text-to-speech vendor contract.
#[async_trait]
pub trait TtsSynthesizer: Send + Sync {
    /// Synthesize and play `text`; lifecycle events arrive on the returned
    /// channel, ending with `Completed` or `Error`.
    async fn synthesize(&self, text: &str) -> Result<tokio::sync::mpsc::Receiver<SynthesisEvent>>;
}
