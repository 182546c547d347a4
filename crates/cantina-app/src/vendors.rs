//! Stand-in vendor clients holding the configured credentials.
//!
//! The runtime consumes the vendor contracts only; these implementations
//! keep the full pipeline exercisable on a bare workstation. The chat
//! stand-in answers with a short canned line, the synthesis stand-in
//! paces a fake amplitude envelope by text length, and the STT stand-in
//! accepts audio without producing segments.
//
// TODO: swap SilentSttStream for the streaming Deepgram client once the
// deployment build links the vendor SDK.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use cantina_core::llm::{ChatClient, ChatDelta, ChatMessage, ChatRole, ToolSpec};
use cantina_core::stt::{AudioFrame, SttEvent, SttStream};
use cantina_core::tts::{SynthesisEvent, TtsSynthesizer};
use cantina_core::Result;

pub struct SilentSttStream {
    #[allow(dead_code)]
    api_key: String,
    event_tx: std::sync::Mutex<Option<mpsc::Sender<SttEvent>>>,
    frames: u64,
}

impl SilentSttStream {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            event_tx: std::sync::Mutex::new(None),
            frames: 0,
        }
    }
}

#[async_trait]
impl SttStream for SilentSttStream {
    async fn start_session(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send_audio(&mut self, _frame: AudioFrame) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    async fn finish_session(&mut self) -> Result<()> {
        debug!(frames = self.frames, "silent stt session finished");
        self.event_tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        Ok(())
    }

    async fn subscribe_events(&self) -> mpsc::Receiver<SttEvent> {
        let (tx, rx) = mpsc::channel(32);
        *self.event_tx.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
        rx
    }
}

pub struct CannedChatClient {
    #[allow(dead_code)]
    api_key: String,
}

impl CannedChatClient {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

#[async_trait]
impl ChatClient for CannedChatClient {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        _tools: Vec<ToolSpec>,
    ) -> Result<mpsc::Receiver<ChatDelta>> {
        let (tx, rx) = mpsc::channel(8);
        let heard = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        tokio::spawn(async move {
            let line = format!("Heard you loud and clear: {heard}. Spinning something up!");
            for word in line.split_inclusive(' ') {
                let _ = tx.send(ChatDelta::Text(word.to_string())).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = tx.send(ChatDelta::Done).await;
        });
        Ok(rx)
    }
}

pub struct PulseTtsSynthesizer {
    #[allow(dead_code)]
    api_key: String,
}

impl PulseTtsSynthesizer {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

#[async_trait]
impl TtsSynthesizer for PulseTtsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<SynthesisEvent>> {
        let (tx, rx) = mpsc::channel(32);
        // Rough speech pacing: one word ≈ 300 ms.
        let words = text.split_whitespace().count().max(1);
        tokio::spawn(async move {
            let _ = tx.send(SynthesisEvent::Started).await;
            for i in 0..words {
                let level = 0.3 + 0.4 * ((i % 3) as f32 / 3.0);
                let _ = tx.send(SynthesisEvent::Amplitude { level }).await;
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            let _ = tx
                .send(SynthesisEvent::Completed {
                    duration_secs: words as f32 * 0.3,
                })
                .await;
        });
        Ok(rx)
    }
}
