pub mod backoff;
pub mod bus;
pub mod command;
pub mod config;
pub mod error;
pub mod llm;
pub mod mode;
pub mod payloads;
pub mod service;
pub mod stt;
pub mod topics;
pub mod tts;

pub use backoff::BackoffPolicy;
pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use config::{AppConfig, Secrets};
pub use error::{CantinaError, Result};
pub use llm::{ChatClient, ChatDelta, ChatMessage, ChatRole, ToolCall, ToolSpec};
pub use mode::{SystemMode, TransitionStatus};
pub use payloads::{Event, EventPayload, LogEntry, LogLevel, Track};
pub use service::{Service, ServiceCore, ServiceStatus};
pub use stt::{AudioFrame, SttEvent, SttStream};
pub use topics::EventTopic;
pub use tts::{SynthesisEvent, TtsSynthesizer};
