pub mod service;

pub use service::SpeechSynthesisService;
