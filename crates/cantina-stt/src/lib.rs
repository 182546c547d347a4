pub mod accumulator;
pub mod service;

pub use accumulator::TranscriptAccumulator;
pub use service::{SttStreamFactory, TranscriptionService};
