pub mod messages;
pub mod schemas;
pub mod service;

pub use messages::{MusicProgressMessage, MusicStatusMessage, ServerMessage, TrackInfo};
pub use schemas::ClientMessage;
pub use service::WebBridgeService;
