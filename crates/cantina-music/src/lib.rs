pub mod library;
pub mod player;
pub mod service;

pub use library::{DurationProbe, MusicLibrary};
pub use player::{PlayerBackend, PlayerHandle, RodioBackend};
pub use service::MusicControllerService;
