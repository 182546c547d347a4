pub mod capture;
pub mod error;
#[cfg(feature = "mouse-input")]
pub mod mouse;
pub mod resample;
pub mod service;

pub use capture::{CaptureHandle, DeviceFormat};
pub use error::AudioError;
#[cfg(feature = "mouse-input")]
pub use mouse::MouseInputService;
pub use resample::Resampler;
pub use service::MicInputService;
