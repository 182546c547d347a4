pub mod debug;
pub mod dispatch;
pub mod logging;
pub mod mode;
pub mod peripherals;
pub mod registry;

pub use debug::{DebugService, LevelControl, MetricAggregate};
pub use dispatch::{parse_line, CommandDispatcherService};
pub use logging::{CaptureLayer, LogSink, LoggingService};
pub use mode::ModeManagerService;
pub use peripherals::{EyePeripheralService, ModeSoundService};
pub use registry::ServiceRegistry;
