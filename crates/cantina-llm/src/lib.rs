pub mod intent;
pub mod memory;
pub mod rate_limit;
pub mod service;
pub mod toolcall;
pub mod tools;

pub use intent::IntentRouterService;
pub use memory::SessionMemory;
pub use rate_limit::SlidingWindow;
pub use service::LlmService;
pub use toolcall::ToolCallAssembler;
pub use tools::{builtin_tools, validate_arguments};
