//! Task queue: push, claim-and-execute, recovery

pub mod process;
pub mod registry;
pub mod service;

pub use process::Process;
pub use registry::{HandlerFn, HandlerRegistry};
pub use service::QueueService;
