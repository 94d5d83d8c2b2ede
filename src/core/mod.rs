//! Worker runtimes: broker, topic consumers, scheduler and their HTTP surface

pub mod bootstrap;
pub mod broker;
pub mod consumer;
pub mod http;
pub mod scheduler;

pub use broker::{Broker, BrokerHandle};
pub use consumer::TopicConsumer;
pub use http::{create_router, start_server, AppState};
pub use scheduler::{PeriodScheduler, SchedulePeriod};
