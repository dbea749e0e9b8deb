//! Background tasks started by `aei-relay run`
//!
//! - [`IngestOrchestrator`]: runs the coordinator on a fixed interval
//! - [`DeliveryScheduler`]: apalis worker pool feeding the delivery worker

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::IngestOrchestrator;
pub use scheduler::DeliveryScheduler;
