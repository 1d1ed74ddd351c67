//! Scheduling and emission of collected metrics

mod scheduler;
mod transport;


pub use scheduler::{CycleReport, CycleState, Scheduler, SchedulerBuilder, SchedulerConfig};
pub use transport::{ChannelTransport, HttpTransport, LogTransport, Transport, TransportError};
