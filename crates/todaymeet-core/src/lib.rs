//! Core types: calendar events, time ranges, tracing setup

pub mod event;
pub mod time;
pub mod tracing;

pub use event::{Event, EventTime, sort_events};
pub use time::{TimeRange, TimeRangeError};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
