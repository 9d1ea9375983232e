//! Process wide observability glue: tracing initialization, panic logging
//! and the prometheus metric storage registry shared by all components.

pub mod metrics;
pub mod panic_hook;
pub mod tracing;
