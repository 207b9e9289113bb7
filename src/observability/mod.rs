//! Process-level observability wiring.

pub mod logging;
