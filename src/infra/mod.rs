//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod imagegen;
pub mod metrics;
pub mod system_memory;
pub mod telemetry;
