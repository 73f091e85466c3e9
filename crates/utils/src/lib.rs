pub mod backtrace;
pub mod config;
pub mod telemetry;
