pub mod config;
pub mod lifecycle;
pub mod service;
pub mod telemetry;
