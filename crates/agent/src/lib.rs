//! Data center agent daemon: configuration and the health/metrics API

pub mod api;
pub mod config;
