//! Utility modules: logging bootstrap and configuration

pub mod config;
pub mod logger;
