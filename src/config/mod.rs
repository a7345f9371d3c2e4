//! Configuration management module
//!
//! This module handles loading and validating application configuration
//! from environment variables and .env files.

pub mod settings;

pub use settings::{AuthConfig, Environment, RateLimitConfig, Settings, DEFAULT_PUBLIC_PATHS};
