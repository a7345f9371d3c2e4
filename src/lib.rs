//! Tickets gateway library
//!
//! JWT authentication and fixed-window rate limiting for the ticketing API.

// Public modules
pub mod api;
pub mod clock;
pub mod config;
pub mod error;
pub mod middleware;
pub mod schemas;
pub mod server;
pub mod services;

// Re-export commonly used types
pub use config::Settings;
pub use error::ApiError;
pub use server::App;
