//! Error types shared by handlers and middleware

pub mod types;

pub use types::{ApiError, ErrorDetail, ErrorResponse};
