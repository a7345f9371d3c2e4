//! Services module
//!
//! Token issuing and verification, the user directory and login checks.

pub mod authenticator;
pub mod directory;
pub mod token;

pub use authenticator::{Authenticator, LoginError};
pub use directory::{
    AuthorityResolver, DirectoryError, InMemoryUserDirectory, UserDirectory, UserRecord,
};
pub use token::{Claims, TokenError, TokenService};
