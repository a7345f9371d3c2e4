//! CLI tool to hash a password for the user directory
//!
//! Usage:
//!   cargo run --bin hash_password -- --password 'admin123'
//!   cargo run --bin hash_password -- --password 'admin123' --username admin --authority ADMIN

use anyhow::{Context, Result};
use clap::Parser;
use tickets_gateway::services::UserRecord;

/// Hash a password with bcrypt
#[derive(Parser, Debug)]
#[command(name = "hash_password")]
#[command(about = "Hash a password with bcrypt, optionally as a USERS_FILE entry")]
struct Args {
    /// Plain-text password to hash
    #[arg(short, long)]
    password: String,

    /// bcrypt cost factor
    #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
    cost: u32,

    /// Print a full user record for this username instead of the bare hash
    #[arg(short, long)]
    username: Option<String>,

    /// Authority granted to the user (repeatable; first one is the login role)
    #[arg(short, long = "authority")]
    authorities: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let hash = bcrypt::hash(&args.password, args.cost).context("Failed to hash password")?;

    match args.username {
        Some(username) => {
            let authorities = if args.authorities.is_empty() {
                vec!["USER".to_string()]
            } else {
                args.authorities
            };
            let record = UserRecord::new(username, hash, authorities);
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        None => println!("{}", hash),
    }

    Ok(())
}
