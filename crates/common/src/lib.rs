//! Shared types and error helpers used across all parlor crates.

pub mod error;
pub mod types;

pub use {
    error::FromMessage,
    types::{ChatContext, Message, Priority, Role},
};
