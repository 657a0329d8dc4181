//! Common utilities and types shared across classroom components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for room credential claims and JWT validation helpers
pub mod jwt;
