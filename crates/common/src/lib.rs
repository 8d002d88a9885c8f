//! Common utilities shared across TCP router components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for OAuth 2.0 bearer token acquisition with caching
pub mod token_manager;
