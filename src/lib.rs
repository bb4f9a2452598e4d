// HTTP routes and error mapping
pub mod api;

// Platform session authentication
pub mod auth;

// Connected-service token brokering
pub mod broker;

// TOML configuration and environment overrides
pub mod config;

pub mod error;

// Server-side sessions behind a private cookie
pub mod session;

// Token persistence and claim decoding
pub mod tokens;

// OAuth2 token endpoint client
pub mod transport;
