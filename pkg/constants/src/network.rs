//! Network-related constants.

/// Default port for the quotapool API server.
pub const DEFAULT_API_PORT: u16 = 6443;

/// Token used when neither the CLI nor the config file provides one.
pub const DEFAULT_JOIN_TOKEN: &str = "demo-token-123";
