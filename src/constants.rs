// ABOUTME: Application-wide constants for limits and default configuration values
// ABOUTME: Centralizes caps and defaults so deployment tuning happens in one place
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Shared constants.

/// Hard caps on per-user resources.
pub mod limits {
    /// Maximum clients one developer account may own.
    pub const MAX_CLIENTS_PER_DEVELOPER: usize = 20;

    /// Default access-token lifetime in seconds (30 days).
    pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

    /// Default authorization-code lifetime in seconds.
    pub const DEFAULT_AUTH_CODE_TTL_SECS: i64 = 10 * 60;

    /// Default failed credential attempts tolerated per (client, username)
    /// key before the authorize endpoint locks the key out.
    pub const DEFAULT_AUTHORIZE_ATTEMPT_LIMIT: u32 = 10;

    /// Default sliding window for the attempt counter, in seconds.
    pub const DEFAULT_AUTHORIZE_ATTEMPT_WINDOW_SECS: u64 = 15 * 60;

    /// Default bcrypt cost for password hashing.
    pub const DEFAULT_BCRYPT_COST: u32 = 12;
}

/// Service identification for structured logging.
pub mod service_names {
    /// Canonical service name.
    pub const LATCHKEY_SERVER: &str = "latchkey-server";
}
