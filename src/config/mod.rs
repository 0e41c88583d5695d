// ABOUTME: Configuration module organization
// ABOUTME: Environment-only configuration, no config files
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

/// Environment-based configuration management
pub mod environment;

pub use environment::{AttemptConfig, AuthConfig, DatabaseConfig, ServerConfig};
