// ABOUTME: Main library entry point for the Latchkey identity provider
// ABOUTME: Exposes the OAuth2 flows, the user/client store, and the HTTP routes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

#![deny(unsafe_code)]

//! # Latchkey
//!
//! A single-node OAuth2 identity provider and authorization server.
//! Latchkey owns user accounts and their personal data (addresses,
//! emails, phone numbers), registers third-party clients, and issues
//! bearer tokens through the standard grant flows.
//!
//! ## Features
//!
//! - **Authorization code, implicit, password, client_credentials and
//!   refresh_token grants** with RFC 6749 / 6750 error semantics
//! - **Consent-driven data sharing**: users pick exactly which
//!   addresses, emails and phone numbers a client may read
//! - **Change tracking**: sharing clients see what changed since their
//!   last read, and a derived notification-handler mirror per client
//! - **Deletion cascades**: best-effort fan-outs with aggregate error
//!   reporting keep the denormalized store consistent
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use latchkey::config::environment::ServerConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("Latchkey configured with port: HTTP={}", config.http_port);
//!     Ok(())
//! }
//! ```

// ── Public API ──────────────────────────────────────────────────────────
// These modules are used by the server binary (src/bin/) and the
// integration tests (tests/).

/// Deletion cascades and the snapshot/ledger repair helpers
pub mod cascade;

/// Configuration management from environment variables
pub mod config;

/// Service-wide limits and token lifetimes
pub mod constants;

/// Password hashing, token generation, and constant-time comparison
pub mod credentials;

/// `SQLite` persistence layer
pub mod database;

/// Unified error type with `HTTP` and OAuth response mapping
pub mod errors;

/// Structured logging initialization
pub mod logging;

/// Bearer token resolution and scope checks
pub mod middleware;

/// Domain models shared across the store and the routes
pub mod models;

/// The authorize and token flow engines and the attempt counter
pub mod oauth;

/// Shared server state handed to every route
pub mod resources;

/// `HTTP` routes organized by domain
pub mod routes;

/// Scope and scope-flag vocabulary
pub mod scopes;

/// Redirection URI normalization and classification
pub mod uri;
