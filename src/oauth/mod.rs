// ABOUTME: OAuth2 flow engine module organization
// ABOUTME: Authorization flow, token exchange, and the credential attempt counter
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

pub mod attempts;
pub mod authorize;
pub mod token;
