// ABOUTME: Request middleware module organization
// ABOUTME: Bearer-token resolution and scope checks shared by protected routes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

mod access;

pub use access::{check_scope, resolve_bearer, AuthContext, CallSite};
