// ABOUTME: Scope and scope-flag model with validated parsing and set operations
// ABOUTME: Defines the fixed user-data/app scope enumeration used across authorizations
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Scope model.
//!
//! A [`Scope`] names a category of user data a client may access, or an
//! app-level capability. A [`ScopeFlag`] refines behavior within a scope
//! and is only valid when its required scope is present. Both are fixed
//! enumerations: unknown names are rejected at parse time, carrying the
//! offending name so validation errors stay actionable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scope validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("unknown scope: {0}")]
    UnknownScope(String),
    #[error("unknown scope flag: {0}")]
    UnknownFlag(String),
    #[error("scope flag {flag} requires scope {required}")]
    FlagRequiresScope { flag: ScopeFlag, required: Scope },
}

/// A named category of user data, or an app-level capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    FirstName,
    LastName,
    Emails,
    Addresses,
    PhoneNumbers,
    Timezone,
    /// First-party application session (password grant).
    App,
    /// Developer capabilities within a first-party session.
    AppDeveloper,
    /// Client-only session with no user attached (client_credentials).
    UnauthenticatedApp,
}

impl Scope {
    /// Wire and storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Emails => "emails",
            Self::Addresses => "addresses",
            Self::PhoneNumbers => "phone_numbers",
            Self::Timezone => "timezone",
            Self::App => "app",
            Self::AppDeveloper => "app_developer",
            Self::UnauthenticatedApp => "unauthenticated_app",
        }
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first_name" => Ok(Self::FirstName),
            "last_name" => Ok(Self::LastName),
            "emails" => Ok(Self::Emails),
            "addresses" => Ok(Self::Addresses),
            "phone_numbers" => Ok(Self::PhoneNumbers),
            "timezone" => Ok(Self::Timezone),
            "app" => Ok(Self::App),
            "app_developer" => Ok(Self::AppDeveloper),
            "unauthenticated_app" => Ok(Self::UnauthenticatedApp),
            other => Err(ScopeError::UnknownScope(other.to_owned())),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sub-option refining behavior within a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeFlag {
    /// Request distinct shipping and billing addresses instead of one.
    SeparateShippingBilling,
    /// Accept a landline in addition to mobile numbers.
    LandlinePhoneNumber,
    /// Share only the main email address.
    MainEmailOnly,
}

impl ScopeFlag {
    /// Wire and storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SeparateShippingBilling => "separate_shipping_billing",
            Self::LandlinePhoneNumber => "landline_phone_number",
            Self::MainEmailOnly => "main_email_only",
        }
    }

    /// The scope that must be present for this flag to be valid.
    #[must_use]
    pub const fn required_scope(self) -> Scope {
        match self {
            Self::SeparateShippingBilling => Scope::Addresses,
            Self::LandlinePhoneNumber => Scope::PhoneNumbers,
            Self::MainEmailOnly => Scope::Emails,
        }
    }
}

impl FromStr for ScopeFlag {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "separate_shipping_billing" => Ok(Self::SeparateShippingBilling),
            "landline_phone_number" => Ok(Self::LandlinePhoneNumber),
            "main_email_only" => Ok(Self::MainEmailOnly),
            other => Err(ScopeError::UnknownFlag(other.to_owned())),
        }
    }
}

impl fmt::Display for ScopeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered, deduplicated set of scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(Vec<Scope>);

impl ScopeSet {
    /// Empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Parse a space-separated scope string. Every name must validate.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::UnknownScope`] naming the first unknown scope.
    pub fn parse(input: &str) -> Result<Self, ScopeError> {
        let mut set = Self::new();
        for name in input.split_whitespace() {
            set.insert(name.parse()?);
        }
        Ok(set)
    }

    /// Insert, keeping order and dropping duplicates.
    pub fn insert(&mut self, scope: Scope) {
        if !self.0.contains(&scope) {
            self.0.push(scope);
        }
    }

    #[must_use]
    pub fn contains(&self, scope: Scope) -> bool {
        self.0.contains(&scope)
    }

    /// True when any of `scopes` is present.
    #[must_use]
    pub fn contains_any(&self, scopes: &[Scope]) -> bool {
        scopes.iter().any(|s| self.contains(*s))
    }

    /// True when the two sets share at least one scope.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.0.iter().any(|s| other.contains(*s))
    }

    /// True when every scope in `self` is present in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.0.iter().all(|s| other.contains(*s))
    }

    /// Union preserving the order of `self` then new entries of `other`.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for scope in &other.0 {
            merged.insert(*scope);
        }
        merged
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&joined)
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = Scope>>(iter: T) -> Self {
        let mut set = Self::new();
        for scope in iter {
            set.insert(scope);
        }
        set
    }
}

/// An ordered, deduplicated set of scope flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFlagSet(Vec<ScopeFlag>);

impl ScopeFlagSet {
    /// Empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Parse a space-separated flag string.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::UnknownFlag`] naming the first unknown flag.
    pub fn parse(input: &str) -> Result<Self, ScopeError> {
        let mut set = Self::new();
        for name in input.split_whitespace() {
            set.insert(name.parse()?);
        }
        Ok(set)
    }

    /// Insert, keeping order and dropping duplicates.
    pub fn insert(&mut self, flag: ScopeFlag) {
        if !self.0.contains(&flag) {
            self.0.push(flag);
        }
    }

    #[must_use]
    pub fn contains(&self, flag: ScopeFlag) -> bool {
        self.0.contains(&flag)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ScopeFlag> + '_ {
        self.0.iter().copied()
    }

    /// Validate that each flag's required scope is present in `scope`.
    ///
    /// Runs both at redirection-URI creation and at authorization
    /// creation (where the requested scope may be a subset of the
    /// registered one, never a superset).
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::FlagRequiresScope`] for the first flag whose
    /// required scope is absent.
    pub fn validate_against(&self, scope: &ScopeSet) -> Result<(), ScopeError> {
        for flag in &self.0 {
            let required = flag.required_scope();
            if !scope.contains(required) {
                return Err(ScopeError::FlagRequiresScope {
                    flag: *flag,
                    required,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for ScopeFlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&joined)
    }
}
