// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Authentication Context
//!
//! Every service call carries an `AuthenticationContext`: the tenant being
//! addressed, the invocation mode, and the principal (email + groups)
//! making the request. Root and anonymous are synthetic principals that
//! never exist in the node graph.

use serde::{Deserialize, Serialize};

use crate::domain::system;

/// How the call entered the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    /// A user or API key calling a public surface directly
    Direct,
    /// A feature/action running on behalf of a user
    Action,
    /// An agent/RAG pipeline
    #[serde(rename = "AI")]
    Ai,
}

/// The authenticated user or anonymous identity making a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub email: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Principal {
    pub fn new(email: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            email: email.into(),
            groups,
        }
    }

    pub fn anonymous() -> Self {
        Self::new(system::ANONYMOUS_USER_EMAIL, Vec::new())
    }

    pub fn root() -> Self {
        Self::new(
            system::ROOT_USER_EMAIL,
            vec![system::uuids::ADMINS.to_string()],
        )
    }

    pub fn is_anonymous(&self) -> bool {
        self.email == system::ANONYMOUS_USER_EMAIL
    }

    pub fn is_root(&self) -> bool {
        self.email == system::ROOT_USER_EMAIL
    }

    pub fn is_admin(&self) -> bool {
        self.is_root() || self.groups.iter().any(|g| g == system::uuids::ADMINS)
    }

    /// Primary group: the first group the principal belongs to
    pub fn primary_group(&self) -> Option<&str> {
        self.groups.first().map(String::as_str)
    }
}

/// Input to every service call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationContext {
    pub tenant: String,
    pub mode: AuthMode,
    pub principal: Principal,
}

impl AuthenticationContext {
    pub fn new(tenant: impl Into<String>, mode: AuthMode, principal: Principal) -> Self {
        Self {
            tenant: tenant.into(),
            mode,
            principal,
        }
    }

    /// Root context for engine-internal operations (bootstrap, workflow
    /// lock management, event-driven maintenance)
    pub fn system(tenant: impl Into<String>) -> Self {
        Self::new(tenant, AuthMode::Direct, Principal::root())
    }

    pub fn anonymous(tenant: impl Into<String>) -> Self {
        Self::new(tenant, AuthMode::Direct, Principal::anonymous())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_admin() {
        assert!(Principal::root().is_admin());
        assert!(!Principal::anonymous().is_admin());
    }

    #[test]
    fn test_admins_group_membership() {
        let p = Principal::new("ops@example.com", vec!["--admins--".to_string()]);
        assert!(p.is_admin());
        let p = Principal::new("ops@example.com", vec!["editors".to_string()]);
        assert!(!p.is_admin());
    }
}
