// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Permission Evaluation
//!
//! Each non-system node carries a permission vector:
//! `{ group, authenticated, anonymous, advanced }`. The evaluator resolves
//! effective permissions for a principal over a single node; ancestor
//! propagation (Read up the folder chain, Write on the immediate parent)
//! is enforced by the NodeService which owns repository access.
//!
//! Advanced entries are allow-only: evaluation unions grants and never
//! subtracts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::auth::Principal;
use crate::domain::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Read,
    Write,
    Export,
}

/// Permission vector stored on every node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub group: Vec<Permission>,
    #[serde(default)]
    pub authenticated: Vec<Permission>,
    #[serde(default)]
    pub anonymous: Vec<Permission>,
    #[serde(default)]
    pub advanced: HashMap<String, Vec<Permission>>,
}

impl Default for Permissions {
    /// Defaults applied when create metadata omits permissions: the owning
    /// group has full control, authenticated principals can read.
    fn default() -> Self {
        Self {
            group: vec![Permission::Read, Permission::Write, Permission::Export],
            authenticated: vec![Permission::Read],
            anonymous: Vec::new(),
            advanced: HashMap::new(),
        }
    }
}

impl Permissions {
    pub fn none() -> Self {
        Self {
            group: Vec::new(),
            authenticated: Vec::new(),
            anonymous: Vec::new(),
            advanced: HashMap::new(),
        }
    }

    /// Vector applied to the synthesized system folders
    pub fn system_defaults() -> Self {
        Self {
            group: vec![Permission::Read],
            authenticated: vec![Permission::Read],
            anonymous: Vec::new(),
            advanced: HashMap::new(),
        }
    }
}

/// Resolve whether `principal` holds `permission` on `node`.
///
/// Resolution order: admin override, owner, anonymous/authenticated band,
/// owning-group union, advanced union. Lock handling (rule 7) is separate:
/// see [`write_blocked_by_lock`].
pub fn can(principal: &Principal, node: &Node, permission: Permission) -> bool {
    if principal.is_admin() {
        return true;
    }
    if !principal.is_anonymous() && principal.email == node.owner {
        return true;
    }

    let mut granted = if principal.is_anonymous() {
        node.permissions.anonymous.clone()
    } else {
        node.permissions.authenticated.clone()
    };

    if principal.groups.iter().any(|g| *g == node.group) {
        granted.extend(node.permissions.group.iter().copied());
    }
    for g in &principal.groups {
        if let Some(extra) = node.permissions.advanced.get(g) {
            granted.extend(extra.iter().copied());
        }
    }

    granted.contains(&permission)
}

/// Rule 7: write operations on a locked node are limited to the locking
/// principal, the designated unlock groups and admins.
pub fn write_blocked_by_lock(principal: &Principal, node: &Node) -> bool {
    if !node.locked {
        return false;
    }
    if principal.is_admin() {
        return false;
    }
    if node
        .locked_by
        .as_deref()
        .is_some_and(|by| by == principal.email)
    {
        return false;
    }
    !principal
        .groups
        .iter()
        .any(|g| node.unlock_authorized_groups.contains(g))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::{Node, NodePayload};

    fn file_node(owner: &str, group: &str, permissions: Permissions) -> Node {
        let mut node = Node::scaffold("file-0001", "report.txt", "text/plain");
        node.owner = owner.to_string();
        node.group = group.to_string();
        node.permissions = permissions;
        node.payload = NodePayload::File(Default::default());
        node
    }

    #[test]
    fn test_owner_has_all_permissions() {
        let node = file_node("alice@example.com", "staff", Permissions::none());
        let alice = Principal::new("alice@example.com", vec![]);
        assert!(can(&alice, &node, Permission::Read));
        assert!(can(&alice, &node, Permission::Write));
        assert!(can(&alice, &node, Permission::Export));
    }

    #[test]
    fn test_admin_bypasses_everything() {
        let node = file_node("alice@example.com", "staff", Permissions::none());
        let admin = Principal::new("ops@example.com", vec!["--admins--".to_string()]);
        assert!(can(&admin, &node, Permission::Write));
    }

    #[test]
    fn test_authenticated_band() {
        let node = file_node("alice@example.com", "staff", Permissions::default());
        let bob = Principal::new("bob@example.com", vec!["sales".to_string()]);
        assert!(can(&bob, &node, Permission::Read));
        assert!(!can(&bob, &node, Permission::Write));
    }

    #[test]
    fn test_anonymous_band() {
        let mut perms = Permissions::none();
        perms.anonymous = vec![Permission::Read];
        let node = file_node("alice@example.com", "staff", perms);
        assert!(can(&Principal::anonymous(), &node, Permission::Read));
        assert!(!can(&Principal::anonymous(), &node, Permission::Write));
    }

    #[test]
    fn test_group_union() {
        let node = file_node("alice@example.com", "staff", Permissions::default());
        let carol = Principal::new("carol@example.com", vec!["staff".to_string()]);
        assert!(can(&carol, &node, Permission::Write));
        assert!(can(&carol, &node, Permission::Export));
    }

    #[test]
    fn test_advanced_union() {
        let mut perms = Permissions::none();
        perms
            .advanced
            .insert("auditors".to_string(), vec![Permission::Export]);
        let node = file_node("alice@example.com", "staff", perms);
        let dan = Principal::new("dan@example.com", vec!["auditors".to_string()]);
        assert!(can(&dan, &node, Permission::Export));
        assert!(!can(&dan, &node, Permission::Read));
    }

    #[test]
    fn test_lock_rule() {
        let mut node = file_node("alice@example.com", "staff", Permissions::default());
        node.locked = true;
        node.locked_by = Some("alice@example.com".to_string());
        node.unlock_authorized_groups = vec!["editors".to_string()];

        let alice = Principal::new("alice@example.com", vec![]);
        let editor = Principal::new("eve@example.com", vec!["editors".to_string()]);
        let bob = Principal::new("bob@example.com", vec!["sales".to_string()]);
        let admin = Principal::root();

        assert!(!write_blocked_by_lock(&alice, &node));
        assert!(!write_blocked_by_lock(&editor, &node));
        assert!(!write_blocked_by_lock(&admin, &node));
        assert!(write_blocked_by_lock(&bob, &node));

        node.locked = false;
        assert!(!write_blocked_by_lock(&bob, &node));
    }
}
