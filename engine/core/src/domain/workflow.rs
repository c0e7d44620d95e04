// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow Domain Model
//!
//! Workflow definitions are declarative finite state machines anchored to
//! nodes. A running instance embeds a snapshot of its definition taken at
//! start time, so editing a definition never reshapes in-flight work.
//! Transitions are guarded by node filters and principal groups; the
//! attached node stays locked for the instance's lifetime.
//!
//! # Invariants
//! - A definition has at least one state and exactly one initial state
//! - State names are unique; every transition target names an existing state
//! - A cancelled instance accepts no further transitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::AntboxError;
use crate::domain::filter::NodeFilters;

// ============================================================================
// Definition
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTransition {
    pub signal: String,
    pub target_state: String,
    /// Additional node guard evaluated against the attached node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<NodeFilters>,
    /// Feature UUIDs executed between onExit and onEnter
    #[serde(default)]
    pub actions: Vec<String>,
    /// Groups allowed to fire this signal; empty means anyone who can see
    /// the instance
    #[serde(default)]
    pub groups_allowed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub name: String,
    #[serde(default)]
    pub is_initial: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub on_enter: Vec<String>,
    #[serde(default)]
    pub on_exit: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<WorkflowTransition>,
}

/// Workflow definition aggregate. Immutable once constructed; `new`
/// enforces the structural invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub uuid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub states: Vec<WorkflowState>,
    /// Applicability: which nodes this workflow may be started on
    #[serde(default)]
    pub filters: NodeFilters,
    /// Groups allowed to see and drive instances; empty means everyone
    #[serde(default)]
    pub groups_allowed: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        states: Vec<WorkflowState>,
        filters: NodeFilters,
        groups_allowed: Vec<String>,
    ) -> Result<Self, AntboxError> {
        if states.is_empty() {
            return Err(AntboxError::BadRequest(
                "workflow definition needs at least one state".into(),
            ));
        }
        let initial_count = states.iter().filter(|s| s.is_initial).count();
        if initial_count != 1 {
            return Err(AntboxError::BadRequest(format!(
                "workflow definition needs exactly one initial state, found {initial_count}"
            )));
        }
        for state in &states {
            if states.iter().filter(|s| s.name == state.name).count() > 1 {
                return Err(AntboxError::BadRequest(format!(
                    "duplicate state name: {}",
                    state.name
                )));
            }
            for transition in &state.transitions {
                if !states.iter().any(|s| s.name == transition.target_state) {
                    return Err(AntboxError::BadRequest(format!(
                        "transition '{}' from state '{}' targets unknown state '{}'",
                        transition.signal, state.name, transition.target_state
                    )));
                }
            }
        }

        Ok(Self {
            uuid: uuid.into(),
            name: name.into(),
            description: None,
            states,
            filters,
            groups_allowed,
        })
    }

    pub fn available_state_names(&self) -> Vec<String> {
        self.states.iter().map(|s| s.name.clone()).collect()
    }

    pub fn initial_state(&self) -> &WorkflowState {
        self.states
            .iter()
            .find(|s| s.is_initial)
            .expect("invariant: exactly one initial state")
    }

    pub fn state(&self, name: &str) -> Option<&WorkflowState> {
        self.states.iter().find(|s| s.name == name)
    }

    /// Built-in document approval chain:
    /// Draft → ManagerReview → FinanceReview → Approved, with a reject at
    /// FinanceReview returning to Draft.
    pub fn document_approval() -> Self {
        let states = vec![
            WorkflowState {
                name: "Draft".into(),
                is_initial: true,
                is_final: false,
                on_enter: vec![],
                on_exit: vec![],
                transitions: vec![WorkflowTransition {
                    signal: "submit".into(),
                    target_state: "ManagerReview".into(),
                    filters: None,
                    actions: vec![],
                    groups_allowed: vec![],
                }],
            },
            WorkflowState {
                name: "ManagerReview".into(),
                is_initial: false,
                is_final: false,
                on_enter: vec![],
                on_exit: vec![],
                transitions: vec![
                    WorkflowTransition {
                        signal: "approve".into(),
                        target_state: "FinanceReview".into(),
                        filters: None,
                        actions: vec![],
                        groups_allowed: vec![],
                    },
                    WorkflowTransition {
                        signal: "reject".into(),
                        target_state: "Draft".into(),
                        filters: None,
                        actions: vec![],
                        groups_allowed: vec![],
                    },
                ],
            },
            WorkflowState {
                name: "FinanceReview".into(),
                is_initial: false,
                is_final: false,
                on_enter: vec![],
                on_exit: vec![],
                transitions: vec![
                    WorkflowTransition {
                        signal: "approve".into(),
                        target_state: "Approved".into(),
                        filters: None,
                        actions: vec![],
                        groups_allowed: vec![],
                    },
                    WorkflowTransition {
                        signal: "reject".into(),
                        target_state: "Draft".into(),
                        filters: None,
                        actions: vec![],
                        groups_allowed: vec![],
                    },
                ],
            },
            WorkflowState {
                name: "Approved".into(),
                is_initial: false,
                is_final: true,
                on_enter: vec![],
                on_exit: vec![],
                transitions: vec![],
            },
        ];
        Self::new(
            "--document-approval--",
            "document-approval",
            states,
            NodeFilters::empty(),
            vec![],
        )
        .expect("builtin definition is structurally valid")
    }
}

// ============================================================================
// Instance
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowHistoryEntry {
    pub signal: String,
    pub from_state: String,
    pub to_state: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

/// A running finite-state machine anchored to one node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub uuid: String,
    pub node_uuid: String,
    pub workflow_definition_uuid: String,
    /// Snapshot taken at start; definition edits never affect running
    /// instances
    pub workflow_definition: WorkflowDefinition,
    pub current_state_name: String,
    pub running: bool,
    pub cancelled: bool,
    #[serde(default)]
    pub history: Vec<WorkflowHistoryEntry>,
    #[serde(default)]
    pub groups_allowed: Vec<String>,
    pub owner: String,
    pub started_time: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn current_state(&self) -> Option<&WorkflowState> {
        self.workflow_definition.state(&self.current_state_name)
    }
}

/// Instance persistence port
#[async_trait]
pub trait WorkflowInstanceRepository: Send + Sync {
    async fn save(&self, instance: &WorkflowInstance) -> Result<(), AntboxError>;

    async fn get_by_uuid(&self, uuid: &str) -> Result<WorkflowInstance, AntboxError>;

    async fn find_by_node(&self, node_uuid: &str) -> Result<Option<WorkflowInstance>, AntboxError>;

    async fn find_running(&self) -> Result<Vec<WorkflowInstance>, AntboxError>;
}

/// Action execution port. The feature runtime is a collaborator outside the
/// core; transition semantics only require that a failing action aborts the
/// transition.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(&self, action_uuid: &str, node_uuid: &str) -> Result<(), AntboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_invariants() {
        let result = WorkflowDefinition::new(
            "wf-000001",
            "empty",
            vec![],
            NodeFilters::empty(),
            vec![],
        );
        assert!(matches!(result, Err(AntboxError::BadRequest(_))));

        let two_initials = vec![
            WorkflowState {
                name: "A".into(),
                is_initial: true,
                is_final: false,
                on_enter: vec![],
                on_exit: vec![],
                transitions: vec![],
            },
            WorkflowState {
                name: "B".into(),
                is_initial: true,
                is_final: true,
                on_enter: vec![],
                on_exit: vec![],
                transitions: vec![],
            },
        ];
        assert!(WorkflowDefinition::new(
            "wf-000002",
            "two-initials",
            two_initials,
            NodeFilters::empty(),
            vec![]
        )
        .is_err());
    }

    #[test]
    fn test_transition_targets_must_exist() {
        let states = vec![WorkflowState {
            name: "A".into(),
            is_initial: true,
            is_final: false,
            on_enter: vec![],
            on_exit: vec![],
            transitions: vec![WorkflowTransition {
                signal: "go".into(),
                target_state: "Missing".into(),
                filters: None,
                actions: vec![],
                groups_allowed: vec![],
            }],
        }];
        assert!(WorkflowDefinition::new(
            "wf-000003",
            "dangling",
            states,
            NodeFilters::empty(),
            vec![]
        )
        .is_err());
    }

    #[test]
    fn test_builtin_document_approval() {
        let definition = WorkflowDefinition::document_approval();
        assert_eq!(definition.initial_state().name, "Draft");
        assert_eq!(definition.available_state_names().len(), 4);
        let finance = definition.state("FinanceReview").unwrap();
        assert!(finance.transitions.iter().any(|t| t.signal == "reject"));
        assert!(definition.state("Approved").unwrap().is_final);
    }
}
