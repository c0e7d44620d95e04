// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow Engine
//!
//! Starts, transitions and cancels workflow instances. Starting snapshots
//! the definition into the instance and locks the target node with empty
//! unlock groups, so only the engine (and admins) can release it; the lock
//! is released on terminal transitions and cancellation. Action execution
//! order within a transition is onExit → transition actions → onEnter, and
//! any action failure aborts the transition with the instance left in the
//! prior state.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::application::node_service::NodeService;
use crate::domain::auth::AuthenticationContext;
use crate::domain::errors::AntboxError;
use crate::domain::events::DomainEvent;
use crate::domain::node::Node;
use crate::domain::system;
use crate::domain::workflow::{
    ActionRunner, WorkflowDefinition, WorkflowHistoryEntry, WorkflowInstance,
    WorkflowInstanceRepository, WorkflowState, WorkflowTransition,
};

/// Default action runner: records the call and succeeds. The feature
/// runtime that actually executes actions is an external collaborator.
pub struct LoggingActionRunner;

#[async_trait::async_trait]
impl ActionRunner for LoggingActionRunner {
    async fn run(&self, action_uuid: &str, node_uuid: &str) -> Result<(), AntboxError> {
        info!(action = %action_uuid, node = %node_uuid, "workflow action executed");
        Ok(())
    }
}

pub struct WorkflowService {
    service: Arc<NodeService>,
    instances: Arc<dyn WorkflowInstanceRepository>,
    definitions: DashMap<String, WorkflowDefinition>,
    action_runner: Arc<dyn ActionRunner>,
}

impl WorkflowService {
    pub fn new(
        service: Arc<NodeService>,
        instances: Arc<dyn WorkflowInstanceRepository>,
        action_runner: Arc<dyn ActionRunner>,
    ) -> Self {
        let definitions = DashMap::new();
        let builtin = WorkflowDefinition::document_approval();
        definitions.insert(builtin.uuid.clone(), builtin);
        Self {
            service,
            instances,
            definitions,
            action_runner,
        }
    }

    pub fn register_definition(&self, definition: WorkflowDefinition) {
        self.definitions
            .insert(definition.uuid.clone(), definition);
    }

    pub fn definition(&self, uuid: &str) -> Option<WorkflowDefinition> {
        self.definitions.get(uuid).map(|d| d.clone())
    }

    pub fn list_definitions(&self) -> Vec<WorkflowDefinition> {
        self.definitions.iter().map(|d| d.clone()).collect()
    }

    // ========================================================================
    // Start
    // ========================================================================

    #[instrument(skip(self, ctx))]
    pub async fn start(
        &self,
        ctx: &AuthenticationContext,
        definition_uuid: &str,
        node_uuid: &str,
    ) -> Result<WorkflowInstance, AntboxError> {
        let definition = self
            .definition(definition_uuid)
            .ok_or_else(|| AntboxError::NodeNotFound(definition_uuid.to_string()))?;

        if !groups_permit(&definition.groups_allowed, ctx) {
            return Err(AntboxError::Forbidden(format!(
                "workflow {} is restricted to other groups",
                definition.name
            )));
        }

        let node = self.service.get(ctx, node_uuid).await?;
        if node.workflow_instance_uuid.is_some() {
            return Err(AntboxError::BadRequest(format!(
                "node {node_uuid} is already bound to a workflow instance"
            )));
        }
        if let Some(running) = self.instances.find_by_node(node_uuid).await? {
            return Err(AntboxError::BadRequest(format!(
                "node {node_uuid} is already bound to instance {}",
                running.uuid
            )));
        }
        if node.locked {
            return Err(AntboxError::Forbidden(format!(
                "node {node_uuid} is locked and cannot enter a workflow"
            )));
        }
        if !definition.filters.is_empty() && !definition.filters.is_satisfied_by(&node.metadata()) {
            return Err(AntboxError::BadRequest(format!(
                "node {node_uuid} does not satisfy the workflow's filters"
            )));
        }

        let initial_state = definition.initial_state().name.clone();
        let instance = WorkflowInstance {
            uuid: uuid::Uuid::new_v4().simple().to_string(),
            node_uuid: node_uuid.to_string(),
            workflow_definition_uuid: definition.uuid.clone(),
            workflow_definition: definition.clone(),
            current_state_name: initial_state.clone(),
            running: true,
            cancelled: false,
            history: Vec::new(),
            groups_allowed: definition.groups_allowed.clone(),
            owner: ctx.principal.email.clone(),
            started_time: Utc::now(),
        };

        // Lock first; a lock acquisition failure rolls the start back
        // before anything is persisted
        self.service
            .bind_workflow(
                node_uuid,
                &instance.uuid,
                &initial_state,
                system::ROOT_USER_EMAIL,
            )
            .await?;

        if let Err(e) = self.instances.save(&instance).await {
            let _ = self.service.release_workflow(node_uuid).await;
            return Err(e);
        }

        self.service.bus().publish(DomainEvent::WorkflowStarted {
            tenant: self.service.tenant().to_string(),
            instance_uuid: instance.uuid.clone(),
            node_uuid: node_uuid.to_string(),
            definition_uuid: definition.uuid.clone(),
            occurred_at: Utc::now(),
        });

        Ok(instance)
    }

    // ========================================================================
    // Transition
    // ========================================================================

    #[instrument(skip(self, ctx))]
    pub async fn transition(
        &self,
        ctx: &AuthenticationContext,
        instance_uuid: &str,
        signal: &str,
    ) -> Result<WorkflowInstance, AntboxError> {
        let mut instance = self.instances.get_by_uuid(instance_uuid).await?;
        if instance.cancelled {
            return Err(AntboxError::BadRequest(format!(
                "instance {instance_uuid} is cancelled"
            )));
        }
        if !instance.running {
            return Err(AntboxError::BadRequest(format!(
                "instance {instance_uuid} has finished"
            )));
        }
        if !groups_permit(&instance.groups_allowed, ctx) {
            return Err(AntboxError::Forbidden(
                "instance is restricted to other groups".into(),
            ));
        }

        let current_state = instance
            .current_state()
            .cloned()
            .ok_or_else(|| {
                AntboxError::Unknown(format!(
                    "instance {} is in unknown state {}",
                    instance.uuid, instance.current_state_name
                ))
            })?;

        let transition = current_state
            .transitions
            .iter()
            .find(|t| t.signal == signal)
            .cloned()
            .ok_or_else(|| {
                AntboxError::BadRequest(format!(
                    "state {} has no transition for signal '{signal}'",
                    current_state.name
                ))
            })?;

        if !groups_permit(&transition.groups_allowed, ctx) {
            return Err(AntboxError::Forbidden(format!(
                "signal '{signal}' is restricted to other groups"
            )));
        }

        let node = self.service.get(ctx, &instance.node_uuid).await?;
        if let Some(filters) = &transition.filters {
            if !filters.is_empty() && !filters.is_satisfied_by(&node.metadata()) {
                return Err(AntboxError::BadRequest(format!(
                    "node {} does not satisfy the transition's filters",
                    node.uuid
                )));
            }
        }

        let target_state = instance
            .workflow_definition
            .state(&transition.target_state)
            .cloned()
            .ok_or_else(|| {
                AntboxError::Unknown(format!(
                    "transition targets unknown state {}",
                    transition.target_state
                ))
            })?;

        // onExit → transition actions → onEnter; any failure aborts with
        // the instance left in the prior state
        self.run_actions(&current_state.on_exit, &node).await?;
        self.run_actions(&transition.actions, &node).await?;
        self.run_actions(&target_state.on_enter, &node).await?;

        instance.history.push(WorkflowHistoryEntry {
            signal: signal.to_string(),
            from_state: current_state.name.clone(),
            to_state: target_state.name.clone(),
            actor: ctx.principal.email.clone(),
            occurred_at: Utc::now(),
        });
        instance.current_state_name = target_state.name.clone();
        if target_state.is_final {
            instance.running = false;
        }

        self.instances.save(&instance).await?;

        if target_state.is_final {
            self.service.release_workflow(&instance.node_uuid).await?;
        } else {
            self.service
                .set_workflow_state(&instance.node_uuid, &target_state.name)
                .await?;
        }

        self.service
            .bus()
            .publish(DomainEvent::WorkflowTransitioned {
                tenant: self.service.tenant().to_string(),
                instance_uuid: instance.uuid.clone(),
                node_uuid: instance.node_uuid.clone(),
                signal: signal.to_string(),
                from_state: current_state.name.clone(),
                to_state: target_state.name.clone(),
                occurred_at: Utc::now(),
            });

        Ok(instance)
    }

    async fn run_actions(&self, actions: &[String], node: &Node) -> Result<(), AntboxError> {
        for action in actions {
            self.action_runner.run(action, &node.uuid).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Cancel / visibility
    // ========================================================================

    /// Explicit cancellation by the instance owner or an admin unlocks the
    /// node and clears its workflow fields
    #[instrument(skip(self, ctx))]
    pub async fn cancel(
        &self,
        ctx: &AuthenticationContext,
        instance_uuid: &str,
    ) -> Result<(), AntboxError> {
        let mut instance = self.instances.get_by_uuid(instance_uuid).await?;
        if !ctx.principal.is_admin() && ctx.principal.email != instance.owner {
            return Err(AntboxError::Forbidden(
                "only the owner or an admin may cancel a workflow instance".into(),
            ));
        }
        if instance.cancelled {
            return Ok(());
        }
        instance.cancelled = true;
        instance.running = false;
        self.instances.save(&instance).await?;
        self.service.release_workflow(&instance.node_uuid).await?;
        Ok(())
    }

    pub async fn get_instance(
        &self,
        ctx: &AuthenticationContext,
        instance_uuid: &str,
    ) -> Result<WorkflowInstance, AntboxError> {
        let instance = self.instances.get_by_uuid(instance_uuid).await?;
        if ctx.principal.is_admin() || self.is_visible(&instance, ctx) {
            Ok(instance)
        } else {
            Err(AntboxError::Forbidden(
                "instance is not visible to this principal".into(),
            ))
        }
    }

    /// Running instances the principal may see: group-permitted, and with
    /// at least one transition the principal could fire from the current
    /// state
    pub async fn visible_instances(
        &self,
        ctx: &AuthenticationContext,
    ) -> Result<Vec<WorkflowInstance>, AntboxError> {
        let running = self.instances.find_running().await?;
        if ctx.principal.is_admin() {
            return Ok(running);
        }
        Ok(running
            .into_iter()
            .filter(|instance| self.is_visible(instance, ctx))
            .collect())
    }

    fn is_visible(&self, instance: &WorkflowInstance, ctx: &AuthenticationContext) -> bool {
        if !groups_permit(&instance.groups_allowed, ctx) {
            return false;
        }
        instance
            .current_state()
            .map(|state| has_performable_transition(state, ctx))
            .unwrap_or(false)
    }
}

fn groups_permit(allowed: &[String], ctx: &AuthenticationContext) -> bool {
    if ctx.principal.is_admin() || allowed.is_empty() {
        return true;
    }
    ctx.principal.groups.iter().any(|g| allowed.contains(g))
}

fn has_performable_transition(state: &WorkflowState, ctx: &AuthenticationContext) -> bool {
    state
        .transitions
        .iter()
        .any(|t: &WorkflowTransition| groups_permit(&t.groups_allowed, ctx))
}
