// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared wiring for integration tests: one tenant, in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use antbox_core::application::audit_trail::AuditTrail;
use antbox_core::application::workflow_service::LoggingActionRunner;
use antbox_core::application::{NodeService, PathResolver, WorkflowService};
use antbox_core::domain::auth::{AuthMode, AuthenticationContext, Principal};
use antbox_core::domain::workflow::ActionRunner;
use antbox_core::infrastructure::event_bus::EventBus;
use antbox_core::infrastructure::path_cache::{PathCache, PathCacheConfig};
use antbox_core::infrastructure::repositories::{
    InMemoryConfigurationRepository, InMemoryEventStore, InMemoryNodeRepository,
    InMemoryWorkflowInstanceRepository,
};
use antbox_core::infrastructure::storage::InMemoryStorageProvider;

pub const TENANT: &str = "acme";

pub struct TestEngine {
    pub nodes: Arc<NodeService>,
    pub resolver: Arc<PathResolver>,
    pub workflows: Arc<WorkflowService>,
    pub cache: Arc<PathCache>,
    pub storage: Arc<InMemoryStorageProvider>,
    pub event_store: Arc<InMemoryEventStore>,
    pub bus: Arc<EventBus>,
}

pub fn engine() -> TestEngine {
    engine_with_runner(Arc::new(LoggingActionRunner))
}

pub fn engine_with_runner(runner: Arc<dyn ActionRunner>) -> TestEngine {
    let bus = Arc::new(EventBus::with_default_capacity());
    let storage = Arc::new(InMemoryStorageProvider::new());
    let event_store = Arc::new(InMemoryEventStore::new());

    let nodes = Arc::new(NodeService::new(
        TENANT,
        Arc::new(InMemoryNodeRepository::new()),
        storage.clone(),
        bus.clone(),
        Arc::new(InMemoryConfigurationRepository::new()),
    ));

    let cache = Arc::new(PathCache::new(PathCacheConfig {
        max_entries: 256,
        ttl: Duration::from_secs(60),
        user_isolation: false,
        sweep_interval: Duration::from_secs(60),
    }));
    let resolver = Arc::new(PathResolver::new(nodes.clone(), cache.clone()));
    let _invalidation = resolver.clone().start_invalidation_listener();

    let workflows = Arc::new(WorkflowService::new(
        nodes.clone(),
        Arc::new(InMemoryWorkflowInstanceRepository::new()),
        runner,
    ));

    let audit = Arc::new(AuditTrail::new(event_store.clone(), bus.clone(), TENANT));
    let _audit_task = audit.start();

    TestEngine {
        nodes,
        resolver,
        workflows,
        cache,
        storage,
        event_store,
        bus,
    }
}

pub fn admin() -> AuthenticationContext {
    AuthenticationContext::system(TENANT)
}

pub fn user(email: &str, groups: &[&str]) -> AuthenticationContext {
    AuthenticationContext::new(
        TENANT,
        AuthMode::Direct,
        Principal::new(email, groups.iter().map(|g| g.to_string()).collect()),
    )
}

/// Let spawned bus subscribers (cache invalidation, audit) catch up
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}
