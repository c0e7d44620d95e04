// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tenant Registry & Provider Loader
//!
//! Each tenant owns its repository and storage provider instances —
//! tenancy is structural, not filter-injected. A tenant's provider
//! configuration is a tuple `[kind, …params]` resolved against the
//! registry of built-in factories; an unknown kind fails fast at boot.
//!
//! The path cache is shared across tenants (entries are tenant-keyed);
//! the event bus is engine-wide so cross-cutting subscribers (audit
//! trail, cache invalidation, mirroring storage providers) see one
//! stream.

use anyhow::{anyhow, bail, Context, Result};
use dashmap::DashMap;
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::application::audit_trail::AuditTrail;
use crate::application::node_service::NodeService;
use crate::application::path_resolver::PathResolver;
use crate::application::workflow_service::{LoggingActionRunner, WorkflowService};
use crate::domain::repository::{ConfigurationRepository, NodeRepository};
use crate::domain::storage::StorageProvider;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::path_cache::{PathCache, PathCacheConfig};
use crate::infrastructure::repositories::postgres_event_store::PostgresEventStore;
use crate::infrastructure::repositories::postgres_node::PostgresNodeRepository;
use crate::infrastructure::repositories::{
    InMemoryConfigurationRepository, InMemoryEventStore, InMemoryNodeRepository,
    InMemoryWorkflowInstanceRepository,
};
use crate::infrastructure::storage::local::LocalStorageProvider;
use crate::infrastructure::storage::InMemoryStorageProvider;

/// A provider configuration tuple: `[kind, …params]`
pub type ProviderSpec = Vec<String>;

#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    pub name: String,
    /// e.g. `["inmem"]` or `["postgres", "postgres://…"]`
    #[serde(default)]
    pub repository: Option<ProviderSpec>,
    /// e.g. `["inmem"]` or `["local", "/var/lib/antbox/blobs"]`
    #[serde(default)]
    pub storage: Option<ProviderSpec>,
    /// e.g. `["inmem"]` or `["postgres", "postgres://…"]`
    #[serde(default)]
    pub event_store: Option<ProviderSpec>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PathCacheSettings {
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub user_isolation: Option<bool>,
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

impl PathCacheSettings {
    fn to_config(&self) -> PathCacheConfig {
        let defaults = PathCacheConfig::default();
        PathCacheConfig {
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            ttl: self
                .ttl_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.ttl),
            user_isolation: self.user_isolation.unwrap_or(defaults.user_isolation),
            sweep_interval: self
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub tenants: Vec<TenantConfig>,
    #[serde(default)]
    pub path_cache: PathCacheSettings,
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("failed to parse engine configuration")
    }

    /// Single in-memory tenant, the development default
    pub fn single_tenant(name: impl Into<String>) -> Self {
        Self {
            tenants: vec![TenantConfig {
                name: name.into(),
                repository: None,
                storage: None,
                event_store: None,
            }],
            path_cache: PathCacheSettings::default(),
        }
    }
}

/// Everything wired for one tenant
pub struct TenantServices {
    pub node_service: Arc<NodeService>,
    pub path_resolver: Arc<PathResolver>,
    pub workflow_service: Arc<WorkflowService>,
}

pub struct TenantRegistry {
    tenants: DashMap<String, Arc<TenantServices>>,
    bus: Arc<EventBus>,
    cache: Arc<PathCache>,
}

impl TenantRegistry {
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        let bus = Arc::new(EventBus::with_default_capacity());
        let cache = Arc::new(PathCache::new(config.path_cache.to_config()));
        let _sweeper = cache.clone().start_sweeper();

        let registry = Self {
            tenants: DashMap::new(),
            bus: bus.clone(),
            cache,
        };
        for tenant in &config.tenants {
            let services = registry.build_tenant(tenant).await?;
            registry
                .tenants
                .insert(tenant.name.clone(), Arc::new(services));
            info!(tenant = %tenant.name, "tenant wired");
        }
        Ok(registry)
    }

    pub fn tenant(&self, name: &str) -> Option<Arc<TenantServices>> {
        self.tenants.get(name).map(|t| t.clone())
    }

    pub fn tenant_names(&self) -> Vec<String> {
        self.tenants.iter().map(|t| t.key().clone()).collect()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn cache(&self) -> &Arc<PathCache> {
        &self.cache
    }

    async fn build_tenant(&self, config: &TenantConfig) -> Result<TenantServices> {
        let repository = build_repository(config.repository.as_deref()).await?;
        let storage = build_storage(config.storage.as_deref())?;
        storage.start_listeners(self.bus.raw_subscribe());

        let configuration: Arc<dyn ConfigurationRepository> =
            Arc::new(InMemoryConfigurationRepository::new());

        let node_service = Arc::new(NodeService::new(
            config.name.clone(),
            repository,
            storage,
            self.bus.clone(),
            configuration,
        ));

        let path_resolver = Arc::new(PathResolver::new(
            node_service.clone(),
            self.cache.clone(),
        ));
        let _invalidation = path_resolver.clone().start_invalidation_listener();

        let workflow_service = Arc::new(WorkflowService::new(
            node_service.clone(),
            Arc::new(InMemoryWorkflowInstanceRepository::new()),
            Arc::new(LoggingActionRunner),
        ));

        let event_store = build_event_store(config.event_store.as_deref()).await?;
        let audit = Arc::new(AuditTrail::new(
            event_store,
            self.bus.clone(),
            config.name.clone(),
        ));
        let _audit_task = audit.start();

        Ok(TenantServices {
            node_service,
            path_resolver,
            workflow_service,
        })
    }
}

async fn build_repository(spec: Option<&[String]>) -> Result<Arc<dyn NodeRepository>> {
    match spec {
        None => Ok(Arc::new(InMemoryNodeRepository::new())),
        Some([kind]) if kind == "inmem" => Ok(Arc::new(InMemoryNodeRepository::new())),
        Some([kind, connection_string]) if kind == "postgres" => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(connection_string)
                .await
                .context("failed to connect node repository pool")?;
            let repository = PostgresNodeRepository::new(pool);
            repository
                .ensure_schema()
                .await
                .map_err(|e| anyhow!("failed to ensure node schema: {e}"))?;
            Ok(Arc::new(repository))
        }
        Some(other) => bail!("unknown repository provider spec: {other:?}"),
    }
}

fn build_storage(spec: Option<&[String]>) -> Result<Arc<dyn StorageProvider>> {
    match spec {
        None => Ok(Arc::new(InMemoryStorageProvider::new())),
        Some([kind]) if kind == "inmem" => Ok(Arc::new(InMemoryStorageProvider::new())),
        Some([kind, base_path]) if kind == "local" => {
            let provider = LocalStorageProvider::new(base_path.as_str())
                .map_err(|e| anyhow!("failed to initialise local storage: {e}"))?;
            Ok(Arc::new(provider))
        }
        Some(other) => bail!("unknown storage provider spec: {other:?}"),
    }
}

async fn build_event_store(
    spec: Option<&[String]>,
) -> Result<Arc<dyn crate::domain::event_store::EventStore>> {
    match spec {
        None => Ok(Arc::new(InMemoryEventStore::new())),
        Some([kind]) if kind == "inmem" => Ok(Arc::new(InMemoryEventStore::new())),
        Some([kind, connection_string]) if kind == "postgres" => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(connection_string)
                .await
                .context("failed to connect event store pool")?;
            let store = PostgresEventStore::new(pool);
            store
                .ensure_schema()
                .await
                .map_err(|e| anyhow!("failed to ensure event store schema: {e}"))?;
            Ok(Arc::new(store))
        }
        Some(other) => bail!("unknown event store provider spec: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_config_parsing() {
        let yaml = r#"
tenants:
  - name: acme
    repository: [inmem]
    storage: [inmem]
  - name: globex
path_cache:
  max_entries: 128
  ttl_ms: 1000
  user_isolation: true
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.tenants.len(), 2);
        assert_eq!(config.tenants[0].name, "acme");
        assert_eq!(config.path_cache.max_entries, Some(128));
        let cache_config = config.path_cache.to_config();
        assert!(cache_config.user_isolation);
        assert_eq!(cache_config.ttl, Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_registry_wires_tenants() {
        let config = EngineConfig::single_tenant("acme");
        let registry = TenantRegistry::from_config(&config).await.unwrap();
        assert!(registry.tenant("acme").is_some());
        assert!(registry.tenant("missing").is_none());
    }

    #[tokio::test]
    async fn test_unknown_provider_kind_fails_fast() {
        let mut config = EngineConfig::single_tenant("acme");
        config.tenants[0].repository = Some(vec!["mongodb".to_string()]);
        assert!(TenantRegistry::from_config(&config).await.is_err());
    }
}
