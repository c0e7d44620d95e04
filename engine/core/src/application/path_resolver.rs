// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Path Resolver
//!
//! Maps hierarchical protocol paths (`/a/b/c.txt`) to nodes. Every request
//! would otherwise be an N-hop parent walk, so resolution is backed by the
//! LRU+TTL path cache. Cache hits are re-verified with a `get` on the
//! cached UUID before use — this bounds staleness and protects against
//! permission changes; it is never skipped.
//!
//! Invalidation runs on every mutation via an event-bus subscription:
//! created nodes invalidate their parent's entry, updates invalidate the
//! node (and both parents on a move, the parent subtree on a rename),
//! deletes invalidate the node as a prefix plus its parent.

use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::node_service::NodeService;
use crate::domain::auth::AuthenticationContext;
use crate::domain::errors::AntboxError;
use crate::domain::events::DomainEvent;
use crate::domain::filter::{FilterOperator, NodeFilter, NodeFilters};
use crate::domain::node::Node;
use crate::domain::system::uuids;
use crate::infrastructure::path_cache::PathCache;

pub struct PathResolver {
    service: Arc<NodeService>,
    cache: Arc<PathCache>,
}

impl PathResolver {
    pub fn new(service: Arc<NodeService>, cache: Arc<PathCache>) -> Self {
        Self { service, cache }
    }

    pub fn cache(&self) -> &Arc<PathCache> {
        &self.cache
    }

    /// Normalise to a leading-slash, no-trailing-slash form with empty
    /// segments collapsed
    pub fn normalize(path: &str) -> String {
        let mut normalized = String::from("/");
        normalized.push_str(
            &path
                .split('/')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("/"),
        );
        normalized
    }

    fn decode_segments(path: &str) -> Result<Vec<String>, AntboxError> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| {
                percent_decode_str(segment)
                    .decode_utf8()
                    .map(|s| s.to_string())
                    .map_err(|_| {
                        AntboxError::BadRequest(format!("invalid path segment: {segment}"))
                    })
            })
            .collect()
    }

    /// Resolve a path for a principal. Caches every intermediate
    /// resolution on the way down.
    pub async fn resolve(
        &self,
        ctx: &AuthenticationContext,
        path: &str,
    ) -> Result<Node, AntboxError> {
        let normalized = Self::normalize(path);
        if normalized == "/" {
            return self.service.get(ctx, uuids::ROOT).await;
        }
        let segments = Self::decode_segments(&normalized)?;

        // Deepest cached ancestor wins; each hit is re-verified through the
        // service so deleted/moved nodes and revoked permissions are caught.
        let tenant = self.service.tenant().to_string();
        let user = ctx.principal.email.clone();
        let mut current = self.service.get(ctx, uuids::ROOT).await?;
        let mut depth = 0usize;
        for i in (1..=segments.len()).rev() {
            let prefix = prefix_path(&segments, i);
            if let Some(hit) = self.cache.get(&tenant, &user, &prefix) {
                match self.service.get(ctx, &hit.uuid).await {
                    Ok(fresh) if fresh.title == segments[i - 1] => {
                        debug!(path = %prefix, "path cache hit");
                        current = fresh;
                        depth = i;
                        break;
                    }
                    Ok(_) | Err(AntboxError::NodeNotFound(_)) => {
                        // Entry went stale between mutation and invalidation
                        self.cache.invalidate_path(&tenant, &prefix);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // Walk the remaining segments by (title, parent) lookup
        for i in depth..segments.len() {
            let segment = &segments[i];
            let filters = NodeFilters::And(vec![
                NodeFilter::new("title", FilterOperator::Equal, segment.clone().into()),
                NodeFilter::new(
                    "parent",
                    FilterOperator::Equal,
                    current.uuid.clone().into(),
                ),
            ]);
            let result = self.service.find(ctx, &filters, 16, 1).await?;
            let mut candidates = result.nodes;

            let node = match candidates.len() {
                0 => {
                    return Err(AntboxError::NodeNotFound(format!(
                        "path not found: {normalized}"
                    )))
                }
                1 => candidates.remove(0),
                _ => {
                    // Duplicate titles under one parent: verify each
                    // candidate's full breadcrumb against the requested
                    // prefix
                    let wanted: Vec<&str> =
                        segments[..=i].iter().map(String::as_str).collect();
                    let mut matched = None;
                    for candidate in candidates {
                        let crumbs = self.service.breadcrumbs(ctx, &candidate.uuid).await?;
                        let titles: Vec<&str> = crumbs
                            .iter()
                            .skip(1) // root
                            .map(|n| n.title.as_str())
                            .collect();
                        if titles == wanted {
                            matched = Some(candidate);
                            break;
                        }
                    }
                    matched.ok_or_else(|| {
                        AntboxError::NodeNotFound(format!("path not found: {normalized}"))
                    })?
                }
            };

            let prefix = prefix_path(&segments, i + 1);
            self.cache.put(&tenant, &user, &prefix, node.clone());
            current = node;
        }

        Ok(current)
    }

    /// Spawn the invalidation task; one per resolver, tied to the tenant.
    /// The subscription is taken before the spawn so no mutation published
    /// after this call can be missed.
    pub fn start_invalidation_listener(self: Arc<Self>) -> JoinHandle<()> {
        let resolver = self;
        let mut receiver = resolver.service.bus().subscribe();
        let tenant = resolver.service.tenant().to_string();
        tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(crate::infrastructure::event_bus::EventBusError::Closed) => break,
                    Err(e) => {
                        warn!(error = %e, "path cache invalidation listener lagged");
                        continue;
                    }
                };
                if event.tenant() != tenant {
                    continue;
                }
                resolver.apply_invalidation(&tenant, &event);
            }
        })
    }

    fn apply_invalidation(&self, tenant: &str, event: &DomainEvent) {
        match event {
            DomainEvent::NodeCreated(e) => {
                // The parent folder gained a child
                self.cache.invalidate_by_uuid(tenant, &e.parent);
            }
            DomainEvent::NodeUpdated(e) => {
                self.cache.invalidate_subtree_by_uuid(tenant, &e.uuid);
                self.cache.invalidate_by_uuid(tenant, &e.parent);
                if let Some(old_parent) = &e.old_parent {
                    self.cache.invalidate_by_uuid(tenant, old_parent);
                }
                if e.title_changed {
                    self.cache.invalidate_subtree_by_uuid(tenant, &e.parent);
                }
            }
            DomainEvent::NodeDeleted(e) => {
                self.cache.invalidate_subtree_by_uuid(tenant, &e.uuid);
                self.cache.invalidate_by_uuid(tenant, &e.parent);
            }
            _ => {}
        }
    }
}

fn prefix_path(segments: &[String], count: usize) -> String {
    let mut path = String::from("/");
    path.push_str(
        &segments[..count]
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("/"),
    );
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(PathResolver::normalize("/"), "/");
        assert_eq!(PathResolver::normalize(""), "/");
        assert_eq!(PathResolver::normalize("/a/b/"), "/a/b");
        assert_eq!(PathResolver::normalize("a//b"), "/a/b");
    }

    #[test]
    fn test_decode_segments() {
        let segments = PathResolver::decode_segments("/docs/q3%20report.txt").unwrap();
        assert_eq!(segments, vec!["docs", "q3 report.txt"]);
    }
}
