// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node Service — the engine kernel
//!
//! Mediates every create/read/update/delete/list/search operation over the
//! node graph, enforcing the model invariants: identifier resolution
//! (uuid and `--fid--` forms), parenthood and cycle checks, aspect-typed
//! metadata validation, permission evaluation with ancestor propagation,
//! lock rules, and the write-through split between the metadata repository
//! and the binary storage provider.
//!
//! Two-phase writes: repository first for creates (with a compensating
//! repository delete when the storage write of a file body fails), storage
//! first for file deletes (a storage failure leaves the metadata row as a
//! retryable state). Events are published only after the durable
//! repository write. The core never retries; callers decide.

use bytes::Bytes;
use chrono::Utc;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::domain::aspect;
use crate::domain::auth::AuthenticationContext;
use crate::domain::errors::{AntboxError, PropertyErrorCode, ValidationErrors};
use crate::domain::events::{
    DomainEvent, NodeCreatedEvent, NodeDeletedEvent, NodeUpdatedEvent,
};
use crate::domain::filter::{FilterOperator, NodeFilter, NodeFilters};
use crate::domain::node::{slugify, Node, NodeFactory, NodePayload};
use crate::domain::permissions::{can, write_blocked_by_lock, Permission, Permissions};
use crate::domain::repository::{ConfigurationRepository, NodeFilterResult, NodeRepository};
use crate::domain::storage::{StorageProvider, WriteOptions};
use crate::domain::system::{self, mimetypes, uuids};
use crate::infrastructure::event_bus::EventBus;

/// Synthetic id prefix resolving by friendly id: `--fid--<fid>`
const FID_PREFIX: &str = "--fid--";

/// Bounded fid disambiguation attempts on `DuplicatedNode`
const MAX_FID_ATTEMPTS: usize = 5;

/// Page size used for internal exhaustive walks (cascade, listing)
const WALK_PAGE_SIZE: usize = 100;

pub struct NodeService {
    tenant: String,
    repository: Arc<dyn NodeRepository>,
    storage: Arc<dyn StorageProvider>,
    bus: Arc<EventBus>,
    configuration: Arc<dyn ConfigurationRepository>,
}

impl NodeService {
    pub fn new(
        tenant: impl Into<String>,
        repository: Arc<dyn NodeRepository>,
        storage: Arc<dyn StorageProvider>,
        bus: Arc<EventBus>,
        configuration: Arc<dyn ConfigurationRepository>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            repository,
            storage,
            bus,
            configuration,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn repository(&self) -> &Arc<dyn NodeRepository> {
        &self.repository
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// System singletons are synthesized, never stored, and indelible
    fn builtin(&self, uuid: &str) -> Option<Node> {
        if system::is_system_folder(uuid) {
            let title = system::system_folder_title(uuid)?;
            let mut node = Node::scaffold(uuid, title, mimetypes::FOLDER);
            node.fid = uuid.trim_matches('-').to_string();
            node.owner = system::ROOT_USER_EMAIL.to_string();
            node.group = uuids::ADMINS.to_string();
            node.permissions = Permissions::system_defaults();
            return Some(node);
        }
        if uuid == uuids::ADMINS {
            let mut node = Node::scaffold(uuids::ADMINS, "Admins", mimetypes::GROUP);
            node.fid = "admins".to_string();
            node.parent = uuids::GROUPS.to_string();
            node.owner = system::ROOT_USER_EMAIL.to_string();
            node.group = uuids::ADMINS.to_string();
            node.permissions = Permissions::system_defaults();
            return Some(node);
        }
        None
    }

    async fn node_by_uuid(&self, uuid: &str) -> Result<Node, AntboxError> {
        if let Some(node) = self.builtin(uuid) {
            return Ok(node);
        }
        self.repository.get_by_uuid(uuid).await
    }

    /// Resolve `uuid` or the synthetic `--fid--<fid>` form, without any
    /// permission check
    pub async fn resolve(&self, id: &str) -> Result<Node, AntboxError> {
        match id.strip_prefix(FID_PREFIX) {
            Some(fid) if !fid.is_empty() => self.repository.get_by_fid(fid).await,
            _ => self.node_by_uuid(id).await,
        }
    }

    /// `get` with Read enforcement (including the ancestor chain)
    #[instrument(skip(self, ctx), fields(tenant = %self.tenant))]
    pub async fn get(&self, ctx: &AuthenticationContext, id: &str) -> Result<Node, AntboxError> {
        let node = self.resolve(id).await?;
        self.assert_read(ctx, &node).await?;
        Ok(node)
    }

    // ========================================================================
    // Permission enforcement
    // ========================================================================

    /// Read on the node plus Read on every ancestor folder up to root
    async fn assert_read(
        &self,
        ctx: &AuthenticationContext,
        node: &Node,
    ) -> Result<(), AntboxError> {
        if ctx.principal.is_admin() {
            return Ok(());
        }
        if !can(&ctx.principal, node, Permission::Read) {
            return Err(AntboxError::Forbidden(format!(
                "no read permission on {}",
                node.uuid
            )));
        }
        let mut current = node.parent.clone();
        let mut hops = 0usize;
        while current != uuids::ROOT {
            let ancestor = self.node_by_uuid(&current).await?;
            if !can(&ctx.principal, &ancestor, Permission::Read) {
                return Err(AntboxError::Forbidden(format!(
                    "no read permission on ancestor {}",
                    ancestor.uuid
                )));
            }
            current = ancestor.parent;
            hops += 1;
            if hops > 1024 {
                return Err(AntboxError::Unknown(format!(
                    "parent chain of {} does not terminate",
                    node.uuid
                )));
            }
        }
        // Root itself grants read to authenticated principals
        let root = self.builtin(uuids::ROOT).expect("root folder singleton");
        if !can(&ctx.principal, &root, Permission::Read) {
            return Err(AntboxError::Forbidden("no read permission on root".into()));
        }
        Ok(())
    }

    /// Write on one node: when locked, the lock rule replaces the vector
    fn assert_write(&self, ctx: &AuthenticationContext, node: &Node) -> Result<(), AntboxError> {
        if node.locked {
            if write_blocked_by_lock(&ctx.principal, node) {
                return Err(AntboxError::Forbidden(format!(
                    "node {} is locked by {}",
                    node.uuid,
                    node.locked_by.as_deref().unwrap_or("unknown")
                )));
            }
            return Ok(());
        }
        if !can(&ctx.principal, node, Permission::Write) {
            return Err(AntboxError::Forbidden(format!(
                "no write permission on {}",
                node.uuid
            )));
        }
        Ok(())
    }

    /// Fetch the destination folder and require Write on it
    async fn writable_folder(
        &self,
        ctx: &AuthenticationContext,
        uuid: &str,
    ) -> Result<Node, AntboxError> {
        let parent = self.node_by_uuid(uuid).await?;
        if !parent.is_folder() {
            return Err(AntboxError::Validation(ValidationErrors::single(
                PropertyErrorCode::InvalidParent,
                "parent",
                format!("{uuid} is not a folder"),
            )));
        }
        self.assert_write(ctx, &parent)?;
        Ok(parent)
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Create a metadata-backed node (folder, smart folder, meta, aspect,
    /// user, group, …). File bodies go through [`Self::create_file`].
    #[instrument(skip(self, ctx, metadata), fields(tenant = %self.tenant))]
    pub async fn create(
        &self,
        ctx: &AuthenticationContext,
        mut metadata: Value,
    ) -> Result<Node, AntboxError> {
        // Credentials never enter the node graph
        let password = metadata
            .as_object_mut()
            .and_then(|m| m.remove("password"))
            .and_then(|v| v.as_str().map(str::to_string));

        let node = self.prepare(ctx, metadata, None).await?;
        if node.is_file_like() {
            return Err(AntboxError::BadRequest(
                "file nodes are created with createFile".into(),
            ));
        }
        let node = self.persist_new(node).await?;

        if let (NodePayload::User(user), Some(password)) = (&node.payload, password.as_deref()) {
            self.set_user_credentials(ctx, &user.email, password).await?;
        }

        self.after_create(&node).await;
        Ok(node)
    }

    /// Create a file node: repository first, then the blob; a storage
    /// failure triggers a compensating repository delete.
    #[instrument(skip(self, ctx, metadata, content), fields(tenant = %self.tenant))]
    pub async fn create_file(
        &self,
        ctx: &AuthenticationContext,
        metadata: Value,
        content: Bytes,
    ) -> Result<Node, AntboxError> {
        let node = self.prepare(ctx, metadata, Some(content.len() as u64)).await?;
        if !node.is_file_like() {
            return Err(AntboxError::NodeType(format!(
                "{} is not a file mimetype",
                node.mimetype
            )));
        }
        let node = self.persist_new(node).await?;

        let options = WriteOptions {
            parent: Some(node.parent.clone()),
            title: Some(node.title.clone()),
        };
        if let Err(storage_error) = self
            .storage
            .write(&node.uuid, content, Some(options))
            .await
        {
            warn!(uuid = %node.uuid, error = %storage_error, "storage write failed, compensating");
            if let Err(compensation_error) = self.repository.delete(&node.uuid).await {
                warn!(uuid = %node.uuid, error = %compensation_error, "compensating delete failed");
            }
            return Err(storage_error);
        }

        self.after_create(&node).await;
        Ok(node)
    }

    /// Replace the binary body of an existing file node
    #[instrument(skip(self, ctx, content), fields(tenant = %self.tenant))]
    pub async fn update_file(
        &self,
        ctx: &AuthenticationContext,
        uuid: &str,
        content: Bytes,
    ) -> Result<(), AntboxError> {
        let node = self.node_by_uuid(uuid).await?;
        if !node.is_file_like() {
            return Err(AntboxError::NodeType(format!(
                "{} has no binary body",
                node.mimetype
            )));
        }
        self.assert_write(ctx, &node)?;

        let size = content.len() as u64;
        self.storage
            .write(
                uuid,
                content,
                Some(WriteOptions {
                    parent: Some(node.parent.clone()),
                    title: Some(node.title.clone()),
                }),
            )
            .await?;

        let mut updated = node.clone();
        updated.payload = NodePayload::File(crate::domain::node::FilePayload { size });
        updated.modified_time = Utc::now();
        self.repository.update(&updated).await?;

        self.publish_updated(&node, &updated, json!({ "uuid": uuid, "size": size }));
        Ok(())
    }

    /// Normalise incoming metadata into a validated node
    async fn prepare(
        &self,
        ctx: &AuthenticationContext,
        metadata: Value,
        file_size: Option<u64>,
    ) -> Result<Node, AntboxError> {
        let mut doc = match metadata {
            Value::Object(map) => map,
            _ => return Err(AntboxError::BadRequest("metadata must be an object".into())),
        };

        if file_size.is_some() && !doc.contains_key("mimetype") {
            doc.insert(
                "mimetype".into(),
                Value::String("application/octet-stream".into()),
            );
        }
        if let Some(size) = file_size {
            doc.insert("size".into(), json!(size));
        }
        if doc.get("uuid").and_then(Value::as_str).unwrap_or("").is_empty() {
            doc.insert(
                "uuid".into(),
                Value::String(uuid::Uuid::new_v4().simple().to_string()),
            );
        }
        // Ownership comes from the context; only admins may impersonate
        if !ctx.principal.is_admin() || !doc.contains_key("owner") {
            doc.insert("owner".into(), Value::String(ctx.principal.email.clone()));
        }
        if doc.get("group").and_then(Value::as_str).unwrap_or("").is_empty() {
            let group = ctx
                .principal
                .primary_group()
                .unwrap_or(uuids::ADMINS)
                .to_string();
            doc.insert("group".into(), Value::String(group));
        }

        let mut node = NodeFactory::from_metadata(&Value::Object(doc))?;

        // Reserved singletons are synthesized, never stored
        if self.builtin(&node.uuid).is_some() {
            return Err(AntboxError::DuplicatedNode(node.uuid.clone()));
        }

        // Canonical parents are implied, not required, on create
        if let Some(canonical) = system::canonical_parent(&node.mimetype) {
            node.parent = canonical.to_string();
        }

        self.writable_folder(ctx, &node.parent.clone()).await?;

        if node.fid.is_empty() {
            let slug = slugify(&node.title);
            node.fid = if slug.is_empty() {
                node.uuid.chars().take(8).collect()
            } else {
                slug
            };
        }

        let now = Utc::now();
        node.created_time = now;
        node.modified_time = now;

        // Variant-specific preparation
        if let NodePayload::ApiKey(key) = &mut node.payload {
            if key.secret.is_empty() {
                key.secret = uuid::Uuid::new_v4().simple().to_string();
            }
            if key.group.is_empty() {
                key.group = node.group.clone();
            }
        }

        node.validate()?;
        self.enforce_aspects(&mut node).await?;
        Ok(node)
    }

    /// Repository add with bounded fid disambiguation
    async fn persist_new(&self, mut node: Node) -> Result<Node, AntboxError> {
        let base_fid = node.fid.clone();
        let mut attempt = 1usize;
        loop {
            match self.repository.add(&node).await {
                Ok(()) => return Ok(node),
                Err(AntboxError::DuplicatedNode(_)) if attempt < MAX_FID_ATTEMPTS => {
                    attempt += 1;
                    node.fid = format!("{base_fid}-{attempt}");
                    debug!(fid = %node.fid, "fid collision, retrying with disambiguated fid");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn after_create(&self, node: &Node) {
        self.bus
            .publish(DomainEvent::NodeCreated(NodeCreatedEvent {
                tenant: self.tenant.clone(),
                uuid: node.uuid.clone(),
                mimetype: node.mimetype.clone(),
                parent: node.parent.clone(),
                title: node.title.clone(),
                metadata: node.metadata(),
                occurred_at: Utc::now(),
            }));
        if let NodePayload::User(user) = &node.payload {
            self.bus.publish(DomainEvent::UserCreated {
                tenant: self.tenant.clone(),
                uuid: node.uuid.clone(),
                email: user.email.clone(),
                occurred_at: Utc::now(),
            });
        }
    }

    /// Store a salted credential digest for a user, outside the node graph
    pub async fn set_user_credentials(
        &self,
        ctx: &AuthenticationContext,
        email: &str,
        password: &str,
    ) -> Result<(), AntboxError> {
        if !ctx.principal.is_admin() && ctx.principal.email != email {
            return Err(AntboxError::Forbidden(
                "only admins may set another user's credentials".into(),
            ));
        }
        let mut hasher = Sha256::new();
        hasher.update(self.tenant.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        let digest = hex::encode(hasher.finalize());
        self.configuration
            .put(&format!("credentials:{email}"), json!({ "digest": digest }))
            .await
    }

    pub async fn verify_user_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<bool, AntboxError> {
        let Some(stored) = self.configuration.get(&format!("credentials:{email}")).await? else {
            return Ok(false);
        };
        let mut hasher = Sha256::new();
        hasher.update(self.tenant.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Ok(stored.get("digest").and_then(Value::as_str) == Some(digest.as_str()))
    }

    // ========================================================================
    // Aspects
    // ========================================================================

    /// Apply declared defaults, then evaluate every attached aspect's
    /// specification; failures aggregate into one ValidationError.
    async fn enforce_aspects(&self, node: &mut Node) -> Result<(), AntboxError> {
        if node.aspects.is_empty() {
            return Ok(());
        }
        let mut errors = ValidationErrors::new();
        for aspect_uuid in node.aspects.clone() {
            let aspect_node = self.repository.get_by_uuid(&aspect_uuid).await?;
            let Some(specification) = aspect::specification_from(&aspect_node) else {
                return Err(AntboxError::NodeType(format!(
                    "{aspect_uuid} is not an aspect"
                )));
            };
            for property in &specification.properties {
                if let Some(default) = &property.default {
                    let key = specification.key_of(property);
                    node.properties
                        .entry(key)
                        .or_insert_with(|| default.clone());
                }
            }
            if let Err(aspect_errors) = specification.satisfied_by(node) {
                errors.merge(aspect_errors);
            }
        }
        errors.into_result().map_err(AntboxError::Validation)
    }

    // ========================================================================
    // Update
    // ========================================================================

    #[instrument(skip(self, ctx, patch), fields(tenant = %self.tenant))]
    pub async fn update(
        &self,
        ctx: &AuthenticationContext,
        uuid: &str,
        patch: Value,
    ) -> Result<(), AntboxError> {
        if self.builtin(uuid).is_some() {
            return Err(AntboxError::Forbidden(
                "system nodes cannot be modified".into(),
            ));
        }
        let node = self.repository.get_by_uuid(uuid).await?;
        self.assert_write(ctx, &node)?;

        let mut updated = node.update(&patch)?;

        let parent_changed = updated.parent != node.parent;
        let title_changed = updated.title != node.title;
        if parent_changed || title_changed {
            let destination = self.writable_folder(ctx, &updated.parent).await?;
            if parent_changed {
                self.assert_no_cycle(&node.uuid, &destination).await?;
            }
        }

        let patch_obj = patch.as_object();
        let touched_aspects = patch_obj
            .map(|p| p.contains_key("aspects") || p.contains_key("properties"))
            .unwrap_or(false);
        if touched_aspects {
            self.enforce_aspects(&mut updated).await?;
        }

        self.repository.update(&updated).await?;

        let mut changed = patch.clone();
        if let Some(obj) = changed.as_object_mut() {
            obj.insert("uuid".into(), Value::String(uuid.to_string()));
        }
        self.publish_updated(&node, &updated, changed);
        Ok(())
    }

    /// Forbid a folder from becoming its own ancestor
    async fn assert_no_cycle(
        &self,
        moving_uuid: &str,
        destination: &Node,
    ) -> Result<(), AntboxError> {
        let mut current = destination.clone();
        let mut seen: HashSet<String> = HashSet::new();
        loop {
            if current.uuid == moving_uuid {
                return Err(AntboxError::BadRequest(format!(
                    "moving {moving_uuid} under {} would create a cycle",
                    destination.uuid
                )));
            }
            if current.uuid == uuids::ROOT || !seen.insert(current.uuid.clone()) {
                return Ok(());
            }
            current = self.node_by_uuid(&current.parent.clone()).await?;
        }
    }

    fn publish_updated(&self, before: &Node, after: &Node, changed: Value) {
        self.bus
            .publish(DomainEvent::NodeUpdated(NodeUpdatedEvent {
                tenant: self.tenant.clone(),
                uuid: after.uuid.clone(),
                mimetype: after.mimetype.clone(),
                parent: after.parent.clone(),
                old_parent: (before.parent != after.parent).then(|| before.parent.clone()),
                title_changed: before.title != after.title,
                changed,
                occurred_at: Utc::now(),
            }));
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Folder deletes cascade; file deletes remove the blob first so a
    /// storage failure leaves a retryable metadata row.
    #[instrument(skip(self, ctx), fields(tenant = %self.tenant))]
    pub async fn delete(&self, ctx: &AuthenticationContext, uuid: &str) -> Result<(), AntboxError> {
        if self.builtin(uuid).is_some() {
            return Err(AntboxError::Forbidden(
                "system nodes cannot be deleted".into(),
            ));
        }
        let node = self.repository.get_by_uuid(uuid).await?;
        self.assert_write(ctx, &node)?;

        if node.is_folder() {
            let children = self.children_of(uuid).await?;
            for child in children {
                Box::pin(self.delete(ctx, &child.uuid)).await?;
            }
        }

        if node.is_file_like() {
            // Storage first: abort and surface on failure
            self.storage.delete(uuid).await?;
        }
        self.repository.delete(uuid).await?;

        self.bus
            .publish(DomainEvent::NodeDeleted(NodeDeletedEvent {
                tenant: self.tenant.clone(),
                uuid: node.uuid.clone(),
                mimetype: node.mimetype.clone(),
                parent: node.parent.clone(),
                node: node.metadata(),
                occurred_at: Utc::now(),
            }));
        if let NodePayload::User(user) = &node.payload {
            let _ = self
                .configuration
                .delete(&format!("credentials:{}", user.email))
                .await;
            self.bus.publish(DomainEvent::UserDeleted {
                tenant: self.tenant.clone(),
                uuid: node.uuid.clone(),
                email: user.email.clone(),
                occurred_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn children_of(&self, parent_uuid: &str) -> Result<Vec<Node>, AntboxError> {
        let filters = NodeFilters::And(vec![NodeFilter::new(
            "parent",
            FilterOperator::Equal,
            json!(parent_uuid),
        )]);
        let mut children = Vec::new();
        let mut page_token = 1usize;
        loop {
            let page = self
                .repository
                .filter(&filters, WALK_PAGE_SIZE, page_token)
                .await?;
            let page_len = page.nodes.len();
            children.extend(page.nodes);
            if page_len < WALK_PAGE_SIZE {
                return Ok(children);
            }
            page_token += 1;
        }
    }

    // ========================================================================
    // Read surfaces
    // ========================================================================

    /// Children of a folder, or the computed members of a smart folder.
    /// Members the caller cannot read are pruned.
    #[instrument(skip(self, ctx), fields(tenant = %self.tenant))]
    pub async fn list(
        &self,
        ctx: &AuthenticationContext,
        parent_uuid: &str,
    ) -> Result<Vec<Node>, AntboxError> {
        let parent = self.node_by_uuid(parent_uuid).await?;
        self.assert_read(ctx, &parent).await?;

        let candidates = match &parent.payload {
            NodePayload::Folder(_) => self.children_of(parent_uuid).await?,
            NodePayload::SmartFolder(smart) => {
                let mut members = Vec::new();
                let mut page_token = 1usize;
                loop {
                    let page = self
                        .repository
                        .filter(&smart.filters, WALK_PAGE_SIZE, page_token)
                        .await?;
                    let page_len = page.nodes.len();
                    members.extend(page.nodes);
                    if page_len < WALK_PAGE_SIZE {
                        break;
                    }
                    page_token += 1;
                }
                members
            }
            _ => {
                return Err(AntboxError::NodeType(format!(
                    "{} is not a listable container",
                    parent.mimetype
                )))
            }
        };

        let mut visible = Vec::with_capacity(candidates.len());
        for node in candidates {
            if ctx.principal.is_admin() || can(&ctx.principal, &node, Permission::Read) {
                visible.push(node);
            }
        }
        Ok(visible)
    }

    /// Filter query; results are pruned by the caller's Read permission
    #[instrument(skip(self, ctx, filters), fields(tenant = %self.tenant))]
    pub async fn find(
        &self,
        ctx: &AuthenticationContext,
        filters: &NodeFilters,
        page_size: usize,
        page_token: usize,
    ) -> Result<NodeFilterResult, AntboxError> {
        let mut result = self.repository.filter(filters, page_size, page_token).await?;
        if !ctx.principal.is_admin() {
            result
                .nodes
                .retain(|node| can(&ctx.principal, node, Permission::Read));
        }
        Ok(result)
    }

    /// Root-to-node path
    pub async fn breadcrumbs(
        &self,
        ctx: &AuthenticationContext,
        uuid: &str,
    ) -> Result<Vec<Node>, AntboxError> {
        let node = self.get(ctx, uuid).await?;
        let mut chain = vec![node];
        let mut hops = 0usize;
        while chain.last().map(|n| n.uuid.as_str()) != Some(uuids::ROOT) {
            let parent_uuid = chain.last().map(|n| n.parent.clone()).unwrap_or_default();
            let parent = self.node_by_uuid(&parent_uuid).await?;
            chain.push(parent);
            hops += 1;
            if hops > 1024 {
                return Err(AntboxError::Unknown(format!(
                    "parent chain of {uuid} does not terminate"
                )));
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Binary export of a file-like node; requires Export
    #[instrument(skip(self, ctx), fields(tenant = %self.tenant))]
    pub async fn export(
        &self,
        ctx: &AuthenticationContext,
        uuid: &str,
    ) -> Result<(Node, Bytes), AntboxError> {
        let node = self.get(ctx, uuid).await?;
        if !node.is_file_like() {
            return Err(AntboxError::NodeType(format!(
                "{} has no binary body to export",
                node.mimetype
            )));
        }
        if !ctx.principal.is_admin()
            && ctx.principal.email != node.owner
            && !can(&ctx.principal, &node, Permission::Export)
        {
            return Err(AntboxError::Forbidden(format!(
                "no export permission on {uuid}"
            )));
        }
        let content = self.storage.read(uuid).await?;
        Ok((node, content))
    }

    // ========================================================================
    // Copy
    // ========================================================================

    /// Duplicate a node (and its blob for files) into another folder.
    /// Copies never carry locks or workflow bindings.
    #[instrument(skip(self, ctx), fields(tenant = %self.tenant))]
    pub async fn copy(
        &self,
        ctx: &AuthenticationContext,
        uuid: &str,
        dest_parent: &str,
    ) -> Result<Node, AntboxError> {
        let source = self.get(ctx, uuid).await?;
        if source.is_folder() || source.is_smart_folder() {
            return Err(AntboxError::NodeType(
                "folders cannot be copied as a unit".into(),
            ));
        }
        self.writable_folder(ctx, dest_parent).await?;

        let mut copy = source.clone();
        copy.uuid = uuid::Uuid::new_v4().simple().to_string();
        copy.fid = slugify(&copy.title);
        copy.parent = dest_parent.to_string();
        copy.owner = ctx.principal.email.clone();
        copy.locked = false;
        copy.locked_by = None;
        copy.unlock_authorized_groups = Vec::new();
        copy.workflow_instance_uuid = None;
        copy.workflow_state = None;
        let now = Utc::now();
        copy.created_time = now;
        copy.modified_time = now;

        let copy = self.persist_new(copy).await?;

        if source.is_file_like() {
            let content = self.storage.read(&source.uuid).await?;
            let options = WriteOptions {
                parent: Some(copy.parent.clone()),
                title: Some(copy.title.clone()),
            };
            if let Err(storage_error) =
                self.storage.write(&copy.uuid, content, Some(options)).await
            {
                warn!(uuid = %copy.uuid, error = %storage_error, "copy blob write failed, compensating");
                let _ = self.repository.delete(&copy.uuid).await;
                return Err(storage_error);
            }
        }

        self.after_create(&copy).await;
        Ok(copy)
    }

    // ========================================================================
    // Lock / Unlock
    // ========================================================================

    #[instrument(skip(self, ctx), fields(tenant = %self.tenant))]
    pub async fn lock(
        &self,
        ctx: &AuthenticationContext,
        uuid: &str,
        unlock_groups: Vec<String>,
    ) -> Result<(), AntboxError> {
        let node = self.repository.get_by_uuid(uuid).await?;
        self.assert_write(ctx, &node)?;

        let mut locked = node.clone();
        locked.locked = true;
        locked.locked_by = Some(ctx.principal.email.clone());
        locked.unlock_authorized_groups = unlock_groups;
        locked.modified_time = Utc::now();
        self.repository.update(&locked).await?;

        self.publish_updated(
            &node,
            &locked,
            json!({
                "uuid": uuid,
                "locked": true,
                "lockedBy": locked.locked_by,
                "unlockAuthorizedGroups": locked.unlock_authorized_groups,
            }),
        );
        Ok(())
    }

    /// Unlock is permitted only to the locking principal, a member of the
    /// unlock groups, or an admin
    #[instrument(skip(self, ctx), fields(tenant = %self.tenant))]
    pub async fn unlock(&self, ctx: &AuthenticationContext, uuid: &str) -> Result<(), AntboxError> {
        let node = self.repository.get_by_uuid(uuid).await?;
        if !node.locked {
            return Ok(());
        }
        if write_blocked_by_lock(&ctx.principal, &node) {
            return Err(AntboxError::Forbidden(format!(
                "node {uuid} is locked by {}",
                node.locked_by.as_deref().unwrap_or("unknown")
            )));
        }

        let mut unlocked = node.clone();
        unlocked.locked = false;
        unlocked.locked_by = None;
        unlocked.unlock_authorized_groups = Vec::new();
        unlocked.modified_time = Utc::now();
        self.repository.update(&unlocked).await?;

        self.publish_updated(
            &node,
            &unlocked,
            json!({ "uuid": uuid, "locked": false }),
        );
        Ok(())
    }

    // ========================================================================
    // Workflow binding (used by the workflow engine)
    // ========================================================================

    /// Bind a node to a workflow instance: lock with empty unlock groups
    /// (only admins and the engine can release) and stamp the binding.
    pub(crate) async fn bind_workflow(
        &self,
        node_uuid: &str,
        instance_uuid: &str,
        state: &str,
        engine_principal: &str,
    ) -> Result<(), AntboxError> {
        let node = self.repository.get_by_uuid(node_uuid).await?;
        let mut bound = node.clone();
        bound.locked = true;
        bound.locked_by = Some(engine_principal.to_string());
        bound.unlock_authorized_groups = Vec::new();
        bound.workflow_instance_uuid = Some(instance_uuid.to_string());
        bound.workflow_state = Some(state.to_string());
        bound.modified_time = Utc::now();
        self.repository.update(&bound).await?;
        self.publish_updated(
            &node,
            &bound,
            json!({
                "uuid": node_uuid,
                "locked": true,
                "workflowInstanceUuid": instance_uuid,
                "workflowState": state,
            }),
        );
        Ok(())
    }

    pub(crate) async fn set_workflow_state(
        &self,
        node_uuid: &str,
        state: &str,
    ) -> Result<(), AntboxError> {
        let node = self.repository.get_by_uuid(node_uuid).await?;
        let mut updated = node.clone();
        updated.workflow_state = Some(state.to_string());
        updated.modified_time = Utc::now();
        self.repository.update(&updated).await?;
        self.publish_updated(
            &node,
            &updated,
            json!({ "uuid": node_uuid, "workflowState": state }),
        );
        Ok(())
    }

    /// Release a workflow binding on terminal transition or cancellation
    pub(crate) async fn release_workflow(&self, node_uuid: &str) -> Result<(), AntboxError> {
        let node = self.repository.get_by_uuid(node_uuid).await?;
        let mut released = node.clone();
        released.locked = false;
        released.locked_by = None;
        released.unlock_authorized_groups = Vec::new();
        released.workflow_instance_uuid = None;
        released.workflow_state = None;
        released.modified_time = Utc::now();
        self.repository.update(&released).await?;
        self.publish_updated(
            &node,
            &released,
            json!({
                "uuid": node_uuid,
                "locked": false,
                "workflowInstanceUuid": null,
                "workflowState": null,
            }),
        );
        Ok(())
    }
}
