// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! CMIS Browser Binding (subset)
//!
//! JSON surface mapping CMIS object semantics onto the node kernel:
//! `cmis:objectId` is the node uuid, `cmis:baseTypeId` is `cmis:folder`
//! for folder variants and `cmis:document` otherwise, checkOut/checkIn
//! delegate to the kernel's lock/unlock, ACLs translate
//! `cmis:read`/`cmis:write`/`cmis:all` to `Read`/`Write`/`Export`, and
//! `query` passes DNF filters straight through to `find`.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::application::tenants::{TenantRegistry, TenantServices};
use crate::domain::auth::{AuthMode, AuthenticationContext, Principal};
use crate::domain::errors::AntboxError;
use crate::domain::filter::{self, NodeFilters};
use crate::domain::node::{Node, NodePayload};
use crate::domain::permissions::Permission;
use crate::domain::system::{mimetypes, uuids};
use crate::presentation::api::status_of;

pub struct CmisState {
    registry: Arc<TenantRegistry>,
}

pub fn router(registry: Arc<TenantRegistry>) -> Router {
    let state = Arc::new(CmisState { registry });
    Router::new()
        .route("/cmis", get(get_repositories))
        .route("/cmis/{repo}", get(get_repository_info))
        .route("/cmis/{repo}/root", get(browse).post(act))
        .with_state(state)
}

fn context_from(headers: &HeaderMap, repository: &str) -> AuthenticationContext {
    let principal = match headers.get("x-principal-email").and_then(|v| v.to_str().ok()) {
        Some(email) if !email.is_empty() => {
            let groups = headers
                .get("x-principal-groups")
                .and_then(|v| v.to_str().ok())
                .map(|g| {
                    g.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Principal::new(email, groups)
        }
        _ => Principal::anonymous(),
    };
    // The CMIS repository id is the tenant name
    AuthenticationContext::new(repository, AuthMode::Direct, principal)
}

fn error_response(error: AntboxError) -> Response {
    (
        status_of(&error),
        Json(json!({
            "exception": error.code(),
            "message": error.to_string(),
        })),
    )
        .into_response()
}

// ============================================================================
// Object rendering & ACL translation
// ============================================================================

fn base_type_of(node: &Node) -> &'static str {
    if node.is_folder() || node.is_smart_folder() {
        "cmis:folder"
    } else {
        "cmis:document"
    }
}

fn property(value: Value) -> Value {
    json!({ "value": value })
}

/// Canonical CMIS rendering of one node
pub fn cmis_object(node: &Node) -> Value {
    let mut properties = Map::new();
    properties.insert("cmis:objectId".into(), property(json!(node.uuid)));
    properties.insert("cmis:baseTypeId".into(), property(json!(base_type_of(node))));
    properties.insert("cmis:name".into(), property(json!(node.title)));
    properties.insert("cmis:parentId".into(), property(json!(node.parent)));
    properties.insert("cmis:createdBy".into(), property(json!(node.owner)));
    properties.insert(
        "cmis:creationDate".into(),
        property(json!(node.created_time.timestamp_millis())),
    );
    properties.insert(
        "cmis:lastModificationDate".into(),
        property(json!(node.modified_time.timestamp_millis())),
    );
    if let NodePayload::File(file) = &node.payload {
        properties.insert(
            "cmis:contentStreamLength".into(),
            property(json!(file.size)),
        );
        properties.insert(
            "cmis:contentStreamMimeType".into(),
            property(json!(node.mimetype)),
        );
    }
    properties.insert(
        "cmis:isVersionSeriesCheckedOut".into(),
        property(json!(node.locked)),
    );
    json!({ "properties": Value::Object(properties) })
}

fn permission_from_cmis(permission: &str) -> Option<Vec<Permission>> {
    match permission {
        "cmis:read" => Some(vec![Permission::Read]),
        "cmis:write" => Some(vec![Permission::Read, Permission::Write]),
        "cmis:all" => Some(vec![Permission::Read, Permission::Write, Permission::Export]),
        _ => None,
    }
}

fn permissions_to_cmis(permissions: &[Permission]) -> Vec<&'static str> {
    let mut cmis = Vec::new();
    if permissions.contains(&Permission::Read) {
        cmis.push("cmis:read");
    }
    if permissions.contains(&Permission::Write) {
        cmis.push("cmis:write");
    }
    if permissions.contains(&Permission::Export) {
        cmis.push("cmis:all");
    }
    cmis
}

fn acl_of(node: &Node) -> Value {
    let mut aces = vec![
        json!({
            "principal": { "principalId": "cmis:anyone" },
            "permissions": permissions_to_cmis(&node.permissions.authenticated),
        }),
        json!({
            "principal": { "principalId": "cmis:anonymous" },
            "permissions": permissions_to_cmis(&node.permissions.anonymous),
        }),
        json!({
            "principal": { "principalId": node.group },
            "permissions": permissions_to_cmis(&node.permissions.group),
        }),
    ];
    for (group, permissions) in &node.permissions.advanced {
        aces.push(json!({
            "principal": { "principalId": group },
            "permissions": permissions_to_cmis(permissions),
        }));
    }
    json!({ "aces": aces })
}

// ============================================================================
// Read side
// ============================================================================

fn repository_info(repo: &str) -> Value {
    json!({
        "repositoryId": repo,
        "repositoryName": repo,
        "cmisVersionSupported": "1.1",
        "rootFolderId": uuids::ROOT,
        "capabilities": {
            "capabilityQuery": "bothcombined",
            "capabilityACL": "manage",
        },
    })
}

async fn get_repositories(State(state): State<Arc<CmisState>>) -> Response {
    let mut body = Map::new();
    for name in state.registry.tenant_names() {
        body.insert(name.clone(), repository_info(&name));
    }
    Json(Value::Object(body)).into_response()
}

async fn get_repository_info(
    State(state): State<Arc<CmisState>>,
    Path(repo): Path<String>,
) -> Response {
    if state.registry.tenant(&repo).is_none() {
        return error_response(AntboxError::NodeNotFound(format!("repository {repo}")));
    }
    let mut body = Map::new();
    body.insert(repo.clone(), repository_info(&repo));
    Json(Value::Object(body)).into_response()
}

#[derive(Deserialize)]
struct BrowseParams {
    #[serde(rename = "objectId")]
    object_id: Option<String>,
    #[serde(rename = "cmisselector")]
    selector: Option<String>,
    depth: Option<usize>,
}

async fn browse(
    State(state): State<Arc<CmisState>>,
    Path(repo): Path<String>,
    Query(params): Query<BrowseParams>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers, &repo);
    let services = match state.registry.tenant(&repo) {
        Some(services) => services,
        None => return error_response(AntboxError::NodeNotFound(format!("repository {repo}"))),
    };
    let object_id = params.object_id.as_deref().unwrap_or(uuids::ROOT);
    let selector = params.selector.as_deref().unwrap_or("object");

    let result = match selector {
        "object" => get_object(&services, &ctx, object_id).await,
        "children" => get_children(&services, &ctx, object_id).await,
        "parent" => get_folder_parent(&services, &ctx, object_id).await,
        "content" => return get_content_stream(&services, &ctx, object_id).await,
        "acl" => get_acl(&services, &ctx, object_id).await,
        "descendants" | "folderTree" => {
            let depth = params.depth.unwrap_or(2).min(16);
            let folders_only = selector == "folderTree";
            get_descendants(&services, &ctx, object_id, depth, folders_only).await
        }
        other => Err(AntboxError::BadRequest(format!(
            "unknown cmisselector: {other}"
        ))),
    };

    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_object(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    object_id: &str,
) -> Result<Value, AntboxError> {
    let node = services.node_service.get(ctx, object_id).await?;
    Ok(cmis_object(&node))
}

async fn get_children(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    object_id: &str,
) -> Result<Value, AntboxError> {
    let children = services.node_service.list(ctx, object_id).await?;
    let objects: Vec<Value> = children
        .iter()
        .map(|child| json!({ "object": cmis_object(child) }))
        .collect();
    Ok(json!({ "objects": objects, "numItems": objects.len() }))
}

async fn get_folder_parent(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    object_id: &str,
) -> Result<Value, AntboxError> {
    let node = services.node_service.get(ctx, object_id).await?;
    if node.uuid == uuids::ROOT {
        return Ok(json!({}));
    }
    let parent = services.node_service.get(ctx, &node.parent).await?;
    Ok(cmis_object(&parent))
}

fn descendants_boxed<'a>(
    services: &'a TenantServices,
    ctx: &'a AuthenticationContext,
    object_id: &'a str,
    depth: usize,
    folders_only: bool,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<Value>, AntboxError>> + Send + 'a>>
{
    Box::pin(async move {
        if depth == 0 {
            return Ok(Vec::new());
        }
        let children = services.node_service.list(ctx, object_id).await?;
        let mut tree = Vec::new();
        for child in children {
            let is_container = child.is_folder();
            if folders_only && !is_container {
                continue;
            }
            let nested = if is_container {
                descendants_boxed(services, ctx, &child.uuid, depth - 1, folders_only).await?
            } else {
                Vec::new()
            };
            tree.push(json!({
                "object": { "object": cmis_object(&child) },
                "children": nested,
            }));
        }
        Ok(tree)
    })
}

async fn get_descendants(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    object_id: &str,
    depth: usize,
    folders_only: bool,
) -> Result<Value, AntboxError> {
    let tree = descendants_boxed(services, ctx, object_id, depth, folders_only).await?;
    Ok(Value::Array(tree))
}

async fn get_content_stream(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    object_id: &str,
) -> Response {
    match services.node_service.export(ctx, object_id).await {
        Ok((node, content)) => (
            StatusCode::OK,
            [
                ("content-type", node.mimetype.clone()),
                (
                    "content-disposition",
                    format!("attachment; filename=\"{}\"", node.title),
                ),
            ],
            content,
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_acl(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    object_id: &str,
) -> Result<Value, AntboxError> {
    let node = services.node_service.get(ctx, object_id).await?;
    Ok(acl_of(&node))
}

// ============================================================================
// Write side
// ============================================================================

#[derive(Deserialize)]
struct ActRequest {
    cmisaction: String,
    #[serde(rename = "objectId")]
    object_id: Option<String>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(rename = "targetFolderId")]
    target_folder_id: Option<String>,
    /// Base64-encoded content for createDocument / checkIn
    content: Option<String>,
    #[serde(default)]
    filters: Option<NodeFilters>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    aces: Option<Vec<AceInput>>,
}

#[derive(Deserialize)]
struct AceInput {
    principal: String,
    permissions: Vec<String>,
}

async fn act(
    State(state): State<Arc<CmisState>>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ActRequest>,
) -> Response {
    let ctx = context_from(&headers, &repo);
    let services = match state.registry.tenant(&repo) {
        Some(services) => services,
        None => return error_response(AntboxError::NodeNotFound(format!("repository {repo}"))),
    };

    let result = match request.cmisaction.as_str() {
        "createFolder" => create_node_action(&services, &ctx, &request, mimetypes::FOLDER).await,
        "createDocument" => create_document(&services, &ctx, &request).await,
        "updateProperties" => update_properties(&services, &ctx, &request).await,
        "moveObject" => move_object(&services, &ctx, &request).await,
        "copyObject" => copy_object(&services, &ctx, &request).await,
        "deleteObject" | "deleteTree" => delete_object(&services, &ctx, &request).await,
        "checkOut" => check_out(&services, &ctx, &request).await,
        "checkIn" => check_in(&services, &ctx, &request).await,
        "applyACL" => apply_acl(&services, &ctx, &request).await,
        "query" => query(&services, &ctx, &request).await,
        other => Err(AntboxError::BadRequest(format!(
            "unknown cmisaction: {other}"
        ))),
    };

    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => error_response(e),
    }
}

/// Extract engine metadata from `cmis:*` properties
fn metadata_from_properties(request: &ActRequest, parent_fallback: &str) -> Value {
    let empty = Map::new();
    let properties = request.properties.as_ref().unwrap_or(&empty);
    let get = |key: &str| properties.get(key).and_then(Value::as_str);

    let mut metadata = Map::new();
    if let Some(name) = get("cmis:name") {
        metadata.insert("title".into(), json!(name));
    }
    metadata.insert(
        "parent".into(),
        json!(request.object_id.as_deref().unwrap_or(parent_fallback)),
    );
    if let Some(mimetype) = get("cmis:contentStreamMimeType") {
        metadata.insert("mimetype".into(), json!(mimetype));
    }
    Value::Object(metadata)
}

async fn create_node_action(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
    mimetype: &str,
) -> Result<Value, AntboxError> {
    let mut metadata = metadata_from_properties(request, uuids::ROOT);
    if let Some(obj) = metadata.as_object_mut() {
        obj.insert("mimetype".into(), json!(mimetype));
    }
    let node = services.node_service.create(ctx, metadata).await?;
    Ok(cmis_object(&node))
}

async fn create_document(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
) -> Result<Value, AntboxError> {
    let content = decode_content(request)?;
    let metadata = metadata_from_properties(request, uuids::ROOT);
    let node = services.node_service.create_file(ctx, metadata, content).await?;
    Ok(cmis_object(&node))
}

fn decode_content(request: &ActRequest) -> Result<bytes::Bytes, AntboxError> {
    let encoded = request.content.as_deref().unwrap_or("");
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map(bytes::Bytes::from)
        .map_err(|_| AntboxError::BadRequest("content is not valid base64".into()))
}

fn require_object_id(request: &ActRequest) -> Result<&str, AntboxError> {
    request
        .object_id
        .as_deref()
        .ok_or_else(|| AntboxError::BadRequest("objectId is required".into()))
}

async fn update_properties(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
) -> Result<Value, AntboxError> {
    let object_id = require_object_id(request)?;
    let empty = Map::new();
    let properties = request.properties.as_ref().unwrap_or(&empty);

    let mut patch = Map::new();
    if let Some(name) = properties.get("cmis:name").and_then(Value::as_str) {
        patch.insert("title".into(), json!(name));
    }
    if let Some(description) = properties.get("cmis:description").and_then(Value::as_str) {
        patch.insert("description".into(), json!(description));
    }
    services
        .node_service
        .update(ctx, object_id, Value::Object(patch))
        .await?;
    let node = services.node_service.get(ctx, object_id).await?;
    Ok(cmis_object(&node))
}

async fn move_object(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
) -> Result<Value, AntboxError> {
    let object_id = require_object_id(request)?;
    let target = request
        .target_folder_id
        .as_deref()
        .ok_or_else(|| AntboxError::BadRequest("targetFolderId is required".into()))?;
    services
        .node_service
        .update(ctx, object_id, json!({ "parent": target }))
        .await?;
    let node = services.node_service.get(ctx, object_id).await?;
    Ok(cmis_object(&node))
}

async fn copy_object(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
) -> Result<Value, AntboxError> {
    let object_id = require_object_id(request)?;
    let target = request
        .target_folder_id
        .as_deref()
        .ok_or_else(|| AntboxError::BadRequest("targetFolderId is required".into()))?;
    let copy = services.node_service.copy(ctx, object_id, target).await?;
    Ok(cmis_object(&copy))
}

async fn delete_object(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
) -> Result<Value, AntboxError> {
    let object_id = require_object_id(request)?;
    services.node_service.delete(ctx, object_id).await?;
    Ok(json!({}))
}

async fn check_out(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
) -> Result<Value, AntboxError> {
    let object_id = require_object_id(request)?;
    services
        .node_service
        .lock(ctx, object_id, Vec::new())
        .await?;
    let node = services.node_service.get(ctx, object_id).await?;
    Ok(cmis_object(&node))
}

async fn check_in(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
) -> Result<Value, AntboxError> {
    let object_id = require_object_id(request)?;
    if request.content.is_some() {
        let content = decode_content(request)?;
        services
            .node_service
            .update_file(ctx, object_id, content)
            .await?;
    }
    services.node_service.unlock(ctx, object_id).await?;
    let node = services.node_service.get(ctx, object_id).await?;
    Ok(cmis_object(&node))
}

async fn apply_acl(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
) -> Result<Value, AntboxError> {
    let object_id = require_object_id(request)?;
    let aces = request
        .aces
        .as_ref()
        .ok_or_else(|| AntboxError::BadRequest("aces are required".into()))?;

    let node = services.node_service.get(ctx, object_id).await?;
    let mut advanced = node.permissions.advanced.clone();
    for ace in aces {
        let mut granted = Vec::new();
        for cmis_permission in &ace.permissions {
            let Some(translated) = permission_from_cmis(cmis_permission) else {
                return Err(AntboxError::BadRequest(format!(
                    "unknown cmis permission: {cmis_permission}"
                )));
            };
            for p in translated {
                if !granted.contains(&p) {
                    granted.push(p);
                }
            }
        }
        advanced.insert(ace.principal.clone(), granted);
    }

    let mut permissions = node.permissions.clone();
    permissions.advanced = advanced;
    services
        .node_service
        .update(
            ctx,
            object_id,
            json!({ "permissions": serde_json::to_value(&permissions)? }),
        )
        .await?;

    let node = services.node_service.get(ctx, object_id).await?;
    Ok(acl_of(&node))
}

async fn query(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    request: &ActRequest,
) -> Result<Value, AntboxError> {
    let filters = match (&request.filters, request.query.as_deref()) {
        (Some(filters), _) => filters.clone(),
        (None, Some(query)) => filter::parse(query)?,
        (None, None) => {
            return Err(AntboxError::BadRequest(
                "either 'filters' or 'query' is required".into(),
            ))
        }
    };
    let result = services.node_service.find(ctx, &filters, 100, 1).await?;
    let results: Vec<Value> = result.nodes.iter().map(cmis_object).collect();
    Ok(json!({ "results": results, "numItems": results.len() }))
}
