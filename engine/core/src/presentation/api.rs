// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP/JSON API
//!
//! Thin axum surface over the node kernel. The transport layer owns the
//! only error-code → status mapping in the engine; domain errors cross
//! every inner layer unchanged.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::application::tenants::{TenantRegistry, TenantServices};
use crate::domain::auth::{AuthMode, AuthenticationContext, Principal};
use crate::domain::errors::AntboxError;
use crate::domain::filter::{self, NodeFilters};

pub struct AppState {
    pub registry: Arc<TenantRegistry>,
}

pub fn app(registry: Arc<TenantRegistry>) -> Router {
    let state = Arc::new(AppState { registry });

    Router::new()
        .route("/nodes", post(create_node))
        .route("/nodes/find", post(find_nodes))
        .route("/nodes/files", post(create_file))
        .route(
            "/nodes/{uuid}",
            get(get_node).patch(update_node).delete(delete_node),
        )
        .route("/nodes/{uuid}/content", axum::routing::put(update_file_content))
        .route("/nodes/{uuid}/children", get(list_children))
        .route("/nodes/{uuid}/breadcrumbs", get(breadcrumbs))
        .route("/nodes/{uuid}/export", get(export_node))
        .route("/nodes/{uuid}/copy", post(copy_node))
        .route("/nodes/{uuid}/lock", post(lock_node))
        .route("/nodes/{uuid}/unlock", post(unlock_node))
        .route("/workflows", get(list_workflow_definitions))
        .route(
            "/workflows/{definition}/start/{node}",
            post(start_workflow),
        )
        .route("/workflow-instances", get(list_workflow_instances))
        .route(
            "/workflow-instances/{uuid}/signal/{signal}",
            post(signal_workflow),
        )
        .route("/workflow-instances/{uuid}/cancel", post(cancel_workflow))
        .route("/stats/path-cache", get(path_cache_stats))
        .with_state(state)
}

// ============================================================================
// Context & error plumbing
// ============================================================================

/// Map stable error codes to protocol statuses; the only place this
/// translation exists
pub fn status_of(error: &AntboxError) -> StatusCode {
    match error.code() {
        "NodeNotFound" | "NodeFileNotFound" => StatusCode::NOT_FOUND,
        "ForbiddenError" => StatusCode::FORBIDDEN,
        "UnauthorizedError" => StatusCode::UNAUTHORIZED,
        "BadRequestError" | "ValidationError" => StatusCode::BAD_REQUEST,
        "DuplicatedNode" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: AntboxError) -> Response {
    let body = json!({
        "errorCode": error.code(),
        "message": error.to_string(),
    });
    (status_of(&error), Json(body)).into_response()
}

/// Principal and tenant come from headers on this surface; the WebDAV and
/// CMIS surfaces do their own extraction
fn context_from(headers: &HeaderMap) -> AuthenticationContext {
    let tenant = headers
        .get("x-tenant")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default")
        .to_string();
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
    AuthenticationContext::new(tenant, AuthMode::Direct, principal)
}

fn tenant_services(
    state: &AppState,
    ctx: &AuthenticationContext,
) -> Result<Arc<TenantServices>, AntboxError> {
    state
        .registry
        .tenant(&ctx.tenant)
        .ok_or_else(|| AntboxError::BadRequest(format!("unknown tenant: {}", ctx.tenant)))
}

macro_rules! services {
    ($state:expr, $ctx:expr) => {
        match tenant_services(&$state, &$ctx) {
            Ok(services) => services,
            Err(e) => return error_response(e),
        }
    };
}

// ============================================================================
// Node handlers
// ============================================================================

async fn create_node(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(metadata): Json<Value>,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.node_service.create(&ctx, metadata).await {
        Ok(node) => (StatusCode::CREATED, Json(node.metadata())).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct CreateFileRequest {
    metadata: Value,
    /// Base64-encoded body
    content: String,
}

async fn create_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateFileRequest>,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    let content = match base64::engine::general_purpose::STANDARD.decode(&request.content) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => {
            return error_response(AntboxError::BadRequest(
                "content is not valid base64".into(),
            ))
        }
    };
    match services
        .node_service
        .create_file(&ctx, request.metadata, content)
        .await
    {
        Ok(node) => (StatusCode::CREATED, Json(node.metadata())).into_response(),
        Err(e) => error_response(e),
    }
}

async fn update_file_content(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.node_service.update_file(&ctx, &uuid, body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.node_service.get(&ctx, &uuid).await {
        Ok(node) => Json(node.metadata()).into_response(),
        Err(e) => error_response(e),
    }
}

async fn update_node(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.node_service.update(&ctx, &uuid, patch).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_node(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.node_service.delete(&ctx, &uuid).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_children(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.node_service.list(&ctx, &uuid).await {
        Ok(nodes) => {
            let listed: Vec<Value> = nodes.iter().map(|n| n.metadata()).collect();
            Json(json!({ "nodes": listed })).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn breadcrumbs(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.node_service.breadcrumbs(&ctx, &uuid).await {
        Ok(chain) => {
            let crumbs: Vec<Value> = chain
                .iter()
                .map(|n| json!({ "uuid": n.uuid, "title": n.title }))
                .collect();
            Json(json!({ "breadcrumbs": crumbs })).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn export_node(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.node_service.export(&ctx, &uuid).await {
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

#[derive(Deserialize)]
struct CopyRequest {
    parent: String,
}

async fn copy_node(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CopyRequest>,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services
        .node_service
        .copy(&ctx, &uuid, &request.parent)
        .await
    {
        Ok(node) => (StatusCode::CREATED, Json(node.metadata())).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LockRequest {
    #[serde(default)]
    unlock_authorized_groups: Vec<String>,
}

async fn lock_node(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    payload: Option<Json<LockRequest>>,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    let groups = payload.map(|p| p.0.unlock_authorized_groups).unwrap_or_default();
    match services.node_service.lock(&ctx, &uuid, groups).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn unlock_node(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.node_service.unlock(&ctx, &uuid).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Find
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindRequest {
    /// Structured DNF filters…
    #[serde(default)]
    filters: Option<NodeFilters>,
    /// …or the textual form
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    page_size: Option<usize>,
    #[serde(default)]
    page_token: Option<usize>,
}

async fn find_nodes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<FindRequest>,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);

    let filters = match (request.filters, request.query.as_deref()) {
        (Some(filters), _) => filters,
        (None, Some(query)) => match filter::parse(query) {
            Ok(filters) => filters,
            Err(e) => return error_response(e),
        },
        (None, None) => {
            return error_response(AntboxError::BadRequest(
                "either 'filters' or 'query' is required".into(),
            ))
        }
    };

    match services
        .node_service
        .find(
            &ctx,
            &filters,
            request.page_size.unwrap_or(25),
            request.page_token.unwrap_or(1),
        )
        .await
    {
        Ok(result) => {
            let nodes: Vec<Value> = result.nodes.iter().map(|n| n.metadata()).collect();
            Json(json!({
                "nodes": nodes,
                "pageSize": result.page_size,
                "pageToken": result.page_token,
            }))
            .into_response()
        }
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Workflows
// ============================================================================

async fn list_workflow_definitions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    Json(json!({ "definitions": services.workflow_service.list_definitions() })).into_response()
}

async fn start_workflow(
    State(state): State<Arc<AppState>>,
    Path((definition, node)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.workflow_service.start(&ctx, &definition, &node).await {
        Ok(instance) => (StatusCode::CREATED, Json(json!(instance))).into_response(),
        Err(e) => error_response(e),
    }
}

async fn signal_workflow(
    State(state): State<Arc<AppState>>,
    Path((uuid, signal)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services
        .workflow_service
        .transition(&ctx, &uuid, &signal)
        .await
    {
        Ok(instance) => Json(json!(instance)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn cancel_workflow(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.workflow_service.cancel(&ctx, &uuid).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_workflow_instances(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from(&headers);
    let services = services!(state, ctx);
    match services.workflow_service.visible_instances(&ctx).await {
        Ok(instances) => Json(json!({ "instances": instances })).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Monitoring
// ============================================================================

async fn path_cache_stats(
    State(state): State<Arc<AppState>>,
    Query(_params): Query<HashMap<String, String>>,
) -> Response {
    Json(json!(state.registry.cache().stats())).into_response()
}
