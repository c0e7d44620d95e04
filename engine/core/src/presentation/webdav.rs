// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! WebDAV Surface
//!
//! Path-addressed protocol surface over the path resolver and the node
//! kernel. Method semantics:
//!
//! - `OPTIONS` advertises `DAV: 1, 2` and the full allow-list
//! - `PROPFIND` renders `D:multistatus` with `creationdate` (ISO-8601),
//!   `getlastmodified` (RFC 1123), `getetag` (`"<uuid>-<yyyymmddHHmmss>"`
//!   from UTC modifiedTime), `getcontentlength` for files,
//!   `<D:collection/>` for folders and `displayname`
//! - `PUT` to a missing path creates through `createFile` on the resolved
//!   parent; to an existing one replaces through `updateFile`
//! - `COPY`/`MOVE` honour same-host `Destination` headers
//! - `LOCK`/`UNLOCK` mint advisory `opaquelocktoken:` tokens; the kernel's
//!   lock semantics stay authoritative for conflict detection

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use dashmap::DashMap;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::sync::Arc;

use crate::application::tenants::{TenantRegistry, TenantServices};
use crate::domain::auth::{AuthMode, AuthenticationContext, Principal};
use crate::domain::errors::AntboxError;
use crate::domain::node::Node;
use crate::domain::system::mimetypes;
use crate::presentation::api::status_of;

const DAV_METHODS: &str = "OPTIONS, PROPFIND, GET, PUT, DELETE, MKCOL, COPY, MOVE, LOCK, UNLOCK, HEAD";

pub struct DavState {
    registry: Arc<TenantRegistry>,
    /// node uuid → advisory opaque lock token
    lock_tokens: DashMap<String, String>,
}

pub fn router(registry: Arc<TenantRegistry>) -> Router {
    let state = Arc::new(DavState {
        registry,
        lock_tokens: DashMap::new(),
    });
    Router::new()
        .route("/dav", any(dispatch))
        .route("/dav/{*path}", any(dispatch))
        .with_state(state)
}

async fn dispatch(State(state): State<Arc<DavState>>, request: Request) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();
    let body = match axum::body::to_bytes(request.into_body(), 64 * 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    let path = dav_path(&uri);
    let ctx = context_from(&headers);
    let services = match state.registry.tenant(&ctx.tenant) {
        Some(services) => services,
        None => return StatusCode::BAD_REQUEST.into_response(),
    };

    let result = match method.as_str() {
        "OPTIONS" => Ok(options_response()),
        "PROPFIND" => propfind(&services, &ctx, &path, &headers).await,
        "GET" => get_file(&services, &ctx, &path, true).await,
        "HEAD" => get_file(&services, &ctx, &path, false).await,
        "PUT" => put_file(&services, &ctx, &path, &headers, body).await,
        "DELETE" => delete_path(&services, &ctx, &path).await,
        "MKCOL" => mkcol(&services, &ctx, &path).await,
        "COPY" => copy_or_move(&services, &ctx, &path, &headers, false).await,
        "MOVE" => copy_or_move(&services, &ctx, &path, &headers, true).await,
        "LOCK" => lock(&state, &services, &ctx, &path).await,
        "UNLOCK" => unlock(&state, &services, &ctx, &path).await,
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    };

    match result {
        Ok(response) => response,
        Err(e) => (status_of(&e), e.to_string()).into_response(),
    }
}

// ============================================================================
// Context & path helpers
// ============================================================================

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

fn dav_path(uri: &Uri) -> String {
    let raw = uri.path();
    let stripped = raw.strip_prefix("/dav").unwrap_or(raw);
    if stripped.is_empty() {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

fn parent_and_name(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/".to_string(), trimmed[1..].to_string()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

/// `"<uuid>-<yyyymmddHHmmss>"` derived from UTC modifiedTime
pub fn etag_of(node: &Node) -> String {
    format!(
        "\"{}-{}\"",
        node.uuid,
        node.modified_time.format("%Y%m%d%H%M%S")
    )
}

fn rfc1123(time: &chrono::DateTime<chrono::Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

// ============================================================================
// Methods
// ============================================================================

fn options_response() -> Response {
    (
        StatusCode::OK,
        [("DAV", "1, 2"), ("Allow", DAV_METHODS), ("MS-Author-Via", "DAV")],
    )
        .into_response()
}

async fn propfind(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    path: &str,
    headers: &HeaderMap,
) -> Result<Response, AntboxError> {
    let node = services.path_resolver.resolve(ctx, path).await?;
    let depth = headers
        .get("depth")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("1");

    let mut members: Vec<(String, Node)> = vec![(normalized_href(path, &node), node.clone())];
    if depth != "0" && (node.is_folder() || node.is_smart_folder()) {
        for child in services.node_service.list(ctx, &node.uuid).await? {
            let href = format!(
                "{}/{}",
                normalized_href(path, &node).trim_end_matches('/'),
                child.title
            );
            members.push((href, child));
        }
    }

    let xml = multistatus(&members)
        .map_err(|e| AntboxError::Unknown(format!("failed to render multistatus: {e}")))?;
    Ok((
        StatusCode::MULTI_STATUS,
        [("content-type", "application/xml; charset=utf-8")],
        xml,
    )
        .into_response())
}

fn normalized_href(path: &str, node: &Node) -> String {
    let base = if path == "/" || path.is_empty() {
        "/dav/".to_string()
    } else {
        format!("/dav{}", path)
    };
    if node.is_folder() && !base.ends_with('/') {
        format!("{base}/")
    } else {
        base
    }
}

fn multistatus(members: &[(String, Node)]) -> Result<Vec<u8>, quick_xml::Error> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut multistatus = BytesStart::new("D:multistatus");
    multistatus.push_attribute(("xmlns:D", "DAV:"));
    writer.write_event(Event::Start(multistatus))?;

    for (href, node) in members {
        writer.write_event(Event::Start(BytesStart::new("D:response")))?;

        writer.write_event(Event::Start(BytesStart::new("D:href")))?;
        writer.write_event(Event::Text(BytesText::new(href)))?;
        writer.write_event(Event::End(BytesEnd::new("D:href")))?;

        writer.write_event(Event::Start(BytesStart::new("D:propstat")))?;
        writer.write_event(Event::Start(BytesStart::new("D:prop")))?;

        text_element(&mut writer, "D:displayname", &node.title)?;
        text_element(&mut writer, "D:creationdate", &node.created_time.to_rfc3339())?;
        text_element(&mut writer, "D:getlastmodified", &rfc1123(&node.modified_time))?;
        text_element(&mut writer, "D:getetag", &etag_of(node))?;

        writer.write_event(Event::Start(BytesStart::new("D:resourcetype")))?;
        if node.is_folder() || node.is_smart_folder() {
            writer.write_event(Event::Empty(BytesStart::new("D:collection")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("D:resourcetype")))?;

        if let crate::domain::node::NodePayload::File(file) = &node.payload {
            text_element(&mut writer, "D:getcontentlength", &file.size.to_string())?;
            text_element(&mut writer, "D:getcontenttype", &node.mimetype)?;
        }

        writer.write_event(Event::End(BytesEnd::new("D:prop")))?;
        text_element(&mut writer, "D:status", "HTTP/1.1 200 OK")?;
        writer.write_event(Event::End(BytesEnd::new("D:propstat")))?;

        writer.write_event(Event::End(BytesEnd::new("D:response")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("D:multistatus")))?;
    Ok(writer.into_inner().into_inner())
}

fn text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    value: &str,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

async fn get_file(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    path: &str,
    with_body: bool,
) -> Result<Response, AntboxError> {
    let node = services.path_resolver.resolve(ctx, path).await?;
    if node.is_folder() || node.is_smart_folder() {
        return Ok((
            StatusCode::OK,
            [("content-type", "httpd/unix-directory".to_string()), ("etag", etag_of(&node))],
        )
            .into_response());
    }
    let (node, content) = services.node_service.export(ctx, &node.uuid).await?;
    let headers = [
        ("content-type", node.mimetype.clone()),
        ("etag", etag_of(&node)),
        ("last-modified", rfc1123(&node.modified_time)),
        ("content-length", content.len().to_string()),
    ];
    if with_body {
        Ok((StatusCode::OK, headers, content).into_response())
    } else {
        Ok((StatusCode::OK, headers).into_response())
    }
}

async fn put_file(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    path: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, AntboxError> {
    match services.path_resolver.resolve(ctx, path).await {
        Ok(existing) => {
            services
                .node_service
                .update_file(ctx, &existing.uuid, body)
                .await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(AntboxError::NodeNotFound(_)) => {
            let (parent_path, name) = parent_and_name(path);
            let parent = services.path_resolver.resolve(ctx, &parent_path).await?;
            let mimetype = headers
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty() && *v != "application/octet-stream")
                .map(str::to_string)
                .or_else(|| infer::get(&body).map(|kind| kind.mime_type().to_string()))
                .unwrap_or_else(|| "application/octet-stream".to_string());

            let metadata = serde_json::json!({
                "title": name,
                "parent": parent.uuid,
                "mimetype": mimetype,
            });
            let node = services.node_service.create_file(ctx, metadata, body).await?;
            Ok((StatusCode::CREATED, [("etag", etag_of(&node))]).into_response())
        }
        Err(e) => Err(e),
    }
}

async fn delete_path(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    path: &str,
) -> Result<Response, AntboxError> {
    let node = services.path_resolver.resolve(ctx, path).await?;
    services.node_service.delete(ctx, &node.uuid).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn mkcol(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    path: &str,
) -> Result<Response, AntboxError> {
    if services.path_resolver.resolve(ctx, path).await.is_ok() {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }
    let (parent_path, name) = parent_and_name(path);
    let parent = services.path_resolver.resolve(ctx, &parent_path).await?;
    services
        .node_service
        .create(
            ctx,
            serde_json::json!({
                "title": name,
                "parent": parent.uuid,
                "mimetype": mimetypes::FOLDER,
            }),
        )
        .await?;
    Ok(StatusCode::CREATED.into_response())
}

/// Same-host `Destination` header → engine path
fn destination_path(headers: &HeaderMap) -> Result<String, AntboxError> {
    let destination = headers
        .get("destination")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AntboxError::BadRequest("Destination header is required".into()))?;
    let path = if let Ok(url) = url::Url::parse(destination) {
        url.path().to_string()
    } else {
        destination.to_string()
    };
    let path = path.strip_prefix("/dav").unwrap_or(&path).to_string();
    if path.is_empty() {
        return Err(AntboxError::BadRequest("invalid Destination header".into()));
    }
    Ok(path)
}

async fn copy_or_move(
    services: &TenantServices,
    ctx: &AuthenticationContext,
    path: &str,
    headers: &HeaderMap,
    is_move: bool,
) -> Result<Response, AntboxError> {
    let source = services.path_resolver.resolve(ctx, path).await?;
    let destination = destination_path(headers)?;
    let (dest_parent_path, dest_name) = parent_and_name(&destination);
    let dest_parent = services.path_resolver.resolve(ctx, &dest_parent_path).await?;

    if is_move {
        services
            .node_service
            .update(
                ctx,
                &source.uuid,
                serde_json::json!({
                    "parent": dest_parent.uuid,
                    "title": dest_name,
                }),
            )
            .await?;
    } else {
        let copy = services
            .node_service
            .copy(ctx, &source.uuid, &dest_parent.uuid)
            .await?;
        if copy.title != dest_name {
            services
                .node_service
                .update(ctx, &copy.uuid, serde_json::json!({ "title": dest_name }))
                .await?;
        }
    }
    Ok(StatusCode::CREATED.into_response())
}

async fn lock(
    state: &DavState,
    services: &TenantServices,
    ctx: &AuthenticationContext,
    path: &str,
) -> Result<Response, AntboxError> {
    let node = services.path_resolver.resolve(ctx, path).await?;
    services
        .node_service
        .lock(ctx, &node.uuid, Vec::new())
        .await?;

    let token = format!("opaquelocktoken:{}", uuid::Uuid::new_v4());
    state.lock_tokens.insert(node.uuid.clone(), token.clone());

    let body = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
            "<D:prop xmlns:D=\"DAV:\"><D:lockdiscovery><D:activelock>",
            "<D:locktype><D:write/></D:locktype>",
            "<D:lockscope><D:exclusive/></D:lockscope>",
            "<D:locktoken><D:href>{}</D:href></D:locktoken>",
            "</D:activelock></D:lockdiscovery></D:prop>"
        ),
        token
    );
    Ok((
        StatusCode::OK,
        [
            ("content-type", "application/xml; charset=utf-8".to_string()),
            ("lock-token", format!("<{token}>")),
        ],
        body,
    )
        .into_response())
}

async fn unlock(
    state: &DavState,
    services: &TenantServices,
    ctx: &AuthenticationContext,
    path: &str,
) -> Result<Response, AntboxError> {
    let node = services.path_resolver.resolve(ctx, path).await?;
    services.node_service.unlock(ctx, &node.uuid).await?;
    state.lock_tokens.remove(&node.uuid);
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_etag_format() {
        let mut node = Node::scaffold("file-0001", "a.txt", "text/plain");
        node.modified_time = chrono::Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(etag_of(&node), "\"file-0001-20260314092653\"");
    }

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent_and_name("/docs/a.txt"), ("/docs".into(), "a.txt".into()));
        assert_eq!(parent_and_name("/a.txt"), ("/".into(), "a.txt".into()));
        assert_eq!(parent_and_name("/docs/sub/"), ("/docs".into(), "sub".into()));
    }

    #[test]
    fn test_multistatus_renders_collection_and_file() {
        let mut folder = Node::scaffold("folder-0001", "docs", mimetypes::FOLDER);
        folder.modified_time = chrono::Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut file = Node::scaffold("file-0001", "a.txt", "text/plain");
        file.payload = crate::domain::node::NodePayload::File(crate::domain::node::FilePayload {
            size: 42,
        });

        let xml = multistatus(&[
            ("/dav/docs/".to_string(), folder),
            ("/dav/docs/a.txt".to_string(), file),
        ])
        .unwrap();
        let rendered = String::from_utf8(xml).unwrap();

        assert!(rendered.contains("<D:multistatus xmlns:D=\"DAV:\">"));
        assert!(rendered.contains("<D:collection/>"));
        assert!(rendered.contains("<D:getcontentlength>42</D:getcontentlength>"));
        assert!(rendered.contains("<D:getetag>"));
        assert!(rendered.contains("HTTP/1.1 200 OK"));
    }
}
