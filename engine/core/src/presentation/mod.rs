// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Protocol surfaces over the node kernel. Each router is mounted by the
//! host binary; all three share the tenant registry.

pub mod api;
pub mod cmis;
pub mod webdav;

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::application::tenants::TenantRegistry;

/// Compose the full HTTP surface: JSON API, WebDAV and CMIS
pub fn app(registry: Arc<TenantRegistry>) -> Router {
    Router::new()
        .merge(api::app(registry.clone()))
        .merge(webdav::router(registry.clone()))
        .merge(cmis::router(registry))
        .layer(TraceLayer::new_for_http())
}
