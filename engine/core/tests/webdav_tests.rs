// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for path resolution and cache coherence — the
//! engine-side half of the WebDAV surface.

mod common;

use bytes::Bytes;
use serde_json::json;

use antbox_core::domain::errors::AntboxError;
use antbox_core::domain::system::mimetypes;
use common::{admin, engine, settle, user, TENANT};

#[tokio::test]
async fn test_put_then_get_round_trip() {
    let engine = engine();
    let ctx = admin();

    engine
        .nodes
        .create(&ctx, json!({"title": "docs", "uuid": "docs-folder-01", "mimetype": mimetypes::FOLDER}))
        .await
        .unwrap();

    // PUT /docs/x.txt: resolve the parent by path, create the file
    let parent = engine.resolver.resolve(&ctx, "/docs").await.unwrap();
    assert_eq!(parent.uuid, "docs-folder-01");
    let file = engine
        .nodes
        .create_file(
            &ctx,
            json!({"title": "x.txt", "parent": parent.uuid, "mimetype": "text/plain"}),
            Bytes::from_static(b"y"),
        )
        .await
        .unwrap();
    settle().await;

    // GET /docs/x.txt returns the same body
    let resolved = engine.resolver.resolve(&ctx, "/docs/x.txt").await.unwrap();
    assert_eq!(resolved.uuid, file.uuid);
    let (_, content) = engine.nodes.export(&ctx, &resolved.uuid).await.unwrap();
    assert_eq!(content, Bytes::from_static(b"y"));

    // Both prefixes are cached now
    assert!(engine.cache.get(TENANT, &ctx.principal.email, "/docs").is_some());
    assert!(engine
        .cache
        .get(TENANT, &ctx.principal.email, "/docs/x.txt")
        .is_some());

    // A second resolution is served from the cache (plus re-verification)
    let before = engine.cache.stats().hits;
    let again = engine.resolver.resolve(&ctx, "/docs/x.txt").await.unwrap();
    assert_eq!(again.uuid, file.uuid);
    assert!(engine.cache.stats().hits > before);
}

#[tokio::test]
async fn test_root_resolution() {
    let engine = engine();
    let ctx = admin();

    let root = engine.resolver.resolve(&ctx, "/").await.unwrap();
    assert_eq!(root.uuid, "--root--");
    let root = engine.resolver.resolve(&ctx, "").await.unwrap();
    assert_eq!(root.uuid, "--root--");
}

#[tokio::test]
async fn test_missing_path_is_node_not_found() {
    let engine = engine();
    let ctx = admin();

    assert!(matches!(
        engine.resolver.resolve(&ctx, "/nope/nothing.txt").await,
        Err(AntboxError::NodeNotFound(_))
    ));
}

#[tokio::test]
async fn test_url_encoded_segments() {
    let engine = engine();
    let ctx = admin();

    engine
        .nodes
        .create(&ctx, json!({"title": "q3 report", "uuid": "q3-folder-001", "mimetype": mimetypes::FOLDER}))
        .await
        .unwrap();

    let node = engine.resolver.resolve(&ctx, "/q3%20report").await.unwrap();
    assert_eq!(node.uuid, "q3-folder-001");
}

#[tokio::test]
async fn test_cache_coherence_after_rename() {
    let engine = engine();
    let ctx = admin();

    engine
        .nodes
        .create(&ctx, json!({"title": "docs", "uuid": "docs-folder-01", "mimetype": mimetypes::FOLDER}))
        .await
        .unwrap();
    let file = engine
        .nodes
        .create_file(
            &ctx,
            json!({"title": "a.txt", "parent": "docs-folder-01", "mimetype": "text/plain"}),
            Bytes::from_static(b"v1"),
        )
        .await
        .unwrap();

    // Warm the cache
    engine.resolver.resolve(&ctx, "/docs/a.txt").await.unwrap();

    // Mutate: rename the file
    engine
        .nodes
        .update(&ctx, &file.uuid, json!({"title": "b.txt"}))
        .await
        .unwrap();
    settle().await;

    // The old path no longer resolves; the new one does
    assert!(matches!(
        engine.resolver.resolve(&ctx, "/docs/a.txt").await,
        Err(AntboxError::NodeNotFound(_))
    ));
    let renamed = engine.resolver.resolve(&ctx, "/docs/b.txt").await.unwrap();
    assert_eq!(renamed.uuid, file.uuid);
}

#[tokio::test]
async fn test_cache_coherence_after_move_and_delete() {
    let engine = engine();
    let ctx = admin();

    for (uuid, title) in [("src-folder-001", "src"), ("dst-folder-001", "dst")] {
        engine
            .nodes
            .create(&ctx, json!({"title": title, "uuid": uuid, "mimetype": mimetypes::FOLDER}))
            .await
            .unwrap();
    }
    let file = engine
        .nodes
        .create_file(
            &ctx,
            json!({"title": "a.txt", "parent": "src-folder-001", "mimetype": "text/plain"}),
            Bytes::from_static(b"v1"),
        )
        .await
        .unwrap();
    engine.resolver.resolve(&ctx, "/src/a.txt").await.unwrap();

    engine
        .nodes
        .update(&ctx, &file.uuid, json!({"parent": "dst-folder-001"}))
        .await
        .unwrap();
    settle().await;

    assert!(engine.resolver.resolve(&ctx, "/src/a.txt").await.is_err());
    let moved = engine.resolver.resolve(&ctx, "/dst/a.txt").await.unwrap();
    assert_eq!(moved.uuid, file.uuid);

    engine.nodes.delete(&ctx, &file.uuid).await.unwrap();
    settle().await;
    assert!(engine.resolver.resolve(&ctx, "/dst/a.txt").await.is_err());
}

#[tokio::test]
async fn test_cached_hit_reverifies_permissions() {
    let engine = engine();
    let root = admin();

    engine
        .nodes
        .create(
            &root,
            json!({
                "title": "docs", "uuid": "docs-folder-01", "mimetype": mimetypes::FOLDER,
                "permissions": {"group": [], "authenticated": ["Read"], "anonymous": [], "advanced": {}}
            }),
        )
        .await
        .unwrap();

    let bob = user("bob@example.com", &["sales"]);
    assert!(engine.resolver.resolve(&bob, "/docs").await.is_ok());

    // Revoke read; the cached entry must not leak the node
    engine
        .nodes
        .update(
            &root,
            "docs-folder-01",
            json!({"permissions": {"group": [], "authenticated": [], "anonymous": [], "advanced": {}}}),
        )
        .await
        .unwrap();
    settle().await;

    assert!(matches!(
        engine.resolver.resolve(&bob, "/docs").await,
        Err(AntboxError::Forbidden(_)) | Err(AntboxError::NodeNotFound(_))
    ));
}
