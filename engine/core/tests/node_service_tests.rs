// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the node kernel: identity, parenthood, cascade
//! deletes, locks, permission propagation and aspect enforcement.

mod common;

use bytes::Bytes;
use serde_json::json;

use antbox_core::domain::errors::{AntboxError, PropertyErrorCode};
use antbox_core::domain::filter::parse;
use antbox_core::domain::system::{mimetypes, uuids};
use common::{admin, engine, user};

#[tokio::test]
async fn test_create_and_read_file() {
    let engine = engine();
    let ctx = admin();

    let folder = engine
        .nodes
        .create(
            &ctx,
            json!({"title": "r", "mimetype": mimetypes::FOLDER, "uuid": "p-folder-001"}),
        )
        .await
        .unwrap();
    assert_eq!(folder.uuid, "p-folder-001");

    let file = engine
        .nodes
        .create_file(
            &ctx,
            json!({"title": "a.txt", "parent": "p-folder-001", "mimetype": "text/plain"}),
            Bytes::from_static(b"hi"),
        )
        .await
        .unwrap();

    let (node, content) = engine.nodes.export(&ctx, &file.uuid).await.unwrap();
    assert_eq!(node.uuid, file.uuid);
    assert_eq!(content, Bytes::from_static(b"hi"));

    let filters = parse(r#"parent == "p-folder-001""#).unwrap();
    let found = engine.nodes.find(&ctx, &filters, 25, 1).await.unwrap();
    assert_eq!(found.nodes.len(), 1);
    assert_eq!(found.nodes[0].uuid, file.uuid);
}

#[tokio::test]
async fn test_identity_and_fid_resolution() {
    let engine = engine();
    let ctx = admin();

    let folder = engine
        .nodes
        .create(
            &ctx,
            json!({"title": "F", "fid": "fid-1", "mimetype": mimetypes::FOLDER}),
        )
        .await
        .unwrap();

    let by_uuid = engine.nodes.get(&ctx, &folder.uuid).await.unwrap();
    assert_eq!(by_uuid.uuid, folder.uuid);

    let by_fid = engine.nodes.get(&ctx, "--fid--fid-1").await.unwrap();
    assert_eq!(by_fid.title, "F");
    assert_eq!(by_fid.uuid, folder.uuid);
}

#[tokio::test]
async fn test_fid_disambiguation_on_collision() {
    let engine = engine();
    let ctx = admin();

    let first = engine
        .nodes
        .create(&ctx, json!({"title": "Report", "mimetype": mimetypes::FOLDER}))
        .await
        .unwrap();
    let second = engine
        .nodes
        .create(&ctx, json!({"title": "Report", "mimetype": mimetypes::FOLDER}))
        .await
        .unwrap();

    assert_eq!(first.fid, "report");
    assert_eq!(second.fid, "report-2");
}

#[tokio::test]
async fn test_folder_cascade_delete() {
    let engine = engine();
    let ctx = admin();

    for (uuid, parent) in [
        ("p-folder-001", uuids::ROOT),
        ("a-folder-001", "p-folder-001"),
        ("b-folder-001", "p-folder-001"),
        ("c-folder-001", "b-folder-001"),
    ] {
        engine
            .nodes
            .create(
                &ctx,
                json!({"title": uuid, "uuid": uuid, "parent": parent, "mimetype": mimetypes::FOLDER}),
            )
            .await
            .unwrap();
    }

    engine.nodes.delete(&ctx, "p-folder-001").await.unwrap();

    for uuid in ["p-folder-001", "a-folder-001", "b-folder-001", "c-folder-001"] {
        assert!(matches!(
            engine.nodes.get(&ctx, uuid).await,
            Err(AntboxError::NodeNotFound(_))
        ));
    }
    let filters = parse(r#"parent == "p-folder-001""#).unwrap();
    let found = engine.nodes.find(&ctx, &filters, 25, 1).await.unwrap();
    assert!(found.nodes.is_empty());
}

#[tokio::test]
async fn test_mimetype_is_immutable() {
    let engine = engine();
    let ctx = admin();

    let folder = engine
        .nodes
        .create(&ctx, json!({"title": "docs", "mimetype": mimetypes::FOLDER}))
        .await
        .unwrap();

    let result = engine
        .nodes
        .update(&ctx, &folder.uuid, json!({"mimetype": "text/plain"}))
        .await;
    match result {
        Err(AntboxError::Validation(errors)) => {
            assert!(errors.has(PropertyErrorCode::ImmutableField));
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let unchanged = engine.nodes.get(&ctx, &folder.uuid).await.unwrap();
    assert_eq!(unchanged.mimetype, mimetypes::FOLDER);
}

#[tokio::test]
async fn test_lock_enforcement() {
    let engine = engine();
    let root = admin();

    // A shared folder writable by any authenticated principal
    engine
        .nodes
        .create(
            &root,
            json!({
                "title": "shared", "uuid": "shared-folder-1", "mimetype": mimetypes::FOLDER,
                "permissions": {"group": [], "authenticated": ["Read", "Write"], "anonymous": [], "advanced": {}}
            }),
        )
        .await
        .unwrap();

    let alice = user("alice@example.com", &["staff"]);
    let node = engine
        .nodes
        .create_file(
            &alice,
            json!({"title": "draft.txt", "parent": "shared-folder-1", "mimetype": "text/plain",
                   "permissions": {"group": [], "authenticated": ["Read", "Write"], "anonymous": [], "advanced": {}}}),
            Bytes::from_static(b"v1"),
        )
        .await
        .unwrap();

    engine
        .nodes
        .lock(&alice, &node.uuid, vec!["editors".to_string()])
        .await
        .unwrap();

    // Outsider is blocked with a lock error
    let bob = user("bob@example.com", &["sales"]);
    let result = engine
        .nodes
        .update(&bob, &node.uuid, json!({"title": "x"}))
        .await;
    match result {
        Err(AntboxError::Forbidden(message)) => assert!(message.contains("locked")),
        other => panic!("expected forbidden, got {other:?}"),
    }

    // A member of the unlock group may write
    let eve = user("eve@example.com", &["editors"]);
    engine
        .nodes
        .update(&eve, &node.uuid, json!({"title": "x"}))
        .await
        .unwrap();

    // The locking principal still writes, and may unlock
    engine
        .nodes
        .update(&alice, &node.uuid, json!({"title": "y"}))
        .await
        .unwrap();
    engine.nodes.unlock(&alice, &node.uuid).await.unwrap();

    engine
        .nodes
        .update(&bob, &node.uuid, json!({"title": "z"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_permission_propagation_through_ancestors() {
    let engine = engine();
    let root = admin();

    engine
        .nodes
        .create(
            &root,
            json!({
                "title": "P", "uuid": "p-folder-001", "mimetype": mimetypes::FOLDER,
                "permissions": {"group": [], "authenticated": ["Read"], "anonymous": [], "advanced": {}}
            }),
        )
        .await
        .unwrap();
    let file = engine
        .nodes
        .create_file(
            &root,
            json!({"title": "f.txt", "parent": "p-folder-001", "mimetype": "text/plain"}),
            Bytes::from_static(b"body"),
        )
        .await
        .unwrap();

    let bob = user("bob@example.com", &["sales"]);
    assert!(engine.nodes.get(&bob, &file.uuid).await.is_ok());

    // Revoking Read on the parent cuts off the child
    engine
        .nodes
        .update(
            &root,
            "p-folder-001",
            json!({"permissions": {"group": [], "authenticated": [], "anonymous": [], "advanced": {}}}),
        )
        .await
        .unwrap();

    assert!(matches!(
        engine.nodes.get(&bob, &file.uuid).await,
        Err(AntboxError::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_aspect_validation_on_create() {
    let engine = engine();
    let ctx = admin();

    engine
        .nodes
        .create(
            &ctx,
            json!({
                "title": "Billing", "uuid": "billing-aspect-1", "mimetype": mimetypes::ASPECT,
                "properties": [
                    {"name": "code", "title": "Code", "type": "string",
                     "required": true, "validationRegex": "^[A-Z]+$"}
                ]
            }),
        )
        .await
        .unwrap();

    let rejected = engine
        .nodes
        .create(
            &ctx,
            json!({
                "title": "invoice", "mimetype": mimetypes::META,
                "aspects": ["billing-aspect-1"],
                "properties": {"billing-aspect-1:code": "abc"}
            }),
        )
        .await;
    match rejected {
        Err(AntboxError::Validation(errors)) => {
            assert!(errors.has(PropertyErrorCode::PropertyDoesNotMatchRegex));
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let accepted = engine
        .nodes
        .create(
            &ctx,
            json!({
                "title": "invoice", "mimetype": mimetypes::META,
                "aspects": ["billing-aspect-1"],
                "properties": {"billing-aspect-1:code": "ABC"}
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        accepted.properties.get("billing-aspect-1:code"),
        Some(&json!("ABC"))
    );
}

#[tokio::test]
async fn test_cycle_prevention_on_move() {
    let engine = engine();
    let ctx = admin();

    for (uuid, parent) in [("a-folder-001", uuids::ROOT), ("b-folder-001", "a-folder-001")] {
        engine
            .nodes
            .create(
                &ctx,
                json!({"title": uuid, "uuid": uuid, "parent": parent, "mimetype": mimetypes::FOLDER}),
            )
            .await
            .unwrap();
    }

    let result = engine
        .nodes
        .update(&ctx, "a-folder-001", json!({"parent": "b-folder-001"}))
        .await;
    assert!(matches!(result, Err(AntboxError::BadRequest(_))));

    // Self-parenting is a cycle too
    let result = engine
        .nodes
        .update(&ctx, "a-folder-001", json!({"parent": "a-folder-001"}))
        .await;
    assert!(matches!(result, Err(AntboxError::BadRequest(_))));
}

#[tokio::test]
async fn test_system_singletons_are_indelible() {
    let engine = engine();
    let ctx = admin();

    let root = engine.nodes.get(&ctx, uuids::ROOT).await.unwrap();
    assert!(root.is_folder());

    assert!(matches!(
        engine.nodes.delete(&ctx, uuids::ROOT).await,
        Err(AntboxError::Forbidden(_))
    ));
    assert!(matches!(
        engine.nodes.delete(&ctx, uuids::ASPECTS).await,
        Err(AntboxError::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_export_rejects_non_file_variants() {
    let engine = engine();
    let ctx = admin();

    let folder = engine
        .nodes
        .create(&ctx, json!({"title": "docs", "mimetype": mimetypes::FOLDER}))
        .await
        .unwrap();

    assert!(matches!(
        engine.nodes.export(&ctx, &folder.uuid).await,
        Err(AntboxError::NodeType(_))
    ));
}

#[tokio::test]
async fn test_copy_duplicates_metadata_and_blob() {
    let engine = engine();
    let ctx = admin();

    engine
        .nodes
        .create(&ctx, json!({"title": "dest", "uuid": "dest-folder-1", "mimetype": mimetypes::FOLDER}))
        .await
        .unwrap();
    let file = engine
        .nodes
        .create_file(
            &ctx,
            json!({"title": "a.txt", "mimetype": "text/plain"}),
            Bytes::from_static(b"payload"),
        )
        .await
        .unwrap();

    let copy = engine
        .nodes
        .copy(&ctx, &file.uuid, "dest-folder-1")
        .await
        .unwrap();

    assert_ne!(copy.uuid, file.uuid);
    assert_eq!(copy.parent, "dest-folder-1");
    assert_eq!(copy.title, "a.txt");
    let (_, content) = engine.nodes.export(&ctx, &copy.uuid).await.unwrap();
    assert_eq!(content, Bytes::from_static(b"payload"));
}

#[tokio::test]
async fn test_breadcrumbs_run_root_to_node() {
    let engine = engine();
    let ctx = admin();

    for (uuid, parent) in [("a-folder-001", uuids::ROOT), ("b-folder-001", "a-folder-001")] {
        engine
            .nodes
            .create(
                &ctx,
                json!({"title": uuid, "uuid": uuid, "parent": parent, "mimetype": mimetypes::FOLDER}),
            )
            .await
            .unwrap();
    }

    let chain = engine.nodes.breadcrumbs(&ctx, "b-folder-001").await.unwrap();
    let uuids_in_chain: Vec<&str> = chain.iter().map(|n| n.uuid.as_str()).collect();
    assert_eq!(uuids_in_chain, vec![uuids::ROOT, "a-folder-001", "b-folder-001"]);
}

#[tokio::test]
async fn test_smart_folder_members_honor_caller_read() {
    let engine = engine();
    let root = admin();

    engine
        .nodes
        .create(
            &root,
            json!({"title": "open.txt", "uuid": "open-file-001", "mimetype": mimetypes::META}),
        )
        .await
        .unwrap();
    engine
        .nodes
        .create(
            &root,
            json!({
                "title": "secret.txt", "uuid": "secret-file-01", "mimetype": mimetypes::META,
                "permissions": {"group": [], "authenticated": [], "anonymous": [], "advanced": {}}
            }),
        )
        .await
        .unwrap();
    engine
        .nodes
        .create(
            &root,
            json!({
                "title": "all-meta", "uuid": "smart-folder-01",
                "mimetype": mimetypes::SMART_FOLDER,
                "filters": [["mimetype", "==", mimetypes::META]]
            }),
        )
        .await
        .unwrap();

    let all = engine.nodes.list(&root, "smart-folder-01").await.unwrap();
    assert_eq!(all.len(), 2);

    let bob = user("bob@example.com", &["sales"]);
    let visible = engine.nodes.list(&bob, "smart-folder-01").await.unwrap();
    let titles: Vec<&str> = visible.iter().map(|n| n.title.as_str()).collect();
    assert_eq!(titles, vec!["open.txt"]);
}

#[tokio::test]
async fn test_audit_trail_records_lifecycle_with_gapless_sequences() {
    let engine = engine();
    let ctx = admin();

    let node = engine
        .nodes
        .create(&ctx, json!({"title": "docs", "uuid": "docs-folder-01", "mimetype": mimetypes::FOLDER}))
        .await
        .unwrap();
    engine
        .nodes
        .update(&ctx, &node.uuid, json!({"title": "docs2"}))
        .await
        .unwrap();
    engine.nodes.delete(&ctx, &node.uuid).await.unwrap();

    common::settle().await;

    use antbox_core::domain::event_store::EventStore;
    let stream = engine
        .event_store
        .get_stream("docs-folder-01", mimetypes::FOLDER)
        .await
        .unwrap();
    assert_eq!(stream.len(), 3);
    let sequences: Vec<u64> = stream.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}
