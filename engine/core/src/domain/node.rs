// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node Model
//!
//! Every addressable entity in the engine — files, folders, smart folders,
//! aspects, users, groups, API keys, agents, workflows, features, articles —
//! is a `Node`: a shared metadata envelope plus a variant payload
//! discriminated by `mimetype`. The discriminator is immutable after
//! create.
//!
//! `Node::metadata()` flattens a node into its JSON metadata document (the
//! form the repository persists and the filter engine evaluates);
//! `NodeFactory::from_metadata` rehydrates the correct variant, failing on
//! unknown system discriminators. Any mimetype outside the reserved
//! `application/vnd.antbox.` prefix is a plain File.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::aspect::AspectPayload;
use crate::domain::errors::{AntboxError, PropertyError, PropertyErrorCode, ValidationErrors};
use crate::domain::filter::NodeFilters;
use crate::domain::permissions::Permissions;
use crate::domain::system::{self, mimetypes, uuids};

static UUID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\w][\w-]{7,}|--[\w-]{4,}--)$").expect("static regex"));
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"));

// ============================================================================
// Envelope
// ============================================================================

/// The universal entity: shared envelope + variant payload
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub uuid: String,
    /// Friendly id, unique per tenant when present
    pub fid: String,
    pub title: String,
    pub description: Option<String>,
    /// Variant discriminator; immutable after create
    pub mimetype: String,
    /// UUID of the enclosing folder, or the root sentinel
    pub parent: String,
    /// Owning user email; owners hold all permissions implicitly
    pub owner: String,
    /// Owning group, consulted by the `permissions.group` band
    pub group: String,
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
    pub permissions: Permissions,
    pub locked: bool,
    pub locked_by: Option<String>,
    pub unlock_authorized_groups: Vec<String>,
    pub workflow_instance_uuid: Option<String>,
    pub workflow_state: Option<String>,
    /// Aspect UUIDs attached to this node
    pub aspects: Vec<String>,
    /// Aspect-typed values keyed `<aspectUuid>:<propName>`
    pub properties: Map<String, Value>,
    pub payload: NodePayload,
}

// ============================================================================
// Variant payloads
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderPayload {
    /// Feature UUIDs executed when a child is created
    #[serde(default)]
    pub on_create: Vec<String>,
    /// Feature UUIDs executed when a child is updated
    #[serde(default)]
    pub on_update: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartFolderPayload {
    /// Contents are computed on read; no children are stored
    #[serde(default)]
    pub filters: NodeFilters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    /// Binary body size in bytes; the body lives in the storage provider
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub email: String,
    /// Primary group
    #[serde(default)]
    pub group: String,
    /// Secondary groups
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyPayload {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub secret: String,
}

/// Variant over node kinds. Unit variants follow the aspectable pattern:
/// their domain attributes live in the envelope `properties` map.
#[derive(Debug, Clone, PartialEq)]
pub enum NodePayload {
    Folder(FolderPayload),
    SmartFolder(SmartFolderPayload),
    File(FilePayload),
    Meta,
    Aspect(AspectPayload),
    User(UserPayload),
    Group,
    ApiKey(ApiKeyPayload),
    Agent,
    Workflow,
    Feature,
    Article,
}

impl Node {
    /// Minimal node with sane defaults; callers fill the rest before
    /// validation
    pub fn scaffold(uuid: impl Into<String>, title: impl Into<String>, mimetype: &str) -> Self {
        let now = Utc::now();
        Self {
            uuid: uuid.into(),
            fid: String::new(),
            title: title.into(),
            description: None,
            mimetype: mimetype.to_string(),
            parent: uuids::ROOT.to_string(),
            owner: String::new(),
            group: String::new(),
            created_time: now,
            modified_time: now,
            permissions: Permissions::default(),
            locked: false,
            locked_by: None,
            unlock_authorized_groups: Vec::new(),
            workflow_instance_uuid: None,
            workflow_state: None,
            aspects: Vec::new(),
            properties: Map::new(),
            payload: default_payload(mimetype),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.payload, NodePayload::Folder(_))
    }

    pub fn is_smart_folder(&self) -> bool {
        matches!(self.payload, NodePayload::SmartFolder(_))
    }

    /// File-like variants carry a binary body in the storage provider
    pub fn is_file_like(&self) -> bool {
        matches!(self.payload, NodePayload::File(_))
    }

    pub fn is_aspectable(&self) -> bool {
        matches!(
            self.payload,
            NodePayload::File(_) | NodePayload::Folder(_) | NodePayload::Meta | NodePayload::Article
        )
    }

    pub fn is_system_folder(&self) -> bool {
        self.is_folder() && system::is_system_folder(&self.uuid)
    }

    /// Flatten to the JSON metadata document
    pub fn metadata(&self) -> Value {
        let mut map = Map::new();
        map.insert("uuid".into(), Value::String(self.uuid.clone()));
        map.insert("fid".into(), Value::String(self.fid.clone()));
        map.insert("title".into(), Value::String(self.title.clone()));
        if let Some(description) = &self.description {
            map.insert("description".into(), Value::String(description.clone()));
        }
        map.insert("mimetype".into(), Value::String(self.mimetype.clone()));
        map.insert("parent".into(), Value::String(self.parent.clone()));
        map.insert("owner".into(), Value::String(self.owner.clone()));
        map.insert("group".into(), Value::String(self.group.clone()));
        map.insert(
            "createdTime".into(),
            serde_json::to_value(self.created_time).unwrap_or(Value::Null),
        );
        map.insert(
            "modifiedTime".into(),
            serde_json::to_value(self.modified_time).unwrap_or(Value::Null),
        );
        map.insert(
            "permissions".into(),
            serde_json::to_value(&self.permissions).unwrap_or(Value::Null),
        );
        map.insert("locked".into(), Value::Bool(self.locked));
        if let Some(locked_by) = &self.locked_by {
            map.insert("lockedBy".into(), Value::String(locked_by.clone()));
        }
        if !self.unlock_authorized_groups.is_empty() {
            map.insert(
                "unlockAuthorizedGroups".into(),
                serde_json::to_value(&self.unlock_authorized_groups).unwrap_or(Value::Null),
            );
        }
        if let Some(wf) = &self.workflow_instance_uuid {
            map.insert("workflowInstanceUuid".into(), Value::String(wf.clone()));
        }
        if let Some(state) = &self.workflow_state {
            map.insert("workflowState".into(), Value::String(state.clone()));
        }
        map.insert(
            "aspects".into(),
            serde_json::to_value(&self.aspects).unwrap_or(Value::Null),
        );
        map.insert("properties".into(), Value::Object(self.properties.clone()));

        let payload = match &self.payload {
            NodePayload::Folder(p) => serde_json::to_value(p).ok(),
            NodePayload::SmartFolder(p) => serde_json::to_value(p).ok(),
            NodePayload::File(p) => serde_json::to_value(p).ok(),
            NodePayload::Aspect(p) => serde_json::to_value(p).ok(),
            NodePayload::User(p) => serde_json::to_value(p).ok(),
            NodePayload::ApiKey(p) => serde_json::to_value(p).ok(),
            _ => None,
        };
        if let Some(Value::Object(extra)) = payload {
            for (k, v) in extra {
                map.insert(k, v);
            }
        }

        Value::Object(map)
    }

    /// Per-variant invariant validation
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.title.trim().is_empty() {
            errors.push(PropertyError::new(
                PropertyErrorCode::NodeTitleRequired,
                "title",
                "title cannot be empty",
            ));
        }
        if !UUID_RE.is_match(&self.uuid) {
            errors.push(PropertyError::new(
                PropertyErrorCode::InvalidUuid,
                "uuid",
                format!("'{}' is not a valid node identifier", self.uuid),
            ));
        }
        if self.mimetype.trim().is_empty() {
            errors.push(PropertyError::new(
                PropertyErrorCode::InvalidMimetype,
                "mimetype",
                "mimetype cannot be empty",
            ));
        }
        if self.parent.trim().is_empty() {
            errors.push(PropertyError::new(
                PropertyErrorCode::InvalidParent,
                "parent",
                "parent cannot be empty",
            ));
        }

        // System-scoped variants live under their canonical folder
        if let Some(canonical) = system::canonical_parent(&self.mimetype) {
            if self.parent != canonical {
                errors.push(PropertyError::new(
                    PropertyErrorCode::InvalidParent,
                    "parent",
                    format!(
                        "nodes of kind {} live under {}",
                        self.mimetype, canonical
                    ),
                ));
            }
        }

        match &self.payload {
            NodePayload::User(user) => {
                if !EMAIL_RE.is_match(&user.email) {
                    errors.push(PropertyError::new(
                        PropertyErrorCode::InvalidEmail,
                        "email",
                        format!("'{}' is not a valid email", user.email),
                    ));
                }
            }
            NodePayload::Aspect(aspect) => {
                errors.merge(aspect.validate_schema());
            }
            _ => {}
        }

        // Invariant 6: locked implies lockedBy
        if self.locked && self.locked_by.as_deref().unwrap_or("").is_empty() {
            errors.push(PropertyError::new(
                PropertyErrorCode::PropertyRequired,
                "lockedBy",
                "locked nodes must record the locking principal",
            ));
        }

        errors.into_result()
    }

    /// Apply a metadata patch, producing a new value with `modifiedTime`
    /// advanced. Rejects changes to `uuid`, `mimetype`, `createdTime` and
    /// the canonical parent of system-scoped variants; cannot clear
    /// `title`.
    pub fn update(&self, patch: &Value) -> Result<Node, AntboxError> {
        let patch_obj = patch
            .as_object()
            .ok_or_else(|| AntboxError::BadRequest("patch must be an object".into()))?;

        let mut errors = ValidationErrors::new();
        let current = self.metadata();
        for field in ["uuid", "mimetype", "createdTime"] {
            if let Some(value) = patch_obj.get(field) {
                if current.get(field) != Some(value) {
                    errors.push(PropertyError::new(
                        PropertyErrorCode::ImmutableField,
                        field,
                        format!("{field} cannot change after create"),
                    ));
                }
            }
        }
        if let Some(title) = patch_obj.get("title") {
            if title.as_str().map(|t| t.trim().is_empty()).unwrap_or(true) {
                errors.push(PropertyError::new(
                    PropertyErrorCode::NodeTitleRequired,
                    "title",
                    "title cannot be cleared",
                ));
            }
        }
        if let Some(canonical) = system::canonical_parent(&self.mimetype) {
            if let Some(parent) = patch_obj.get("parent").and_then(Value::as_str) {
                if parent != canonical {
                    errors.push(PropertyError::new(
                        PropertyErrorCode::InvalidParent,
                        "parent",
                        format!("canonical parent {canonical} cannot change"),
                    ));
                }
            }
        }
        errors.into_result().map_err(AntboxError::Validation)?;

        let mut doc = match current {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch_obj {
            if key == "properties" {
                // Property patches merge instead of replacing the whole map
                if let (Some(existing), Some(incoming)) = (
                    doc.get_mut("properties").and_then(Value::as_object_mut),
                    value.as_object(),
                ) {
                    for (pk, pv) in incoming {
                        existing.insert(pk.clone(), pv.clone());
                    }
                    continue;
                }
            }
            doc.insert(key.clone(), value.clone());
        }

        let mut updated = NodeFactory::from_metadata(&Value::Object(doc))?;
        updated.created_time = self.created_time;
        updated.modified_time = Utc::now();
        updated.validate()?;
        Ok(updated)
    }
}

fn default_payload(mimetype: &str) -> NodePayload {
    match mimetype {
        mimetypes::FOLDER => NodePayload::Folder(FolderPayload::default()),
        mimetypes::SMART_FOLDER => NodePayload::SmartFolder(SmartFolderPayload::default()),
        mimetypes::META => NodePayload::Meta,
        mimetypes::ASPECT => NodePayload::Aspect(AspectPayload::default()),
        mimetypes::USER => NodePayload::User(UserPayload::default()),
        mimetypes::GROUP => NodePayload::Group,
        mimetypes::API_KEY => NodePayload::ApiKey(ApiKeyPayload::default()),
        mimetypes::AGENT => NodePayload::Agent,
        mimetypes::WORKFLOW => NodePayload::Workflow,
        mimetypes::FEATURE => NodePayload::Feature,
        mimetypes::ARTICLE => NodePayload::Article,
        _ => NodePayload::File(FilePayload::default()),
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Rehydrates nodes from raw metadata documents
pub struct NodeFactory;

impl NodeFactory {
    /// Build the correct variant from a metadata document. Unknown
    /// `application/vnd.antbox.*` discriminators fail; any other mimetype
    /// is a File.
    pub fn from_metadata(metadata: &Value) -> Result<Node, AntboxError> {
        let obj = metadata
            .as_object()
            .ok_or_else(|| AntboxError::BadRequest("metadata must be an object".into()))?;

        let mimetype = obj
            .get("mimetype")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AntboxError::Validation(ValidationErrors::single(
                    PropertyErrorCode::InvalidMimetype,
                    "mimetype",
                    "mimetype is required",
                ))
            })?;

        let payload = Self::payload_from(&mimetype, metadata)?;

        let str_field = |key: &str| -> String {
            obj.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let opt_field = |key: &str| -> Option<String> {
            obj.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let time_field = |key: &str| -> DateTime<Utc> {
            obj.get(key)
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_else(Utc::now)
        };

        let parent = {
            let p = str_field("parent");
            if p.is_empty() {
                uuids::ROOT.to_string()
            } else {
                p
            }
        };

        Ok(Node {
            uuid: str_field("uuid"),
            fid: str_field("fid"),
            title: str_field("title"),
            description: opt_field("description"),
            mimetype,
            parent,
            owner: str_field("owner"),
            group: str_field("group"),
            created_time: time_field("createdTime"),
            modified_time: time_field("modifiedTime"),
            permissions: obj
                .get("permissions")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            locked: obj.get("locked").and_then(Value::as_bool).unwrap_or(false),
            locked_by: opt_field("lockedBy"),
            unlock_authorized_groups: obj
                .get("unlockAuthorizedGroups")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            workflow_instance_uuid: opt_field("workflowInstanceUuid"),
            workflow_state: opt_field("workflowState"),
            aspects: obj
                .get("aspects")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            properties: obj
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            payload,
        })
    }

    fn payload_from(mimetype: &str, metadata: &Value) -> Result<NodePayload, AntboxError> {
        Ok(match mimetype {
            mimetypes::FOLDER => NodePayload::Folder(serde_json::from_value(metadata.clone())?),
            mimetypes::SMART_FOLDER => {
                NodePayload::SmartFolder(serde_json::from_value(metadata.clone())?)
            }
            mimetypes::META => NodePayload::Meta,
            mimetypes::ASPECT => NodePayload::Aspect(serde_json::from_value(metadata.clone())?),
            mimetypes::USER => NodePayload::User(serde_json::from_value(metadata.clone())?),
            mimetypes::GROUP => NodePayload::Group,
            mimetypes::API_KEY => NodePayload::ApiKey(serde_json::from_value(metadata.clone())?),
            mimetypes::AGENT => NodePayload::Agent,
            mimetypes::WORKFLOW => NodePayload::Workflow,
            mimetypes::FEATURE => NodePayload::Feature,
            mimetypes::ARTICLE => NodePayload::Article,
            other if mimetypes::is_reserved(other) => {
                return Err(AntboxError::Validation(ValidationErrors::single(
                    PropertyErrorCode::InvalidMimetype,
                    "mimetype",
                    format!("unknown node discriminator: {other}"),
                )));
            }
            _ => NodePayload::File(serde_json::from_value(metadata.clone())?),
        })
    }
}

/// Slugified friendly id derived from a title: lowercase, alphanumerics
/// kept, everything else collapsed to single hyphens.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_hyphen = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scaffold_and_metadata_round_trip() {
        let mut node = Node::scaffold("folder-0001", "Documents", mimetypes::FOLDER);
        node.owner = "alice@example.com".to_string();
        node.group = "staff".to_string();
        node.fid = "documents".to_string();

        let doc = node.metadata();
        assert_eq!(doc["uuid"], json!("folder-0001"));
        assert_eq!(doc["mimetype"], json!(mimetypes::FOLDER));
        assert_eq!(doc["onCreate"], json!([]));

        let back = NodeFactory::from_metadata(&doc).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_file_variant_from_arbitrary_mimetype() {
        let node = NodeFactory::from_metadata(&json!({
            "uuid": "file-0001",
            "title": "a.txt",
            "mimetype": "text/plain",
            "parent": "--root--",
            "owner": "alice@example.com",
            "size": 42
        }))
        .unwrap();
        assert!(node.is_file_like());
        match &node.payload {
            NodePayload::File(f) => assert_eq!(f.size, 42),
            other => panic!("expected file payload, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_system_discriminator_fails() {
        let result = NodeFactory::from_metadata(&json!({
            "uuid": "node-0001",
            "title": "x",
            "mimetype": "application/vnd.antbox.widget"
        }));
        match result {
            Err(AntboxError::Validation(errors)) => {
                assert!(errors.has(PropertyErrorCode::InvalidMimetype));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_rejects_empty_title_and_bad_uuid() {
        let mut node = Node::scaffold("x", "", mimetypes::FOLDER);
        node.owner = "alice@example.com".to_string();
        let errors = node.validate().unwrap_err();
        assert!(errors.has(PropertyErrorCode::NodeTitleRequired));
        assert!(errors.has(PropertyErrorCode::InvalidUuid));
    }

    #[test]
    fn test_reserved_uuid_is_valid_identifier() {
        let mut node = Node::scaffold("--aspects--", "Aspects", mimetypes::FOLDER);
        node.owner = "root@antbox.io".to_string();
        assert!(node.validate().is_ok());
    }

    #[test]
    fn test_canonical_parent_enforced_for_system_variants() {
        let mut node = Node::scaffold("aspect-0001", "Billing", mimetypes::ASPECT);
        node.owner = "alice@example.com".to_string();
        node.parent = "--root--".to_string();
        let errors = node.validate().unwrap_err();
        assert!(errors.has(PropertyErrorCode::InvalidParent));

        node.parent = uuids::ASPECTS.to_string();
        assert!(node.validate().is_ok());
    }

    #[test]
    fn test_user_email_validation() {
        let mut node = Node::scaffold("user-00001", "Bob", mimetypes::USER);
        node.owner = "root@antbox.io".to_string();
        node.parent = uuids::USERS.to_string();
        node.payload = NodePayload::User(UserPayload {
            email: "not-an-email".to_string(),
            group: "staff".to_string(),
            groups: vec![],
        });
        let errors = node.validate().unwrap_err();
        assert!(errors.has(PropertyErrorCode::InvalidEmail));
    }

    #[test]
    fn test_update_rejects_immutable_fields() {
        let mut node = Node::scaffold("file-0001", "a.txt", "text/plain");
        node.owner = "alice@example.com".to_string();

        let err = node.update(&json!({"mimetype": "image/png"})).unwrap_err();
        match err {
            AntboxError::Validation(errors) => {
                assert!(errors.has(PropertyErrorCode::ImmutableField))
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let err = node.update(&json!({"title": ""})).unwrap_err();
        match err {
            AntboxError::Validation(errors) => {
                assert!(errors.has(PropertyErrorCode::NodeTitleRequired))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_update_advances_modified_time_and_merges_properties() {
        let mut node = Node::scaffold("file-0001", "a.txt", "text/plain");
        node.owner = "alice@example.com".to_string();
        node.properties
            .insert("billing:code".to_string(), json!("ABC"));

        let updated = node
            .update(&json!({
                "title": "b.txt",
                "properties": {"billing:owner": "ops"}
            }))
            .unwrap();

        assert_eq!(updated.title, "b.txt");
        assert_eq!(updated.created_time, node.created_time);
        assert!(updated.modified_time >= node.modified_time);
        assert_eq!(updated.properties["billing:code"], json!("ABC"));
        assert_eq!(updated.properties["billing:owner"], json!("ops"));
        assert_eq!(updated.mimetype, node.mimetype);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Quarterly Report (Q3)"), "quarterly-report-q3");
        assert_eq!(slugify("  hello   world "), "hello-world");
        assert_eq!(slugify("---"), "");
    }
}
