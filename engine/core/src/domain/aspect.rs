// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Aspect System
//!
//! Aspects are user-defined schemas attachable to aspect-able node
//! variants. Each declared property contributes a sub-predicate (required,
//! runtime type, validation list, validation regex); the aspect's
//! specification is the AND of all of them. A node stores the value of
//! property `p` of aspect `A` under the composite key `A.uuid + ":" +
//! p.name` in its generic `properties` map.
//!
//! Aspect creation rejects schemas whose `default` value fails the
//! property's own constraints.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::{PropertyError, PropertyErrorCode, ValidationErrors};
use crate::domain::filter::NodeFilters;
use crate::domain::node::Node;

static PROPERTY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{2,}$").expect("static regex"));

/// Declared value type of an aspect property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    String,
    Number,
    Boolean,
    Date,
    DateTime,
    Uuid,
    RichText,
    Text,
    Json,
    Array,
}

/// One property in an aspect schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectProperty {
    pub name: String,
    pub title: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    /// Element type when `property_type` is `Array`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_type: Option<PropertyType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_list: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_filters: Option<NodeFilters>,
    /// Constrains which node mimetypes a `uuid` lookup property may point at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_mimetype: Option<String>,
}

/// Aspect variant payload: a reusable schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectPayload {
    /// Applicability filters: which nodes this aspect may attach to
    #[serde(default)]
    pub filters: NodeFilters,
    #[serde(default)]
    pub properties: Vec<AspectProperty>,
}

impl AspectPayload {
    /// Schema self-validation: property naming and default values
    pub fn validate_schema(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for property in &self.properties {
            if !PROPERTY_NAME_RE.is_match(&property.name) {
                errors.push(PropertyError::new(
                    PropertyErrorCode::InvalidPropertyName,
                    property.name.clone(),
                    "property names match [A-Za-z_][A-Za-z0-9_]{2,}",
                ));
            }
            if let Some(default) = &property.default {
                let mut default_errors = ValidationErrors::new();
                check_property(property, &property.name, Some(default), &mut default_errors);
                if !default_errors.is_empty() {
                    errors.push(PropertyError::new(
                        PropertyErrorCode::InvalidDefaultValue,
                        property.name.clone(),
                        "default value fails the property's own constraints",
                    ));
                }
            }
        }
        errors
    }
}

/// Composite predicate over one aspect's declared properties
#[derive(Debug, Clone)]
pub struct AspectSpecification {
    pub aspect_uuid: String,
    pub properties: Vec<AspectProperty>,
}

/// Build the specification for an aspect node
pub fn specification_from(aspect: &Node) -> Option<AspectSpecification> {
    match &aspect.payload {
        crate::domain::node::NodePayload::Aspect(payload) => Some(AspectSpecification {
            aspect_uuid: aspect.uuid.clone(),
            properties: payload.properties.clone(),
        }),
        _ => None,
    }
}

impl AspectSpecification {
    /// Composite key a node uses to store `property` of this aspect
    pub fn key_of(&self, property: &AspectProperty) -> String {
        format!("{}:{}", self.aspect_uuid, property.name)
    }

    /// Evaluate every property sub-predicate against a node's properties
    /// map, aggregating all failures.
    pub fn satisfied_by(&self, node: &Node) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for property in &self.properties {
            let key = self.key_of(property);
            let value = node.properties.get(&key);
            check_property(property, &key, value, &mut errors);
        }
        errors.into_result()
    }
}

fn check_property(
    property: &AspectProperty,
    key: &str,
    value: Option<&Value>,
    errors: &mut ValidationErrors,
) {
    // 1. Required: a literal `false` counts as present; empty arrays fail
    let present = match value {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    };
    if property.required && !present {
        errors.push(PropertyError::new(
            PropertyErrorCode::PropertyRequired,
            key,
            "required property missing",
        ));
        return;
    }
    let Some(value) = value else {
        return;
    };
    if value.is_null() {
        return;
    }

    // 2. Runtime type
    if !type_matches(property.property_type, property.array_type, value) {
        errors.push(PropertyError::new(
            PropertyErrorCode::PropertyType,
            key,
            format!("value does not have type {:?}", property.property_type),
        ));
        return;
    }

    // 3 & 4 apply only to strings and arrays of strings
    let string_elements: Vec<&str> = match (property.property_type, value) {
        (PropertyType::String, Value::String(s)) => vec![s.as_str()],
        (PropertyType::Array, Value::Array(items))
            if property.array_type == Some(PropertyType::String) =>
        {
            items.iter().filter_map(Value::as_str).collect()
        }
        _ => Vec::new(),
    };

    if let Some(list) = &property.validation_list {
        for element in &string_elements {
            if !list.iter().any(|allowed| allowed == element) {
                errors.push(PropertyError::new(
                    PropertyErrorCode::PropertyNotInList,
                    key,
                    format!("'{element}' is not an allowed value"),
                ));
            }
        }
    }

    if let Some(pattern) = &property.validation_regex {
        if let Ok(re) = Regex::new(&anchored(pattern)) {
            for element in &string_elements {
                if !re.is_match(element) {
                    errors.push(PropertyError::new(
                        PropertyErrorCode::PropertyDoesNotMatchRegex,
                        key,
                        format!("'{element}' does not match {pattern}"),
                    ));
                }
            }
        }
    }
}

fn anchored(pattern: &str) -> String {
    let mut anchored = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(pattern);
    if !pattern.ends_with('$') {
        anchored.push('$');
    }
    anchored
}

fn type_matches(declared: PropertyType, array_type: Option<PropertyType>, value: &Value) -> bool {
    match declared {
        PropertyType::String => value.is_string(),
        PropertyType::Number => value.is_number(),
        PropertyType::Boolean => value.is_boolean(),
        PropertyType::Array => match value {
            Value::Array(items) => match array_type {
                Some(element_type) => items
                    .iter()
                    .all(|item| type_matches(element_type, None, item)),
                None => true,
            },
            _ => false,
        },
        // Date, DateTime, Uuid, RichText, Text, Json defer to backends
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::{Node, NodePayload};
    use crate::domain::system::{mimetypes, uuids};
    use serde_json::json;

    fn aspect_node(properties: Vec<AspectProperty>) -> Node {
        let mut node = Node::scaffold("billing-aspect", "Billing", mimetypes::ASPECT);
        node.parent = uuids::ASPECTS.to_string();
        node.owner = "root@antbox.io".to_string();
        node.payload = NodePayload::Aspect(AspectPayload {
            filters: NodeFilters::empty(),
            properties,
        });
        node
    }

    fn code_property() -> AspectProperty {
        AspectProperty {
            name: "code".to_string(),
            title: "Code".to_string(),
            property_type: PropertyType::String,
            array_type: None,
            required: true,
            readonly: false,
            searchable: false,
            default: None,
            validation_regex: Some("^[A-Z]+$".to_string()),
            validation_list: None,
            validation_filters: None,
            string_mimetype: None,
        }
    }

    fn target_node(properties: serde_json::Map<String, Value>) -> Node {
        let mut node = Node::scaffold("file-0001", "invoice.pdf", "application/pdf");
        node.owner = "alice@example.com".to_string();
        node.properties = properties;
        node
    }

    #[test]
    fn test_regex_constraint() {
        let aspect = aspect_node(vec![code_property()]);
        let spec = specification_from(&aspect).unwrap();

        let mut props = serde_json::Map::new();
        props.insert("billing-aspect:code".to_string(), json!("abc"));
        let errors = spec.satisfied_by(&target_node(props)).unwrap_err();
        assert!(errors.has(PropertyErrorCode::PropertyDoesNotMatchRegex));

        let mut props = serde_json::Map::new();
        props.insert("billing-aspect:code".to_string(), json!("ABC"));
        assert!(spec.satisfied_by(&target_node(props)).is_ok());
    }

    #[test]
    fn test_required_property() {
        let aspect = aspect_node(vec![code_property()]);
        let spec = specification_from(&aspect).unwrap();

        let errors = spec
            .satisfied_by(&target_node(serde_json::Map::new()))
            .unwrap_err();
        assert!(errors.has(PropertyErrorCode::PropertyRequired));
    }

    #[test]
    fn test_false_counts_as_present_and_empty_array_fails() {
        let mut flag = code_property();
        flag.name = "approved".to_string();
        flag.property_type = PropertyType::Boolean;
        flag.validation_regex = None;
        let aspect = aspect_node(vec![flag]);
        let spec = specification_from(&aspect).unwrap();

        let mut props = serde_json::Map::new();
        props.insert("billing-aspect:approved".to_string(), json!(false));
        assert!(spec.satisfied_by(&target_node(props)).is_ok());

        let mut tags = code_property();
        tags.name = "tags".to_string();
        tags.property_type = PropertyType::Array;
        tags.array_type = Some(PropertyType::String);
        tags.validation_regex = None;
        let aspect = aspect_node(vec![tags]);
        let spec = specification_from(&aspect).unwrap();

        let mut props = serde_json::Map::new();
        props.insert("billing-aspect:tags".to_string(), json!([]));
        let errors = spec.satisfied_by(&target_node(props)).unwrap_err();
        assert!(errors.has(PropertyErrorCode::PropertyRequired));
    }

    #[test]
    fn test_validation_list_over_string_array() {
        let mut tags = code_property();
        tags.name = "tags".to_string();
        tags.required = false;
        tags.property_type = PropertyType::Array;
        tags.array_type = Some(PropertyType::String);
        tags.validation_regex = None;
        tags.validation_list = Some(vec!["red".to_string(), "green".to_string()]);
        let aspect = aspect_node(vec![tags]);
        let spec = specification_from(&aspect).unwrap();

        let mut props = serde_json::Map::new();
        props.insert("billing-aspect:tags".to_string(), json!(["red", "blue"]));
        let errors = spec.satisfied_by(&target_node(props)).unwrap_err();
        assert!(errors.has(PropertyErrorCode::PropertyNotInList));
    }

    #[test]
    fn test_type_mismatch() {
        let mut count = code_property();
        count.name = "count".to_string();
        count.property_type = PropertyType::Number;
        count.validation_regex = None;
        let aspect = aspect_node(vec![count]);
        let spec = specification_from(&aspect).unwrap();

        let mut props = serde_json::Map::new();
        props.insert("billing-aspect:count".to_string(), json!("three"));
        let errors = spec.satisfied_by(&target_node(props)).unwrap_err();
        assert!(errors.has(PropertyErrorCode::PropertyType));
    }

    #[test]
    fn test_schema_rejects_bad_names_and_defaults() {
        let mut bad_name = code_property();
        bad_name.name = "1x".to_string();
        let schema = AspectPayload {
            filters: NodeFilters::empty(),
            properties: vec![bad_name],
        };
        assert!(schema
            .validate_schema()
            .has(PropertyErrorCode::InvalidPropertyName));

        let mut bad_default = code_property();
        bad_default.default = Some(json!("lowercase"));
        let schema = AspectPayload {
            filters: NodeFilters::empty(),
            properties: vec![bad_default],
        };
        assert!(schema
            .validate_schema()
            .has(PropertyErrorCode::InvalidDefaultValue));
    }
}
