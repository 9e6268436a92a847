//! Siren hypermedia documents as served by the daemon.
//!
//! Only the parts the harness reads are modelled; unknown members are
//! ignored.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{HarnessError, Result};

/// A URI-addressable resource with properties and actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity<P = serde_json::Value> {
    /// Nature of the entity.
    #[serde(default)]
    pub class: Vec<String>,
    /// State of the entity.
    pub properties: Option<P>,
    /// Embedded sub-entities.
    #[serde(default)]
    pub entities: Vec<SubEntity>,
    /// Behaviors the entity currently exposes.
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Navigational links.
    #[serde(default)]
    pub links: Vec<Link>,
}

impl<P> Entity<P> {
    /// Href of the `self` link.
    pub fn self_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel.iter().any(|rel| rel == "self"))
            .map(|link| link.href.as_str())
    }

    /// Action named `name`.
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|action| action.name == name)
    }

    /// Sub-entities with relation `rel` and class `class`.
    pub fn sub_entity(&self, rel: &str, class: &str) -> Option<&SubEntity> {
        self.entities.iter().find(|entity| {
            entity.rel.iter().any(|r| r == rel) && entity.class.iter().any(|c| c == class)
        })
    }
}

/// Embedded entity or link.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubEntity {
    /// Nature of the sub-entity.
    #[serde(default)]
    pub class: Vec<String>,
    /// Relation to the parent.
    #[serde(default)]
    pub rel: Vec<String>,
    /// Set for embedded links.
    #[serde(default)]
    pub href: Option<String>,
    /// Set for embedded representations.
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
    /// Actions of an embedded representation.
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Links of an embedded representation.
    #[serde(default)]
    pub links: Vec<Link>,
}

impl SubEntity {
    /// Deserialize the properties into `T`.
    pub fn properties_as<T: DeserializeOwned>(&self) -> Result<T> {
        let properties = self
            .properties
            .clone()
            .ok_or_else(|| HarnessError::invalid_data("properties", "sub-entity has none"))?;
        Ok(serde_json::from_value(properties)?)
    }

    /// Href of the embedded link, or of its `self` link.
    pub fn href(&self) -> Option<&str> {
        self.href.as_deref().or_else(|| {
            self.links
                .iter()
                .find(|link| link.rel.iter().any(|rel| rel == "self"))
                .map(|link| link.href.as_str())
        })
    }
}

/// HTTP method of an action. GET when omitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// An executable behavior of an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique within the entity, e.g. "fund".
    pub name: String,
    /// Target URI.
    pub href: String,
    /// HTTP method.
    #[serde(default)]
    pub method: Method,
    /// Request encoding, e.g. "application/json".
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,
    /// Inputs the client must provide.
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Descriptive text.
    #[serde(default)]
    pub title: Option<String>,
}

/// A control inside an action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Name the value is submitted under.
    pub name: String,
    /// Semantic classes, e.g. `["bitcoin", "address"]`.
    #[serde(default)]
    pub class: Vec<String>,
    /// Input type.
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    /// Preset value.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl Field {
    /// Whether the field carries every class in `classes`.
    pub fn has_classes(&self, classes: &[&str]) -> bool {
        classes.iter().all(|c| self.class.iter().any(|own| own == c))
    }
}

/// A navigational link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Relations, e.g. `["self"]`.
    #[serde(default)]
    pub rel: Vec<String>,
    /// Target URI.
    pub href: String,
}

/// Resolved field values of an action, by field name.
pub type FieldValues = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_swap_like_document() {
        let doc = json!({
            "class": ["swap"],
            "properties": { "role": "Alice" },
            "actions": [{
                "name": "fund",
                "href": "/swaps/abc/fund",
                "method": "GET",
                "fields": [{ "name": "address", "class": ["bitcoin", "address"] }]
            }],
            "links": [{ "rel": ["self"], "href": "/swaps/abc" }]
        });

        let entity: Entity = serde_json::from_value(doc).unwrap();
        assert_eq!(entity.self_href(), Some("/swaps/abc"));
        let fund = entity.action("fund").unwrap();
        assert_eq!(fund.method, Method::Get);
        assert!(fund.fields[0].has_classes(&["bitcoin", "address"]));
        assert!(!fund.fields[0].has_classes(&["ethereum", "address"]));
        assert!(entity.action("redeem").is_none());
    }

    #[test]
    fn test_missing_method_defaults_to_get() {
        let action: Action =
            serde_json::from_value(json!({ "name": "accept", "href": "/x" })).unwrap();
        assert_eq!(action.method, Method::Get);
        assert!(action.fields.is_empty());
    }
}
