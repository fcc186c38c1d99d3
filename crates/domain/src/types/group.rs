//! Device groups
//!
//! Groups are user-defined collections of hubs managed through the
//! `node_group` endpoint.

use serde::{Deserialize, Serialize};

use crate::errors::{LivError, Result};

/// One group as returned by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub group_id: String,
    pub group_name: String,
    #[serde(default)]
    pub is_matter: bool,
    #[serde(default)]
    pub primary: bool,
    /// Number of devices in the group
    #[serde(default)]
    pub total: u32,
}

/// Body of the group list endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupList {
    #[serde(default)]
    pub groups: Vec<DeviceGroup>,
    #[serde(default)]
    pub total: u32,
}

/// Body of the node list endpoint, optionally filtered by group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub total: u32,
}

/// Body returned when a group is created
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedGroup {
    pub group_id: String,
}

/// Request body for creating or updating a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRequest {
    pub group_name: String,
    #[serde(rename = "node_list", skip_serializing_if = "Option::is_none")]
    pub node_ids: Option<Vec<String>>,
}

impl GroupRequest {
    /// Request for a new group; the name is trimmed and must not be empty
    pub fn create(name: &str, node_ids: Option<Vec<String>>) -> Result<Self> {
        let group_name = name.trim();
        if group_name.is_empty() {
            return Err(LivError::validation("group_name", "cannot be empty"));
        }
        let node_ids = node_ids.filter(|ids| !ids.is_empty());
        Ok(Self { group_name: group_name.to_string(), node_ids })
    }
}

/// A partial group update; at least one field must be set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupUpdate {
    pub group_name: Option<String>,
    /// Replaces the whole membership when present
    pub node_ids: Option<Vec<String>>,
}

impl GroupUpdate {
    pub fn rename<S: Into<String>>(name: S) -> Self {
        Self { group_name: Some(name.into()), node_ids: None }
    }

    pub fn members(node_ids: Vec<String>) -> Self {
        Self { group_name: None, node_ids: Some(node_ids) }
    }

    pub fn validate(&self) -> Result<()> {
        let has_name = self.group_name.as_deref().is_some_and(|name| !name.trim().is_empty());
        if !has_name && self.node_ids.is_none() {
            return Err(LivError::validation(
                "group_update",
                "must provide either a group name or a node list",
            ));
        }
        Ok(())
    }

    /// The name to send, if the update carries a usable one
    pub fn trimmed_name(&self) -> Option<&str> {
        self.group_name.as_deref().map(str::trim).filter(|name| !name.is_empty())
    }

    /// Resolve into a request body, using `current_name` when no new name is
    /// given
    pub fn into_request(self, current_name: &str) -> GroupRequest {
        let group_name = self.trimmed_name().unwrap_or(current_name).to_string();
        GroupRequest { group_name, node_ids: self.node_ids }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_group_list_parses_with_defaults() {
        let list: GroupList = serde_json::from_value(json!({
            "groups": [
                {"group_id": "g1", "group_name": "Backyard", "total": 2},
                {"group_id": "g2", "group_name": "Front", "is_matter": true, "primary": true}
            ],
            "total": 2
        }))
        .unwrap();

        assert_eq!(list.groups.len(), 2);
        assert!(!list.groups[0].is_matter);
        assert_eq!(list.groups[0].total, 2);
        assert!(list.groups[1].primary);
    }

    /// Validates the request body for group creation.
    ///
    /// Assertions:
    /// - Confirms names are trimmed and blank names rejected.
    /// - Confirms an empty membership list is omitted from the body.
    #[test]
    fn test_create_request() {
        let request = GroupRequest::create("  Pool  ", Some(vec![])).unwrap();
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"group_name": "Pool"}));

        let request = GroupRequest::create("Pool", Some(vec!["n1".into()])).unwrap();
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"group_name": "Pool", "node_list": ["n1"]})
        );

        assert!(GroupRequest::create("   ", None).is_err());
    }

    #[test]
    fn test_update_requires_a_field() {
        assert!(GroupUpdate::default().validate().is_err());
        assert!(GroupUpdate::rename("  ").validate().is_err());
        assert!(GroupUpdate::rename("Deck").validate().is_ok());
        assert!(GroupUpdate::members(vec![]).validate().is_ok());

        let request = GroupUpdate::members(vec!["n2".into()]).into_request("Existing");
        assert_eq!(request.group_name, "Existing");
        assert_eq!(request.node_ids, Some(vec!["n2".to_string()]));
    }
}
