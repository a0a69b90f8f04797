//! Typed views over Conduit results.
//!
//! # Design
//! Each struct decodes only the fields this client uses; unknown fields are
//! ignored so newer servers stay compatible. Phabricator is inconsistent
//! about sending ids as strings or numbers, so those go through
//! `string_or_number`.

use serde::{Deserialize, Deserializer, Serialize};

/// Result of `conduit.ping`, wrapped under a synthetic `hostname` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub hostname: Option<String>,
}

/// A user record from `user.ldapquery`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub phid: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "realName", default)]
    pub real_name: Option<String>,
    /// Profile image URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A project record from `project.query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    pub phid: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub slugs: Vec<String>,
    #[serde(rename = "dateCreated", default, deserialize_with = "string_or_number")]
    pub date_created: Option<String>,
    #[serde(rename = "dateModified", default, deserialize_with = "string_or_number")]
    pub date_modified: Option<String>,
}

/// Result of `maniphest.info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    #[serde(deserialize_with = "required_string_or_number")]
    pub id: String,
    pub phid: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    #[serde(rename = "statusName", default)]
    pub status_name: Option<String>,
    #[serde(rename = "isClosed", default)]
    pub is_closed: bool,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(rename = "authorPHID", default)]
    pub author_phid: Option<String>,
    #[serde(rename = "ownerPHID", default)]
    pub owner_phid: Option<String>,
    #[serde(rename = "projectPHIDs", default)]
    pub project_phids: Vec<String>,
    #[serde(rename = "objectName", default)]
    pub object_name: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(rename = "dateCreated", default, deserialize_with = "string_or_number")]
    pub date_created: Option<String>,
    #[serde(rename = "dateModified", default, deserialize_with = "string_or_number")]
    pub date_modified: Option<String>,
}

/// Result of `maniphest.edit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEdit {
    pub object: EditedObject,
    #[serde(default)]
    pub transactions: Vec<AppliedTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditedObject {
    #[serde(deserialize_with = "required_string_or_number")]
    pub id: String,
    pub phid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTransaction {
    pub phid: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}

fn required_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(deserializer).map(String::from)
}
