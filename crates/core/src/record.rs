//! Storage-boundary primitives shared by every persisted record.
//!
//! Records are stored as one JSON document per id. List-valued fields are
//! wrapped in [`JsonList`], which is written as a serialized JSON *string*
//! and decoded leniently: anything malformed comes back as an empty list.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// The typed collections the core reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    ConversationUnits,
    Spans,
    Propositions,
    Stances,
    Relations,
    EntityMentions,
    Entities,
    Claims,
    ClaimSources,
    Goals,
    ObserverOutputs,
    Tasks,
    ExtractionTraces,
}

impl Collection {
    pub const ALL: [Collection; 13] = [
        Collection::ConversationUnits,
        Collection::Spans,
        Collection::Propositions,
        Collection::Stances,
        Collection::Relations,
        Collection::EntityMentions,
        Collection::Entities,
        Collection::Claims,
        Collection::ClaimSources,
        Collection::Goals,
        Collection::ObserverOutputs,
        Collection::Tasks,
        Collection::ExtractionTraces,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::ConversationUnits => "conversation_units",
            Collection::Spans => "spans",
            Collection::Propositions => "propositions",
            Collection::Stances => "stances",
            Collection::Relations => "relations",
            Collection::EntityMentions => "entity_mentions",
            Collection::Entities => "entities",
            Collection::Claims => "claims",
            Collection::ClaimSources => "claim_sources",
            Collection::Goals => "goals",
            Collection::ObserverOutputs => "observer_outputs",
            Collection::Tasks => "tasks",
            Collection::ExtractionTraces => "extraction_traces",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that lives in exactly one [`Collection`].
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

/// Generate a fresh record id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A list stored as a JSON string column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonList<T>(pub Vec<T>);

impl<T> JsonList<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T: DeserializeOwned> JsonList<T> {
    /// Decode a stored JSON string. Malformed input yields an empty list.
    pub fn decode(raw: &str) -> Self {
        Self(serde_json::from_str(raw).unwrap_or_default())
    }

    fn from_value(value: Option<serde_json::Value>) -> Self {
        match value {
            Some(serde_json::Value::String(raw)) => Self::decode(&raw),
            // Tolerate documents written with a bare array.
            Some(array @ serde_json::Value::Array(_)) => {
                Self(serde_json::from_value(array).unwrap_or_default())
            }
            _ => Self::new(),
        }
    }
}

impl<T: Serialize> JsonList<T> {
    /// Encode as the JSON string stored at the boundary.
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".into())
    }
}

impl<T> Default for JsonList<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Deref for JsonList<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for JsonList<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> From<Vec<T>> for JsonList<T> {
    fn from(items: Vec<T>) -> Self {
        Self(items)
    }
}

impl<T> FromIterator<T> for JsonList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T> IntoIterator for JsonList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a JsonList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: Serialize> Serialize for JsonList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for JsonList<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(Self::from_value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Holder {
        #[serde(default)]
        aliases: JsonList<String>,
    }

    #[test]
    fn list_is_stored_as_string() {
        let holder = Holder {
            aliases: vec!["Sam".to_string(), "Sammy".to_string()].into(),
        };
        let json = serde_json::to_value(&holder).unwrap();
        assert_eq!(json["aliases"], serde_json::json!("[\"Sam\",\"Sammy\"]"));
    }

    #[test]
    fn malformed_list_decodes_empty() {
        let holder: Holder = serde_json::from_str(r#"{"aliases": "[not json"}"#).unwrap();
        assert!(holder.aliases.is_empty());

        let holder: Holder = serde_json::from_str(r#"{"aliases": 42}"#).unwrap();
        assert!(holder.aliases.is_empty());

        let holder: Holder = serde_json::from_str(r#"{}"#).unwrap();
        assert!(holder.aliases.is_empty());
    }

    #[test]
    fn bare_array_is_accepted() {
        let holder: Holder = serde_json::from_str(r#"{"aliases": ["a", "b"]}"#).unwrap();
        assert_eq!(holder.aliases.len(), 2);
    }

    #[test]
    fn collection_names_are_unique() {
        let mut names: Vec<&str> = Collection::ALL.iter().map(|c| c.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Collection::ALL.len());
    }
}
