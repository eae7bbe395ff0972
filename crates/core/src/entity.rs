//! Raw entity mentions and the canonical entities they resolve to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Collection, JsonList, Record, new_id};

/// Grammatical form of a mention, which decides the resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionType {
    Pronoun,
    ProperNoun,
    CommonNoun,
    DefiniteDescription,
    SelfReference,
}

impl MentionType {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "pronoun" => Self::Pronoun,
            "proper_noun" | "propernoun" | "name" => Self::ProperNoun,
            "definite_description" => Self::DefiniteDescription,
            "self_reference" | "self" => Self::SelfReference,
            _ => Self::CommonNoun,
        }
    }
}

/// Kind of canonical entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Project,
    Organization,
    Place,
    Thing,
    Concept,
    /// The speaker.
    #[serde(rename = "self")]
    SelfEntity,
    #[default]
    Other,
}

impl EntityType {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "person" | "people" => Self::Person,
            "project" => Self::Project,
            "organization" | "organisation" | "company" | "org" => Self::Organization,
            "place" | "location" => Self::Place,
            "thing" | "object" => Self::Thing,
            "concept" | "idea" | "topic" => Self::Concept,
            "self" => Self::SelfEntity,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Project => "project",
            Self::Organization => "organization",
            Self::Place => "place",
            Self::Thing => "thing",
            Self::Concept => "concept",
            Self::SelfEntity => "self",
            Self::Other => "other",
        }
    }

    /// Entities a neutral pronoun ("it") can refer to.
    pub fn is_neutral(&self) -> bool {
        !matches!(self, Self::Person | Self::SelfEntity)
    }
}

/// How a mention was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Context,
    ExactName,
    Alias,
    Fuzzy,
    SelfEntity,
    Created,
    Unresolved,
}

/// A raw in-text reference, resolved at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub id: String,

    pub unit_id: String,

    #[serde(default)]
    pub proposition_id: Option<String>,

    pub text: String,

    pub mention_type: MentionType,

    #[serde(default)]
    pub suggested_type: Option<EntityType>,

    #[serde(default)]
    pub resolved_entity_id: Option<String>,

    #[serde(default)]
    pub resolution_method: Option<ResolutionMethod>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl EntityMention {
    pub fn new(unit_id: impl Into<String>, text: impl Into<String>, mention_type: MentionType) -> Self {
        Self {
            id: new_id(),
            unit_id: unit_id.into(),
            proposition_id: None,
            text: text.into(),
            mention_type,
            suggested_type: None,
            resolved_entity_id: None,
            resolution_method: None,
            created_at: Utc::now(),
        }
    }
}

impl Record for EntityMention {
    const COLLECTION: Collection = Collection::EntityMentions;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A canonical entity (person, project, ...) that mentions resolve to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,

    pub canonical_name: String,

    /// Lowercased canonical name, used for equality lookups.
    pub normalized_name: String,

    #[serde(default)]
    pub entity_type: EntityType,

    #[serde(default)]
    pub aliases: JsonList<String>,

    #[serde(default)]
    pub mention_count: u32,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub first_referenced: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_referenced: DateTime<Utc>,
}

impl Entity {
    pub fn new(canonical_name: impl Into<String>, entity_type: EntityType) -> Self {
        let canonical_name = canonical_name.into();
        let now = Utc::now();
        Self {
            id: new_id(),
            normalized_name: normalize_name(&canonical_name),
            canonical_name,
            entity_type,
            aliases: JsonList::new(),
            mention_count: 1,
            first_referenced: now,
            last_referenced: now,
        }
    }

    /// Whether `name` equals the canonical name or any alias (case-insensitive).
    pub fn answers_to(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.normalized_name == name || self.aliases.iter().any(|a| normalize_name(a) == name)
    }
}

impl Record for Entity {
    const COLLECTION: Collection = Collection::Entities;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Lowercase and collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_answers_to_aliases() {
        let mut entity = Entity::new("Samantha Reyes", EntityType::Person);
        entity.aliases.push("Sam".into());
        assert!(entity.answers_to("samantha  reyes"));
        assert!(entity.answers_to("SAM"));
        assert!(!entity.answers_to("Samuel"));
    }

    #[test]
    fn self_type_serializes_as_self() {
        let json = serde_json::to_string(&EntityType::SelfEntity).unwrap();
        assert_eq!(json, "\"self\"");
        assert_eq!(EntityType::from_label("Company"), EntityType::Organization);
    }

    #[test]
    fn mention_type_labels() {
        assert_eq!(MentionType::from_label("proper noun"), MentionType::ProperNoun);
        assert_eq!(MentionType::from_label("self_reference"), MentionType::SelfReference);
        assert_eq!(MentionType::from_label("whatever"), MentionType::CommonNoun);
    }
}
