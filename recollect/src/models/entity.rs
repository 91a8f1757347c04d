use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    MedicalCondition,
    Event,
    Object,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::MedicalCondition => "medical_condition",
            Self::Event => "event",
            Self::Object => "object",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An attribute value with the turns it was first seen and last updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAttribute {
    pub value: Value,
    pub first_seen_turn: u32,
    pub last_updated_turn: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub turn_number: u32,
    pub text: String,
}

/// A consolidated real-world referent built from one or more mentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Derived from a normalization key; equal keys always mean the same entity
    pub id: String,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub mentions: Vec<Mention>,
    pub attributes: BTreeMap<String, EntityAttribute>,
    pub importance_score: f64,
    pub first_mentioned: Option<u32>,
    pub last_mentioned: Option<u32>,
}

impl Entity {
    pub fn new(
        id: impl Into<String>,
        entity_type: EntityType,
        canonical_name: impl Into<String>,
        importance_score: f64,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type,
            canonical_name: canonical_name.into(),
            mentions: Vec::new(),
            attributes: BTreeMap::new(),
            importance_score,
            first_mentioned: None,
            last_mentioned: None,
        }
    }

    pub fn add_mention(&mut self, turn_number: u32, text: impl Into<String>) {
        self.mentions.push(Mention {
            turn_number,
            text: text.into(),
        });
        self.first_mentioned = Some(
            self.first_mentioned
                .map_or(turn_number, |first| first.min(turn_number)),
        );
        self.last_mentioned = Some(
            self.last_mentioned
                .map_or(turn_number, |last| last.max(turn_number)),
        );
    }

    /// Insert or overwrite an attribute, keeping its first-seen turn.
    pub fn set_attribute(&mut self, key: &str, value: impl Into<Value>, turn_number: u32) {
        let value = value.into();
        match self.attributes.get_mut(key) {
            Some(existing) => {
                existing.value = value;
                existing.last_updated_turn = existing.last_updated_turn.max(turn_number);
            }
            None => {
                self.attributes.insert(
                    key.to_string(),
                    EntityAttribute {
                        value,
                        first_seen_turn: turn_number,
                        last_updated_turn: turn_number,
                    },
                );
            }
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).map(|attr| &attr.value)
    }

    /// Importance normalized to 0..=1.
    pub fn confidence(&self) -> f64 {
        (self.importance_score / 25.0).min(1.0)
    }

    /// Text of the most recent mention.
    pub fn context(&self) -> &str {
        self.mentions.last().map(|m| m.text.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportantFact {
    pub fact: String,
    pub category: String,
    pub turn_number: u32,
    pub importance: f64,
}

/// Per-user view over the entities extracted so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub entities: BTreeMap<String, Entity>,
    pub important_facts: Vec<ImportantFact>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            entities: BTreeMap::new(),
            important_facts: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
        self.last_updated = Utc::now();
    }

    pub fn add_important_fact(
        &mut self,
        fact: impl Into<String>,
        category: impl Into<String>,
        turn_number: u32,
        importance: f64,
    ) {
        self.important_facts.push(ImportantFact {
            fact: fact.into(),
            category: category.into(),
            turn_number,
            importance,
        });
    }

    /// People keyed by canonical name, with their relationship and age when known.
    pub fn people(&self) -> BTreeMap<String, Vec<String>> {
        self.entities
            .values()
            .filter(|e| e.entity_type == EntityType::Person)
            .map(|entity| {
                let mut details = Vec::new();
                if let Some(Value::String(relationship)) = entity.attribute("relationship") {
                    details.push(relationship.clone());
                }
                if let Some(age) = entity.attribute("age") {
                    details.push(format!("age {age}"));
                }
                if details.is_empty() {
                    details.push("mentioned".to_string());
                }
                (entity.canonical_name.clone(), details)
            })
            .collect()
    }

    pub fn medical_conditions(&self) -> Vec<String> {
        self.entities
            .values()
            .filter(|e| e.entity_type == EntityType::MedicalCondition)
            .map(|e| e.canonical_name.clone())
            .collect()
    }

    /// Locations, organizations and objects grouped by type label.
    pub fn named_entities(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut named: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entity in self.entities.values() {
            if matches!(
                entity.entity_type,
                EntityType::Location | EntityType::Organization | EntityType::Object
            ) {
                named
                    .entry(entity.entity_type.as_str().to_string())
                    .or_default()
                    .insert(entity.canonical_name.clone());
            }
        }
        named
    }

    /// Entity that has a mention containing `mention` (case-insensitive).
    pub fn entity_by_mention(&self, mention: &str) -> Option<&Entity> {
        let needle = mention.to_lowercase();
        self.entities.values().find(|entity| {
            entity
                .mentions
                .iter()
                .any(|m| m.text.to_lowercase().contains(&needle))
        })
    }
}
