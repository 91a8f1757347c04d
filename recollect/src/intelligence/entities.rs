use std::collections::{BTreeMap, HashSet};

use regex::{Regex, RegexBuilder};

use crate::error::Result;
use crate::models::{ConversationTurn, Entity, EntityType, UserProfile};

const MENTION_CONTEXT_CHARS: usize = 50;
const FAMILY_IMPORTANCE: f64 = 10.0;
const SCHOOL_START_AGE: u64 = 5;

const SCHOOLING_CUES: &[&str] = &["kindergarten", "starts school"];
const HONORIFICS: &[&str] = &["mr", "mrs", "ms", "dr", "prof"];
const LOCATION_CUES: &[&str] = &["city", "country", "state", "place", "street", "avenue", "road"];
const ORGANIZATION_CUES: &[&str] = &["company", "corporation", "inc", "llc", "organization"];

/// Capitalized words that are never names on their own.
const EXCLUDED_WORDS: &[&str] = &[
    "i", "the", "a", "an", "my", "your", "his", "her", "their", "our",
    "hello", "hi", "hey", "bye", "goodbye", "thanks", "thank", "please",
    "yes", "no", "yeah", "yep", "nope", "okay", "ok", "sure", "maybe",
    "um", "uh", "hmm", "oh", "ah", "well", "so", "like", "just",
    "how", "what", "when", "where", "why", "who", "which",
    "can", "could", "would", "should", "will", "may", "might",
    "do", "does", "did", "have", "has", "had", "is", "are", "was", "were",
    "this", "that", "these", "those", "there", "here",
    "it", "its", "he", "she", "they", "we", "you",
    "any", "some", "all", "each", "every", "both", "few", "many", "much",
    "take", "looking", "help", "need", "want", "let", "see", "good", "great",
    "january", "february", "march", "april", "june", "july", "august",
    "september", "october", "november", "december",
    "years", "year", "months", "month", "days", "day",
    "god", "im", "ve", "re", "ll", "mr", "mrs", "ms", "dr", "prof",
];

struct RelationshipRule {
    regex: Regex,
    relationship: &'static str,
}

struct MedicalRule {
    regex: Regex,
    canonical: &'static str,
    importance: f64,
}

/// Compiled extraction rules, evaluated in declaration order.
struct LinkerRules {
    relationships: Vec<RelationshipRule>,
    medical: Vec<MedicalRule>,
    ages: Vec<Regex>,
    grade: Regex,
    pronoun: Regex,
}

impl LinkerRules {
    fn new() -> Result<Self> {
        let ci = |pattern: &str| RegexBuilder::new(pattern).case_insensitive(true).build();
        // Cue is case-insensitive, the trailing name must be capitalized.
        let relationship = |words: &str, relationship: &'static str| -> Result<RelationshipRule> {
            Ok(RelationshipRule {
                regex: Regex::new(&format!(r"(?i:\bmy\s+({words})\b)(?:,?\s+([A-Z][a-z]+))?"))?,
                relationship,
            })
        };
        let medical = |pattern: &str, canonical: &'static str, importance: f64| -> Result<MedicalRule> {
            Ok(MedicalRule {
                regex: ci(pattern)?,
                canonical,
                importance,
            })
        };

        Ok(Self {
            relationships: vec![
                relationship("wife|husband|partner|spouse", "spouse")?,
                relationship("son|daughter|child|kid", "child")?,
                relationship("mother|mom|father|dad|parent", "parent")?,
                relationship("brother|sister|sibling", "sibling")?,
                relationship("friend|colleague|coworker|boss|manager", "other")?,
            ],
            // Specific conditions before the general fallbacks they overlap with.
            medical: vec![
                medical(r"\b(severe\s+)?peanut\s+allerg(?:y|ies|ic)\b", "peanut allergy", 9.0)?,
                medical(r"\b(severe\s+)?shellfish\s+allerg(?:y|ies|ic)\b", "shellfish allergy", 9.0)?,
                medical(r"\b(severe\s+)?nut\s+allerg(?:y|ies|ic)\b", "nut allergy", 9.0)?,
                medical(r"\ballerg(?:y|ies|ic)\b", "allergy", 8.0)?,
                medical(r"\blactose\s+intoleran(?:t|ce)\b", "lactose intolerance", 8.0)?,
                medical(r"\bgluten\s+intoleran(?:t|ce)\b", "gluten intolerance", 8.0)?,
                medical(r"\bvegetarian\b", "vegetarian", 7.0)?,
                medical(r"\bvegan\b", "vegan", 7.0)?,
                medical(r"\b(PTSD|anxiety|depression|panic attack)\b", "mental health condition", 9.0)?,
                medical(r"\b(diabetes|asthma|epilepsy|cancer)\b", "chronic condition", 8.0)?,
                medical(r"\b(epipen|inhaler)\b", "medical equipment", 8.0)?,
            ],
            ages: vec![
                ci(r"(\d+) years? old")?,
                ci(r"\bage (\d+)")?,
                ci(r"\bturned (\d+)")?,
            ],
            grade: ci(r"(\d+)(?:st|nd|rd|th) grade")?,
            pronoun: ci(r"\b(she|he|they)\b")?,
        })
    }

    fn has_attribute_cue(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.ages.iter().any(|re| re.is_match(text))
            || self.grade.is_match(text)
            || SCHOOLING_CUES.iter().any(|cue| lowered.contains(cue))
    }
}

/// Consolidates people, conditions and named places/organisations mentioned
/// across a conversation into stable entities.
///
/// Entity ids come from a normalization key, so repeated mentions always
/// merge. Extraction is cumulative and each `(turn, text)` pair is processed
/// at most once.
pub struct EntityLinker {
    rules: LinkerRules,
    entities: BTreeMap<String, Entity>,
    processed: HashSet<(u32, String)>,
    last_person: Option<String>,
}

impl std::fmt::Debug for EntityLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityLinker")
            .field("entities", &self.entities.len())
            .field("processed_turns", &self.processed.len())
            .finish_non_exhaustive()
    }
}

impl EntityLinker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            rules: LinkerRules::new()?,
            entities: BTreeMap::new(),
            processed: HashSet::new(),
            last_person: None,
        })
    }

    /// Relationship cues plus curated medical patterns.
    pub fn rule_count(&self) -> usize {
        self.rules.relationships.len() + self.rules.medical.len()
    }

    /// Process `turns` and return every entity known so far.
    pub fn extract(&mut self, turns: &[ConversationTurn]) -> Vec<Entity> {
        for turn in turns {
            self.extract_turn(turn);
        }
        self.entities.values().cloned().collect()
    }

    /// Process one turn. Returns the ids of entities mentioned in it, or an
    /// empty list when the turn was already processed.
    pub fn extract_turn(&mut self, turn: &ConversationTurn) -> Vec<String> {
        if !self
            .processed
            .insert((turn.turn_number, turn.text.clone()))
        {
            return Vec::new();
        }

        let mut touched = Vec::new();
        let people = self.extract_people(&turn.text, turn.turn_number);
        if people.is_empty() {
            touched.extend(self.attach_to_recent_person(&turn.text, turn.turn_number));
        }
        touched.extend(people);
        touched.extend(self.extract_medical(&turn.text, turn.turn_number));
        touched.extend(self.extract_named(&turn.text, turn.turn_number));

        let mut seen = HashSet::new();
        touched.retain(|id| seen.insert(id.clone()));
        touched
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Group the current entities for `user_id`; every medical entity becomes
    /// an important fact.
    pub fn build_profile(&self, user_id: &str) -> UserProfile {
        let mut profile = UserProfile::new(user_id);
        for entity in self.entities.values() {
            profile.add_entity(entity.clone());
        }
        for entity in self
            .entities
            .values()
            .filter(|e| e.entity_type == EntityType::MedicalCondition)
        {
            profile.add_important_fact(
                format!("Has {}", entity.canonical_name),
                "medical",
                entity.first_mentioned.unwrap_or_default(),
                entity.importance_score,
            );
        }
        profile
    }

    fn extract_people(&mut self, text: &str, turn_number: u32) -> Vec<String> {
        let mut ids = Vec::new();
        for rule in &self.rules.relationships {
            for caps in rule.regex.captures_iter(text) {
                let (Some(mention), Some(word)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let lowered = word.as_str().to_lowercase();
                let relation = normalize_relation(&lowered);
                let id = format!("person_{}_{}", rule.relationship, relation);

                let entity = self.entities.entry(id.clone()).or_insert_with(|| {
                    let mut entity = Entity::new(
                        id.clone(),
                        EntityType::Person,
                        format!("User's {relation}"),
                        FAMILY_IMPORTANCE,
                    );
                    entity.set_attribute("relationship", rule.relationship, turn_number);
                    entity
                });
                entity.add_mention(turn_number, mention.as_str());

                if let Some(name) = caps.get(2) {
                    if !is_excluded(name.as_str()) {
                        entity.set_attribute("name", name.as_str(), turn_number);
                    }
                }
                apply_person_attributes(&self.rules, entity, text, turn_number);
                ids.push(id);
            }
        }
        if let Some(last) = ids.last() {
            self.last_person = Some(last.clone());
        }
        ids
    }

    /// "She starts kindergarten": a subject pronoun with an age or schooling
    /// cue lands on the most recently mentioned person.
    fn attach_to_recent_person(&mut self, text: &str, turn_number: u32) -> Option<String> {
        if !self.rules.pronoun.is_match(text) || !self.rules.has_attribute_cue(text) {
            return None;
        }
        let id = self.last_person.clone()?;
        let entity = self.entities.get_mut(&id)?;
        entity.add_mention(turn_number, text.trim());
        apply_person_attributes(&self.rules, entity, text, turn_number);
        tracing::debug!(entity = %id, turn = turn_number, "Attached pronoun mention to recent person");
        Some(id)
    }

    fn extract_medical(&mut self, text: &str, turn_number: u32) -> Vec<String> {
        let mut ids = Vec::new();
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        for rule in &self.rules.medical {
            for m in rule.regex.find_iter(text) {
                if claimed.iter().any(|&(start, end)| m.start() < end && start < m.end()) {
                    continue;
                }
                claimed.push((m.start(), m.end()));

                let id = format!("medical_{}", rule.canonical.replace(' ', "_").to_lowercase());
                self.entities
                    .entry(id.clone())
                    .or_insert_with(|| {
                        Entity::new(
                            id.clone(),
                            EntityType::MedicalCondition,
                            rule.canonical,
                            rule.importance,
                        )
                    })
                    .add_mention(turn_number, context_window(text, m.start(), m.end()));
                ids.push(id);
            }
        }
        ids
    }

    fn extract_named(&mut self, text: &str, turn_number: u32) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let cleaned: Vec<String> = words.iter().map(|w| clean_word(w)).collect();
        let mut ids = Vec::new();

        for (i, noun) in cleaned.iter().enumerate() {
            let starts_upper = noun.chars().next().is_some_and(char::is_uppercase);
            if !starts_upper || noun.chars().count() < 2 || is_excluded(noun) || i == 0 {
                continue;
            }
            let prev_cleaned = cleaned[i - 1].to_lowercase();
            let after_honorific = HONORIFICS.contains(&prev_cleaned.as_str());
            if words[i - 1].ends_with(&['.', '!', '?'][..]) && !after_honorific {
                continue;
            }

            let id = format!("named_{}", noun.to_lowercase());
            if let Some(existing) = self.entities.get_mut(&id) {
                existing.add_mention(turn_number, noun.as_str());
                ids.push(id);
                continue;
            }

            let later_has = |cues: &[&str]| {
                cleaned[i + 1..]
                    .iter()
                    .any(|w| cues.contains(&w.to_lowercase().as_str()))
            };
            let entity_type = if later_has(LOCATION_CUES) {
                EntityType::Location
            } else if later_has(ORGANIZATION_CUES) {
                EntityType::Organization
            } else if after_honorific {
                EntityType::Person
            } else {
                // Ambiguous capitalized word, not worth an entity.
                continue;
            };

            let importance = if entity_type == EntityType::Person { 5.0 } else { 3.0 };
            let mut entity = Entity::new(id.clone(), entity_type, noun.as_str(), importance);
            entity.add_mention(turn_number, noun.as_str());
            self.entities.insert(id.clone(), entity);
            ids.push(id);
        }
        ids
    }
}

fn apply_person_attributes(rules: &LinkerRules, entity: &mut Entity, text: &str, turn_number: u32) {
    for re in &rules.ages {
        if let Some(age) = first_number(re, text) {
            entity.set_attribute("age", age, turn_number);
        }
    }

    let lowered = text.to_lowercase();
    if SCHOOLING_CUES.iter().any(|cue| lowered.contains(cue)) && entity.attribute("age").is_none() {
        entity.set_attribute("age", SCHOOL_START_AGE, turn_number);
        entity.set_attribute("age_inferred", true, turn_number);
    }

    if let Some(grade) = first_number(&rules.grade, text) {
        entity.set_attribute("age", grade + SCHOOL_START_AGE, turn_number);
        entity.set_attribute("grade", grade, turn_number);
    }
}

fn first_number(re: &Regex, text: &str) -> Option<u64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn normalize_relation(word: &str) -> &str {
    match word {
        "mom" => "mother",
        "dad" => "father",
        "kid" => "child",
        other => other,
    }
}

fn clean_word(word: &str) -> String {
    word.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect()
}

fn is_excluded(word: &str) -> bool {
    EXCLUDED_WORDS.contains(&word.to_lowercase().as_str())
}

/// Up to 50 characters either side of a match, cut on char boundaries.
fn context_window(text: &str, start: usize, end: usize) -> String {
    let mut from = start.saturating_sub(MENTION_CONTEXT_CHARS);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + MENTION_CONTEXT_CHARS).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }
    text[from..to].to_string()
}
