use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{RecollectError, Result};

/// One weighted rule as written in the pattern resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub pattern: String,
    pub category: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// On-disk layout: three named, ordered arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternFile {
    #[serde(default)]
    pub critical: Vec<PatternDefinition>,
    #[serde(default)]
    pub contextual: Vec<PatternDefinition>,
    #[serde(default)]
    pub ephemeral: Vec<PatternDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternGroup {
    Critical,
    Contextual,
    Ephemeral,
}

impl PatternGroup {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::Contextual => "Contextual",
            Self::Ephemeral => "Ephemeral",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub regex: Regex,
    pub category: String,
    pub weight: i32,
}

impl CompiledRule {
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Enabled rules, compiled and kept in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    pub critical: Vec<CompiledRule>,
    pub contextual: Vec<CompiledRule>,
    pub ephemeral: Vec<CompiledRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternStats {
    pub critical: usize,
    pub contextual: usize,
    pub ephemeral: usize,
    pub categories: usize,
}

impl PatternSet {
    /// Compile a pattern file. Disabled rules are dropped; rules that fail to
    /// compile are skipped with a warning.
    pub fn compile(file: &PatternFile) -> Self {
        Self {
            critical: compile_group(&file.critical, PatternGroup::Critical),
            contextual: compile_group(&file.contextual, PatternGroup::Contextual),
            ephemeral: compile_group(&file.ephemeral, PatternGroup::Ephemeral),
        }
    }

    /// Groups in evaluation order.
    pub fn groups(&self) -> [(PatternGroup, &[CompiledRule]); 3] {
        [
            (PatternGroup::Critical, &self.critical),
            (PatternGroup::Contextual, &self.contextual),
            (PatternGroup::Ephemeral, &self.ephemeral),
        ]
    }

    pub fn stats(&self) -> PatternStats {
        let categories: BTreeSet<&str> = self
            .critical
            .iter()
            .chain(&self.contextual)
            .chain(&self.ephemeral)
            .map(|r| r.category.as_str())
            .collect();
        PatternStats {
            critical: self.critical.len(),
            contextual: self.contextual.len(),
            ephemeral: self.ephemeral.len(),
            categories: categories.len(),
        }
    }
}

fn compile_group(definitions: &[PatternDefinition], group: PatternGroup) -> Vec<CompiledRule> {
    definitions
        .iter()
        .filter(|definition| definition.enabled)
        .filter_map(|definition| {
            match RegexBuilder::new(&definition.pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(regex) => Some(CompiledRule {
                    regex,
                    category: definition.category.clone(),
                    weight: definition.weight,
                }),
                Err(e) => {
                    tracing::warn!(
                        group = group.label(),
                        pattern = %definition.pattern,
                        error = %e,
                        "Skipping pattern that failed to compile"
                    );
                    None
                }
            }
        })
        .collect()
}

/// Loads the weighted rule sets, falling back to built-in defaults.
pub struct PatternRegistry {
    path: PathBuf,
    cache: Mutex<Option<Arc<PatternSet>>>,
}

impl PatternRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached rule set. Never fails: a missing or malformed resource yields the
    /// built-in defaults.
    pub fn load(&self) -> Arc<PatternSet> {
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Arc::clone(cached);
        }
        self.force_reload()
    }

    /// Re-read the resource, bypassing and replacing the cache.
    pub fn force_reload(&self) -> Arc<PatternSet> {
        let file = match self.read_file() {
            Ok(file) => {
                tracing::info!(path = %self.path.display(), "Loaded pattern registry");
                file
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Using built-in pattern registry defaults"
                );
                default_patterns()
            }
        };

        let set = Arc::new(PatternSet::compile(&file));
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&set));
        set
    }

    fn read_file(&self) -> Result<PatternFile> {
        if !self.path.exists() {
            return Err(RecollectError::Configuration(format!(
                "pattern resource {} not found",
                self.path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(|e| {
            RecollectError::Configuration(format!("malformed pattern resource: {e}"))
        })
    }
}

fn rule(pattern: &str, category: &str, weight: i32) -> PatternDefinition {
    PatternDefinition {
        pattern: pattern.to_string(),
        category: category.to_string(),
        weight,
        enabled: true,
    }
}

/// Built-in rule set. Within a group, specific rules come before general ones.
pub fn default_patterns() -> PatternFile {
    PatternFile {
        critical: vec![
            rule(r"\b(allerg(?:y|ies|ic)|medical condition|diagnosed|disease|disorder|syndrome)\b", "medical", 15),
            rule(r"\b(panic attack|anxiety|PTSD|trauma|phobia|depression)\b", "mental_health", 20),
            rule(r"\b(medication|prescription|treatment|therapy)\b", "medical_treatment", 12),
            rule(r"\b(afraid|fear|terrified|scared|danger|unsafe)\b", "safety_concern", 18),
            rule(r"\b(emergency|urgent|critical|life-threatening)\b", "emergency", 25),
            rule(r"\b(my name is|I'm called|call me)\b", "identity", 20),
            rule(r"\b(I am|I'm) (a |an )?\w+ (person|man|woman)", "identity", 15),
            rule(r"\b(born|birthday|age \d+|years old)\b", "personal_info", 10),
            rule(r"\b(my (wife|husband|partner|spouse|child|son|daughter|mother|father|parent))\b", "family", 14),
            rule(r"\b(married|divorced|widowed|relationship)\b", "relationship_status", 12),
            rule(r"\b(died|death|passed away|funeral|loss|grief)\b", "grief", 18),
            rule(r"\b(pregnant|expecting|baby|birth)\b", "major_life_event", 16),
            rule(r"\b(job loss|fired|laid off|unemployed)\b", "major_life_event", 14),
            rule(r"\b(never|always|hate|love|cannot|can't stand)\b", "strong_preference", 12),
            rule(r"\b(vegetarian|vegan|kosher|halal|dietary)\b", "dietary", 13),
            rule(r"\b(can't|cannot|don't|no longer|stopped) (eat|have|consume)\b", "dietary_restriction", 10),
            rule(r"\b(used to|no longer|stopped|quit|gave up)\b", "life_change", 12),
            rule(r"\b(was|were) (married|employed|working|living)\b", "past_status", 12),
            rule(r"\b(divorced|separated|fired|laid off|quit)\b", "status_change", 12),
            rule(r"\b(sometimes|occasionally|rarely) (drink|eat|do|go)\b", "occasional_behavior", 8),
        ],
        contextual: vec![
            rule(r"\b(goal|plan|want to|need to|trying to)\b", "goal", 8),
            rule(r"\b(prefer|like|enjoy|interested in|dislike|hate)\b", "preference", 6),
            rule(r"\b(meeting|appointment|schedule|calendar)\b", "logistics", 7),
            rule(r"\b(address|phone|email|contact)\b", "contact_info", 9),
            rule(r"\b(work at|job|career|profession)\b", "career", 10),
        ],
        ephemeral: vec![
            rule(r"\b(hello|hi|hey|goodbye|bye|see you)\b", "greeting", -5),
            rule(r"\b(yes|no|okay|ok|sure|maybe|perhaps)\b", "confirmation", -3),
            rule(r"\b(um|uh|like|you know|I mean)\b", "filler", -8),
            rule(r"\b(thanks|thank you|please)\b", "pleasantry", -4),
            rule(r"\b(what|when|where|why|how)\b", "question_word", -2),
        ],
    }
}
