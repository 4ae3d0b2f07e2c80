//! Pattern registry: command templates compiled once from configuration.

use crate::config::{CommandEntry, CommandsDocument};
use crate::error::ConfigError;
use crate::matcher::normalize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// A declared parameter position inside a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSpec {
    pub name: String,
    /// A zero-length capture disqualifies the pattern instance
    pub required: bool,
    /// Captured text must be a key of this vocabulary
    pub vocabulary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Slot(SlotSpec),
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub source: String,
    pub segments: Vec<Segment>,
}

impl CompiledPattern {
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    pub fn slot_count(&self) -> usize {
        self.segments.len() - self.literal_count()
    }
}

#[derive(Debug, Clone)]
pub struct CommandTemplate {
    pub id: String,
    pub patterns: Vec<CompiledPattern>,
    pub destructive: bool,
    pub handler_id: String,
    pub params: BTreeMap<String, Value>,
    /// Registration order, the last tie-breaker between templates
    pub order: usize,
}

/// Read-only after load; reloading builds a new instance.
#[derive(Debug, Default)]
pub struct Registry {
    templates: Vec<Arc<CommandTemplate>>,
    vocabularies: HashMap<String, BTreeMap<String, String>>,
}

impl Registry {
    /// Compiles every command entry, failing on the first malformed one.
    /// `handler_known` decides whether a handler id is registered.
    pub fn load(
        document: &CommandsDocument,
        handler_known: impl Fn(&str) -> bool,
    ) -> Result<Self, ConfigError> {
        let vocabularies: HashMap<String, BTreeMap<String, String>> = document
            .vocabularies
            .iter()
            .map(|(name, words)| {
                let words = words
                    .iter()
                    .map(|(spoken, value)| (normalize(spoken), value.clone()))
                    .filter(|(spoken, _)| !spoken.is_empty())
                    .collect();
                (name.clone(), words)
            })
            .collect();

        let mut seen = HashSet::new();
        let mut templates = Vec::with_capacity(document.commands.len());
        for (order, entry) in document.commands.iter().enumerate() {
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::DuplicateCommand(entry.id.clone()));
            }
            if !handler_known(&entry.handler) {
                return Err(ConfigError::UnknownHandler {
                    command: entry.id.clone(),
                    handler: entry.handler.clone(),
                });
            }
            templates.push(Arc::new(compile_template(entry, order, &vocabularies)?));
        }

        log::info!("registry loaded: {} commands", templates.len());
        Ok(Self {
            templates,
            vocabularies,
        })
    }

    pub fn lookup_all(&self) -> &[Arc<CommandTemplate>] {
        &self.templates
    }

    pub fn get(&self, id: &str) -> Option<&Arc<CommandTemplate>> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Normalized spoken word → resolved value
    pub fn vocabulary(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.vocabularies.get(name)
    }
}

fn compile_template(
    entry: &CommandEntry,
    order: usize,
    vocabularies: &HashMap<String, BTreeMap<String, String>>,
) -> Result<CommandTemplate, ConfigError> {
    if entry.patterns.is_empty() {
        return Err(ConfigError::EmptyPatterns(entry.id.clone()));
    }
    let mut patterns = Vec::with_capacity(entry.patterns.len());
    for source in &entry.patterns {
        let malformed = |detail: &str| ConfigError::MalformedPattern {
            command: entry.id.clone(),
            pattern: source.clone(),
            detail: detail.to_string(),
        };
        let segments = parse_pattern(source).map_err(|d| malformed(&d))?;
        for segment in &segments {
            if let Segment::Slot(SlotSpec {
                vocabulary: Some(vocabulary),
                ..
            }) = segment
            {
                if !vocabularies.contains_key(vocabulary) {
                    return Err(ConfigError::UnknownVocabulary {
                        command: entry.id.clone(),
                        vocabulary: vocabulary.clone(),
                    });
                }
            }
        }
        patterns.push(CompiledPattern {
            source: source.clone(),
            segments,
        });
    }
    Ok(CommandTemplate {
        id: entry.id.clone(),
        patterns,
        destructive: entry.destructive,
        handler_id: entry.handler.clone(),
        params: entry.params.clone(),
        order,
    })
}

/// Splits a pattern into normalized literal tokens and slots.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut slot: Option<String> = None;

    for c in pattern.chars() {
        match c {
            '{' => {
                if slot.is_some() {
                    return Err("nested '{'".to_string());
                }
                push_literals(&mut segments, &literal);
                literal.clear();
                slot = Some(String::new());
            }
            '}' => match slot.take() {
                Some(inner) => segments.push(Segment::Slot(parse_slot(&inner)?)),
                None => return Err("unbalanced '}'".to_string()),
            },
            c => match slot.as_mut() {
                Some(inner) => inner.push(c),
                None => literal.push(c),
            },
        }
    }
    if slot.is_some() {
        return Err("unclosed '{'".to_string());
    }
    push_literals(&mut segments, &literal);

    let mut names = HashSet::new();
    for pair in segments.windows(2) {
        if let [Segment::Slot(_), Segment::Slot(_)] = pair {
            return Err("adjacent slots".to_string());
        }
    }
    for segment in &segments {
        if let Segment::Slot(spec) = segment {
            if !names.insert(spec.name.as_str()) {
                return Err(format!("duplicate slot {}", spec.name));
            }
        }
    }
    if !segments.iter().any(|s| matches!(s, Segment::Literal(_))) {
        return Err("no literal words".to_string());
    }
    Ok(segments)
}

fn push_literals(segments: &mut Vec<Segment>, text: &str) {
    segments.extend(
        normalize(text)
            .split_whitespace()
            .map(|t| Segment::Literal(t.to_string())),
    );
}

fn parse_slot(inner: &str) -> Result<SlotSpec, String> {
    let (name, vocabulary) = match inner.split_once(':') {
        Some((name, vocab)) => (name.trim(), Some(vocab.trim())),
        None => (inner.trim(), None),
    };
    let (name, required) = match name.strip_suffix('?') {
        Some(name) => (name, false),
        None => (name, true),
    };
    let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid(name) {
        return Err(format!("invalid slot name '{name}'"));
    }
    match vocabulary {
        Some(v) if !valid(v) => Err(format!("invalid vocabulary name '{v}'")),
        Some(_) if !required => Err("vocabulary slots cannot be optional".to_string()),
        _ => Ok(SlotSpec {
            name: name.to_string(),
            required,
            vocabulary: vocabulary.map(str::to_string),
        }),
    }
}
