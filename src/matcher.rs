//! Utterance normalization, pattern alignment and candidate ranking.

use crate::registry::{CommandTemplate, CompiledPattern, Registry, Segment, SlotSpec};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

static NEXT_MATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Lowercases, drops apostrophes, turns other punctuation into spaces and
/// collapses whitespace.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| {
            if c.is_alphanumeric() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Process-unique identity of a candidate, the key for at-most-once dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchId(u64);

impl MatchId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MATCH_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSlot {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct CandidateMatch {
    pub id: MatchId,
    pub template: Arc<CommandTemplate>,
    /// Source text of the pattern that produced this match
    pub pattern: String,
    /// Slots in pattern order
    pub slots: Vec<ParsedSlot>,
    /// Vocabulary slot → resolved value
    pub resolved: BTreeMap<String, String>,
    pub score: f64,
    pub literal_count: usize,
}

impl CandidateMatch {
    pub fn command_id(&self) -> &str {
        &self.template.id
    }

    pub fn slot(&self, name: &str) -> Option<&str> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value.as_str())
    }

    /// Human-readable phrase, e.g. "delete folder taxes"
    pub fn describe(&self) -> String {
        let mut text = self.template.id.replace('_', " ");
        for slot in self.slots.iter().filter(|s| !s.value.is_empty()) {
            text.push(' ');
            text.push_str(&slot.value);
        }
        text
    }
}

/// Weights of the two score terms
#[derive(Debug, Clone, Copy)]
pub struct MatchWeights {
    pub literal: f64,
    pub slot: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            literal: 0.7,
            slot: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    weights: MatchWeights,
}

/// A successful alignment of one pattern
struct Alignment {
    slots: Vec<ParsedSlot>,
    resolved: BTreeMap<String, String>,
    score: f64,
    literal_count: usize,
}

impl Matcher {
    pub fn new(weights: MatchWeights) -> Self {
        Self { weights }
    }

    /// Ranked candidates, best first, at most one per template.
    pub fn match_text(&self, utterance: &str, registry: &Registry) -> Vec<CandidateMatch> {
        let normalized = normalize(utterance);
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<CandidateMatch> = Vec::new();
        for template in registry.lookup_all() {
            let mut best: Option<(Alignment, &CompiledPattern)> = None;
            for pattern in &template.patterns {
                let Some(alignment) = self.align(pattern, &tokens, registry) else {
                    continue;
                };
                let better = match &best {
                    None => true,
                    Some((current, _)) => {
                        alignment.score > current.score
                            || (alignment.score == current.score
                                && alignment.literal_count > current.literal_count)
                    }
                };
                if better {
                    best = Some((alignment, pattern));
                }
            }
            if let Some((alignment, pattern)) = best {
                if alignment.score > 0.0 {
                    candidates.push(CandidateMatch {
                        id: MatchId::next(),
                        template: Arc::clone(template),
                        pattern: pattern.source.clone(),
                        slots: alignment.slots,
                        resolved: alignment.resolved,
                        score: alignment.score,
                        literal_count: alignment.literal_count,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(b.literal_count.cmp(&a.literal_count))
                .then(a.template.order.cmp(&b.template.order))
        });
        log::debug!(
            "\"{normalized}\" → {} candidate(s){}",
            candidates.len(),
            candidates
                .first()
                .map(|c| format!(", best {} ({:.2})", c.command_id(), c.score))
                .unwrap_or_default()
        );
        candidates
    }

    fn align(
        &self,
        pattern: &CompiledPattern,
        tokens: &[&str],
        registry: &Registry,
    ) -> Option<Alignment> {
        let literal_segments: Vec<usize> = pattern
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Segment::Literal(_)))
            .map(|(i, _)| i)
            .collect();
        let mut search = Search::new(pattern, &literal_segments, tokens, registry);
        if !search.literals_in_order() {
            return None;
        }
        let mut positions = Vec::with_capacity(literal_segments.len());
        let captures = search.run(&mut positions)?;

        let literal_total = literal_segments.len();
        let literal_ratio = if literal_total == 0 {
            1.0
        } else {
            positions.len() as f64 / literal_total as f64
        };
        let slot_total = pattern.slot_count();
        let filled = captures.iter().filter(|c| !c.0.value.is_empty()).count();
        let fill_ratio = if slot_total == 0 {
            1.0
        } else {
            filled as f64 / slot_total as f64
        };
        let score = (self.weights.literal * literal_ratio + self.weights.slot * fill_ratio)
            .clamp(0.0, 1.0);

        let mut resolved = BTreeMap::new();
        let mut slots = Vec::with_capacity(captures.len());
        for (slot, value) in captures {
            if let Some(value) = value {
                resolved.insert(slot.name.clone(), value);
            }
            slots.push(slot);
        }
        Some(Alignment {
            slots,
            resolved,
            score,
            literal_count: literal_total,
        })
    }
}

type Capture = (ParsedSlot, Option<String>);

/// Literal placement for one pattern against one utterance.
struct Search<'a> {
    pattern: &'a CompiledPattern,
    literal_segments: &'a [usize],
    tokens: &'a [&'a str],
    registry: &'a Registry,
    /// (literal index, token position) placements known to lead nowhere
    dead_ends: HashSet<(usize, usize)>,
}

impl<'a> Search<'a> {
    fn new(
        pattern: &'a CompiledPattern,
        literal_segments: &'a [usize],
        tokens: &'a [&'a str],
        registry: &'a Registry,
    ) -> Self {
        Self {
            pattern,
            literal_segments,
            tokens,
            registry,
            dead_ends: HashSet::new(),
        }
    }

    /// Every literal occurs in order somewhere; otherwise nothing can align.
    fn literals_in_order(&self) -> bool {
        let mut rest = self.tokens.iter();
        self.literal_segments
            .iter()
            .all(|&index| match &self.pattern.segments[index] {
                Segment::Literal(word) => rest.any(|token| *token == word.as_str()),
                Segment::Slot(_) => false,
            })
    }

    /// Places literals leftmost-first in order, backtracking until every slot
    /// span satisfies its declaration. A slot is checked as soon as both of
    /// its bounds are placed, so whether a placement can be completed depends
    /// only on the literal and its position.
    fn run(&mut self, positions: &mut Vec<usize>) -> Option<Vec<Capture>> {
        let pattern = self.pattern;
        let tokens = self.tokens;
        let placed = positions.len();
        if placed == self.literal_segments.len() {
            return fill_slots(pattern, self.literal_segments, positions, tokens, self.registry);
        }
        let Segment::Literal(word) = &pattern.segments[self.literal_segments[placed]] else {
            return None;
        };
        let from = positions.last().map_or(0, |&p| p + 1);
        for at in from..tokens.len() {
            if tokens[at] != word.as_str()
                || self.dead_ends.contains(&(placed, at))
                || !self.gap_fits(placed, &tokens[from..at])
            {
                continue;
            }
            positions.push(at);
            if let Some(captures) = self.run(positions) {
                return Some(captures);
            }
            positions.pop();
            self.dead_ends.insert((placed, at));
        }
        None
    }

    /// Whether the slot before literal `placed`, if any, accepts `span`.
    fn gap_fits(&self, placed: usize, span: &[&str]) -> bool {
        let upper = self.literal_segments[placed];
        let lower = placed
            .checked_sub(1)
            .map_or(0, |k| self.literal_segments[k] + 1);
        self.pattern.segments[lower..upper]
            .iter()
            .all(|segment| match segment {
                Segment::Slot(spec) => match spec.vocabulary {
                    Some(_) => capture(spec, span, self.registry).is_some(),
                    None => !(spec.required && span.is_empty()),
                },
                Segment::Literal(_) => true,
            })
    }
}

fn fill_slots(
    pattern: &CompiledPattern,
    literal_segments: &[usize],
    positions: &[usize],
    tokens: &[&str],
    registry: &Registry,
) -> Option<Vec<Capture>> {
    let mut captures = Vec::new();
    for (index, segment) in pattern.segments.iter().enumerate() {
        let Segment::Slot(spec) = segment else {
            continue;
        };
        // Slots are bounded by their neighbouring literals or the utterance ends.
        let before = literal_segments.iter().rposition(|&s| s < index);
        let after = literal_segments.iter().position(|&s| s > index);
        let start = before.map_or(0, |k| positions[k] + 1);
        let end = after.map_or(tokens.len(), |k| positions[k]);
        let span = &tokens[start..end.max(start)];
        captures.push(capture(spec, span, registry)?);
    }
    Some(captures)
}

fn capture(spec: &SlotSpec, span: &[&str], registry: &Registry) -> Option<Capture> {
    let slot = |value: String| ParsedSlot {
        name: spec.name.clone(),
        value,
    };
    match &spec.vocabulary {
        Some(name) => {
            let words = registry.vocabulary(name)?;
            // Longest vocabulary entry prefixing the span; the rest is filler.
            (1..=span.len()).rev().find_map(|len| {
                let spoken = span[..len].join(" ");
                words
                    .get(&spoken)
                    .map(|value| (slot(spoken.clone()), Some(value.clone())))
            })
        }
        None if span.is_empty() && spec.required => None,
        None => Some((slot(span.join(" ")), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandEntry, CommandsDocument};

    fn registry(entries: Vec<(&str, Vec<&str>)>) -> Registry {
        let mut document = CommandsDocument::default();
        document.vocabularies.insert(
            "applications".to_string(),
            [("chrome", "google-chrome"), ("visual studio code", "code")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        document.commands = entries
            .into_iter()
            .map(|(id, patterns)| CommandEntry {
                id: id.to_string(),
                patterns: patterns.into_iter().map(str::to_string).collect(),
                destructive: false,
                handler: "noop".to_string(),
                params: BTreeMap::new(),
            })
            .collect();
        Registry::load(&document, |_| true).unwrap()
    }

    #[test]
    fn normalizes_case_punctuation_and_spacing() {
        assert_eq!(normalize("  Open,   Chrome!! "), "open chrome");
        assert_eq!(normalize("What's  the\tweather?"), "whats the weather");
        assert_eq!(normalize("google.com"), "google com");
        assert_eq!(normalize("?!"), "");
    }

    #[test]
    fn exact_utterance_scores_one() {
        let registry = registry(vec![("open_app", vec!["open {app}"])]);
        let matches = Matcher::default().match_text("open chrome", &registry);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].slot("app"), Some("chrome"));
        assert!((matches[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn extra_words_do_not_prevent_a_match() {
        let registry = registry(vec![("open_app", vec!["open {app}"])]);
        let matches = Matcher::default().match_text("please open chrome now", &registry);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].slot("app"), Some("chrome now"));
        assert!(matches[0].score >= 0.5);
    }

    #[test]
    fn missing_literal_or_order_fails() {
        let registry = registry(vec![("search", vec!["search for {query}"])]);
        let matcher = Matcher::default();
        assert!(matcher.match_text("search cats", &registry).is_empty());
        assert!(matcher.match_text("for search cats", &registry).is_empty());
        assert!(matcher.match_text("", &registry).is_empty());
    }

    #[test]
    fn required_slot_must_not_be_empty() {
        let registry = registry(vec![("search", vec!["search for {query}"])]);
        assert!(Matcher::default()
            .match_text("search for", &registry)
            .is_empty());
    }

    #[test]
    fn optional_slot_lowers_fill_score() {
        let registry = registry(vec![("note", vec!["take note {body?}"])]);
        let matches = Matcher::default().match_text("take note", &registry);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].slot("body"), Some(""));
        assert!((matches[0].score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn slot_between_literals_is_bounded() {
        let registry = registry(vec![("move", vec!["move {file} to {place}"])]);
        let matches = Matcher::default().match_text("move the report to archive", &registry);
        assert_eq!(matches[0].slot("file"), Some("the report"));
        assert_eq!(matches[0].slot("place"), Some("archive"));
    }

    #[test]
    fn backtracks_past_a_literal_that_would_empty_a_slot() {
        let registry = registry(vec![("move", vec!["move {file} to {place}"])]);
        let matches = Matcher::default().match_text("move to do list to archive", &registry);
        assert_eq!(matches[0].slot("file"), Some("to do list"));
        assert_eq!(matches[0].slot("place"), Some("archive"));
    }

    #[test]
    fn vocabulary_slot_takes_longest_known_prefix() {
        let registry = registry(vec![("open_app", vec!["open {app:applications}"])]);
        let matcher = Matcher::default();
        let matches = matcher.match_text("open visual studio code please", &registry);
        assert_eq!(matches[0].slot("app"), Some("visual studio code"));
        assert_eq!(matches[0].resolved["app"], "code");
        assert!(matcher.match_text("open notepad", &registry).is_empty());
    }

    #[test]
    fn more_specific_pattern_wins_within_a_template() {
        let registry = registry(vec![(
            "create_folder",
            vec!["create folder {name}", "create a folder called {name}"],
        )]);
        let matches = Matcher::default().match_text("create a folder called taxes", &registry);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pattern, "create a folder called {name}");
        assert_eq!(matches[0].slot("name"), Some("taxes"));
    }

    #[test]
    fn ties_break_on_specificity_then_registration_order() {
        let registry = registry(vec![
            ("first", vec!["open {thing}"]),
            ("second", vec!["open {thing}"]),
            ("specific", vec!["open the {thing}"]),
        ]);
        let matches = Matcher::default().match_text("open the door", &registry);
        let ids: Vec<_> = matches.iter().map(|m| m.command_id()).collect();
        assert_eq!(ids, vec!["specific", "first", "second"]);
    }

    #[test]
    fn slot_text_round_trips() {
        let registry = registry(vec![
            ("move", vec!["move {file} to {place}"]),
            ("search", vec!["search for {query}"]),
        ]);
        let matcher = Matcher::default();
        for (utterance, id, expected) in [
            (
                "move quarterly numbers to old stuff",
                "move",
                vec![("file", "quarterly numbers"), ("place", "old stuff")],
            ),
            (
                "search for rust borrow checker",
                "search",
                vec![("query", "rust borrow checker")],
            ),
        ] {
            let matches = matcher.match_text(utterance, &registry);
            let hit = matches.iter().find(|m| m.command_id() == id).unwrap();
            for (name, value) in expected {
                assert_eq!(hit.slot(name), Some(value));
            }
        }
    }

    #[test]
    fn long_utterances_align_without_exhaustive_backtracking() {
        let folders = registry(vec![(
            "create_folder",
            vec!["create a folder called {name}"],
        )]);
        let matcher = Matcher::default();
        let filler = "a folder ".repeat(300);

        let missing = format!("create {filler}");
        assert!(matcher.match_text(&missing, &folders).is_empty());

        let present = format!("create {filler}called taxes");
        let matches = matcher.match_text(&present, &folders);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].slot("name"), Some("taxes"));

        // Only the last "to" leaves a known application for the trailing slot.
        let moves = registry(vec![("move", vec!["move {file} to {app:applications}"])]);
        let utterance = format!("move {}to chrome", "to x ".repeat(200));
        let matches = matcher.match_text(&utterance, &moves);
        assert_eq!(matches[0].resolved["app"], "google-chrome");
        assert_eq!(
            matches[0].slot("file").map(|f| f.split(' ').count()),
            Some(400)
        );
    }

    #[test]
    fn every_candidate_gets_a_fresh_id() {
        let registry = registry(vec![("open_app", vec!["open {app}"])]);
        let matcher = Matcher::default();
        let a = matcher.match_text("open chrome", &registry);
        let b = matcher.match_text("open chrome", &registry);
        assert_ne!(a[0].id, b[0].id);
    }
}
