//! Pattern matcher: keyword and regex extractors that mark spans in text.
//!
//! Matching is pure and deterministic: the same text and extractor set
//! always produce the same results, in extractor order then text order.

use kenning_core::error::ExtractionError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How an extractor recognizes its spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PatternKind {
    /// Whole-word, case-insensitive phrases.
    Keyword(Vec<String>),
    /// A raw regular expression.
    Regex(String),
}

/// A registered extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extractor {
    pub id: String,
    pub kind: PatternKind,
}

impl Extractor {
    pub fn keywords(id: &str, words: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            kind: PatternKind::Keyword(words.iter().map(|w| w.to_string()).collect()),
        }
    }

    pub fn regex(id: &str, pattern: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: PatternKind::Regex(pattern.to_string()),
        }
    }

    fn compile(&self) -> Result<Regex, ExtractionError> {
        let pattern = match &self.kind {
            PatternKind::Keyword(words) => {
                let words: Vec<String> = words
                    .iter()
                    .map(|w| w.trim())
                    .filter(|w| !w.is_empty())
                    .map(regex::escape)
                    .collect();
                if words.is_empty() {
                    return Err(ExtractionError::InvalidPattern {
                        pattern_id: self.id.clone(),
                        reason: "keyword list is empty".into(),
                    });
                }
                format!(r"(?i)\b(?:{})\b", words.join("|"))
            }
            PatternKind::Regex(pattern) => pattern.clone(),
        };
        Regex::new(&pattern).map_err(|e| ExtractionError::InvalidPattern {
            pattern_id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// One matched region. `start`/`end` are byte offsets into the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// All matches of one extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub pattern_id: String,
    pub matches: Vec<PatternMatch>,
}

struct CompiledRule {
    id: String,
    pattern: Regex,
}

/// A compiled extractor set.
pub struct PatternMatcher {
    rules: Vec<CompiledRule>,
}

impl PatternMatcher {
    pub fn new(extractors: &[Extractor]) -> Result<Self, ExtractionError> {
        let rules = extractors
            .iter()
            .map(|e| {
                Ok(CompiledRule {
                    id: e.id.clone(),
                    pattern: e.compile()?,
                })
            })
            .collect::<Result<Vec<_>, ExtractionError>>()?;
        Ok(Self { rules })
    }

    /// The built-in extractor set.
    pub fn with_defaults() -> Self {
        let rules = default_extractors()
            .iter()
            .filter_map(|e| {
                e.compile().ok().map(|pattern| CompiledRule {
                    id: e.id.clone(),
                    pattern,
                })
            })
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every extractor over `text`. Extractors without a match are omitted.
    pub fn find(&self, text: &str) -> Vec<MatchResult> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let matches: Vec<PatternMatch> = rule
                    .pattern
                    .find_iter(text)
                    .filter(|m| !m.as_str().is_empty())
                    .map(|m| PatternMatch {
                        pattern_id: rule.id.clone(),
                        text: m.as_str().to_string(),
                        start: m.start(),
                        end: m.end(),
                    })
                    .collect();
                (!matches.is_empty()).then(|| MatchResult {
                    pattern_id: rule.id.clone(),
                    matches,
                })
            })
            .collect()
    }
}

/// Compile `extractors` and run them over `text`.
pub fn find(text: &str, extractors: &[Extractor]) -> Result<Vec<MatchResult>, ExtractionError> {
    Ok(PatternMatcher::new(extractors)?.find(text))
}

pub fn default_extractors() -> Vec<Extractor> {
    vec![
        Extractor::keywords(
            "emotion",
            &[
                "worried", "worry", "anxious", "scared", "afraid", "nervous", "stressed", "upset", "sad",
                "angry", "frustrated", "happy", "excited", "proud", "grateful", "lonely", "overwhelmed",
            ],
        ),
        Extractor::keywords(
            "intention",
            &["going to", "plan to", "planning to", "intend to", "want to", "decided to", "trying to"],
        ),
        Extractor::keywords("obligation", &["must", "should", "have to", "need to", "supposed to"]),
        Extractor::keywords("hypothetical", &["what if", "if only", "maybe", "might", "could be"]),
        Extractor::keywords("importance", &["important", "matters", "remember", "never forget", "crucial"]),
        Extractor::keywords("reversal", &["after all", "changed my mind", "not anymore", "no longer"]),
        Extractor::regex(
            "temporal",
            r"(?i)\b(?:yesterday|today|tonight|tomorrow|(?:last|next|this) (?:week|month|year|weekend))\b",
        ),
    ]
}

const FILLERS: &[&str] = &["um", "umm", "uh", "uhh", "erm", "hmm", "hm"];

/// Drop speech fillers and collapse whitespace.
pub fn sanitize(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| {
            let bare = word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            !FILLERS.contains(&bare.as_str())
        })
        .collect::<Vec<_>>()
        .join(" ")
}
