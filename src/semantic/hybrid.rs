//! Hybrid ranking policy combining semantic and lexical candidates.
//!
//! Semantic retrieval runs first. Lexical retrieval is only consulted when the
//! semantic side is empty or its best similarity falls under the family
//! threshold. The merge never compares scores across methods: semantic
//! candidates keep their order and come first, lexical candidates fill the
//! remaining slots, and a code is kept only at its first occurrence.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::semantic::index::SearchResult;
use crate::semantic::lexical::LexicalResult;

/// Retrieval method requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestMethod {
    Semantic,
    Fuzzy,
    #[default]
    Hybrid,
}

impl fmt::Display for SuggestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SuggestMethod::Semantic => "semantic",
            SuggestMethod::Fuzzy => "fuzzy",
            SuggestMethod::Hybrid => "hybrid",
        })
    }
}

impl FromStr for SuggestMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "semantic" => Ok(SuggestMethod::Semantic),
            "fuzzy" | "lexical" => Ok(SuggestMethod::Fuzzy),
            "hybrid" | "" => Ok(SuggestMethod::Hybrid),
            other => Err(format!(
                "unknown method '{other}' (expected semantic, fuzzy or hybrid)"
            )),
        }
    }
}

/// A score tagged with the method that produced it.
///
/// Semantic scores are cosine similarities in [0, 1]; lexical scores are
/// percentages in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "lowercase")]
pub enum Score {
    Semantic(f32),
    Lexical(f64),
}

impl Score {
    /// The bare number, on its method's own scale.
    pub fn value(&self) -> f64 {
        match *self {
            Score::Semantic(s) => s as f64,
            Score::Lexical(s) => s,
        }
    }

    pub fn method(&self) -> SuggestMethod {
        match self {
            Score::Semantic(_) => SuggestMethod::Semantic,
            Score::Lexical(_) => SuggestMethod::Fuzzy,
        }
    }

    pub fn semantic(&self) -> Option<f32> {
        match *self {
            Score::Semantic(s) => Some(s),
            Score::Lexical(_) => None,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Semantic(s) => write!(f, "{:.3}", s),
            Score::Lexical(s) => write!(f, "{:.0}", s),
        }
    }
}

/// One ranked code suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub code: String,
    pub description: String,
    pub score: Score,
}

impl Suggestion {
    /// Semantic suggestion; similarity rounded to three decimals.
    pub fn from_semantic(result: SearchResult, description: &str) -> Self {
        Self {
            code: result.code,
            description: description.to_string(),
            score: Score::Semantic((result.score * 1000.0).round() / 1000.0),
        }
    }

    /// Lexical suggestion; percentage truncated to a whole number.
    pub fn from_lexical(result: LexicalResult) -> Self {
        Self {
            code: result.code,
            description: result.description,
            score: Score::Lexical(result.score.trunc()),
        }
    }

    /// Bare tuple view for collaborators that render (code, description, score).
    pub fn as_tuple(&self) -> (&str, &str, f64) {
        (&self.code, &self.description, self.score.value())
    }
}

/// True when lexical augmentation is required: no semantic candidates, or
/// the best one scores under `threshold`.
pub fn needs_lexical(semantic: &[Suggestion], threshold: f32) -> bool {
    let top_score = semantic
        .first()
        .and_then(|s| s.score.semantic())
        .unwrap_or(0.0);
    semantic.is_empty() || top_score < threshold
}

/// Merge semantic candidates (first, in order) with lexical candidates (in
/// order), dropping codes already taken, up to `limit` entries.
pub fn merge_candidates(
    semantic: Vec<Suggestion>,
    lexical: Vec<Suggestion>,
    limit: usize,
) -> Vec<Suggestion> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(limit);

    for suggestion in semantic.into_iter().chain(lexical) {
        if merged.len() >= limit {
            break;
        }
        if seen.insert(suggestion.code.clone()) {
            merged.push(suggestion);
        }
    }

    merged
}
