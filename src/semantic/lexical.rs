//! Lexical (fuzzy string) retrieval over a code catalog.
//!
//! Each catalog entry is matched through its `"{code} {description}"` search
//! string. Scores are percentages in [0, 100] and are never compared with
//! semantic similarities.
//!
//! `WeightedRatio` blends several string-similarity heuristics and keeps the
//! best one, discounting the partial and token-based variants so that a full
//! match still outranks a fragment:
//! - `ratio`: indel similarity of the processed strings
//! - `partial_ratio`: best window of the longer string against the shorter
//! - `token_sort_ratio`: word order ignored
//! - `token_set_ratio`: shared words against the leftovers
//! - subsequence match (nucleo) for abbreviations and partial codes

use std::cell::RefCell;
use std::cmp::Ordering;

use nucleo_matcher::{Config, Matcher, Utf32Str};
use rayon::prelude::*;

use crate::catalog::Catalog;

/// Below this length ratio the strings are compared whole.
const PARTIAL_LENGTH_RATIO: f64 = 1.5;

/// Above this length ratio partial matches are discounted further.
const FAR_LENGTH_RATIO: f64 = 8.0;

const TOKEN_SCALE: f64 = 0.95;
const SUBSEQUENCE_SCALE: f64 = 0.8;

/// Catalogs at least this large are scored in parallel.
const PARALLEL_MIN_ENTRIES: usize = 2048;

/// A string-similarity scorer returning a percentage.
pub trait LexicalScorer: Send + Sync {
    /// Similarity of `query` to `candidate` in [0, 100]. Must be deterministic.
    fn score(&self, query: &str, candidate: &str) -> f64;
}

/// Lexical hit for a catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalResult {
    /// Position in the catalog
    pub position: usize,
    pub code: String,
    pub description: String,
    /// Percentage in [0, 100]
    pub score: f64,
}

/// Score every catalog entry against `query` and return the best `limit`.
///
/// Results are sorted by score descending, catalog order breaking ties.
/// Entries scoring zero are dropped.
pub fn search(
    query: &str,
    catalog: &Catalog,
    limit: usize,
    scorer: &dyn LexicalScorer,
) -> Vec<LexicalResult> {
    if query.trim().is_empty() || limit == 0 || catalog.is_empty() {
        return vec![];
    }

    let score_entry = |position: usize| -> Option<(usize, f64)> {
        let score = scorer.score(query, &catalog.search_text(position));
        (score > 0.0).then_some((position, score))
    };

    let mut scored: Vec<(usize, f64)> = if catalog.len() >= PARALLEL_MIN_ENTRIES {
        (0..catalog.len()).into_par_iter().filter_map(score_entry).collect()
    } else {
        (0..catalog.len()).filter_map(score_entry).collect()
    };

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(position, score)| {
            let entry = &catalog.entries()[position];
            LexicalResult {
                position,
                code: entry.code.clone(),
                description: entry.description.clone(),
                score,
            }
        })
        .collect()
}

/// Composite weighted string similarity.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedRatio;

thread_local! {
    static MATCHER: RefCell<Matcher> = RefCell::new(Matcher::new(Config::DEFAULT));
}

impl LexicalScorer for WeightedRatio {
    fn score(&self, query: &str, candidate: &str) -> f64 {
        let a = process(query);
        let b = process(candidate);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let len_a = a.chars().count() as f64;
        let len_b = b.chars().count() as f64;
        let len_ratio = len_a.max(len_b) / len_a.min(len_b);

        let whole = ratio(&a, &b);

        if len_ratio < PARTIAL_LENGTH_RATIO {
            return whole
                .max(token_sort_ratio(&a, &b) * TOKEN_SCALE)
                .max(token_set_ratio(&a, &b) * TOKEN_SCALE)
                .min(100.0);
        }

        let partial_scale = if len_ratio < FAR_LENGTH_RATIO { 0.9 } else { 0.6 };

        whole
            .max(partial_ratio(&a, &b) * partial_scale)
            .max(token_set_ratio(&a, &b) * TOKEN_SCALE * partial_scale)
            .max(subsequence_ratio(&a, &b) * SUBSEQUENCE_SCALE * partial_scale)
            .min(100.0)
    }
}

/// Lowercase, replace everything but letters and digits with spaces, collapse.
fn process(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Indel similarity: 2 * LCS / (len_a + len_b), as a percentage.
fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 || a.is_empty() || b.is_empty() {
        return 0.0;
    }
    200.0 * lcs_len(a, b) as f64 / total as f64
}

/// Longest common subsequence length, two-row dynamic programming.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Best `ratio` of the shorter string against same-length windows of the
/// longer one. Windows start at word boundaries plus one flush with the end.
fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if short.is_empty() {
        return 0.0;
    }
    if long.contains(short) {
        return 100.0;
    }

    let short: Vec<char> = short.chars().collect();
    let long: Vec<char> = long.chars().collect();
    let width = short.len();

    let mut starts: Vec<usize> = (0..long.len())
        .filter(|&i| i == 0 || long[i - 1] == ' ')
        .collect();
    starts.push(long.len().saturating_sub(width));

    starts
        .into_iter()
        .map(|start| {
            let end = (start + width).min(long.len());
            ratio_chars(&short, &long[start..end])
        })
        .fold(0.0, f64::max)
}

fn sorted_tokens(s: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = s.split(' ').filter(|t| !t.is_empty()).collect();
    tokens.sort_unstable();
    tokens
}

fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a).join(" "), &sorted_tokens(b).join(" "))
}

/// Compares the shared words against each side's full word set.
fn token_set_ratio(a: &str, b: &str) -> f64 {
    let mut tokens_a = sorted_tokens(a);
    let mut tokens_b = sorted_tokens(b);
    tokens_a.dedup();
    tokens_b.dedup();

    let common: Vec<&str> = tokens_a
        .iter()
        .filter(|t| tokens_b.contains(t))
        .copied()
        .collect();
    let only_a: Vec<&str> = tokens_a
        .iter()
        .filter(|t| !common.contains(t))
        .copied()
        .collect();
    let only_b: Vec<&str> = tokens_b
        .iter()
        .filter(|t| !common.contains(t))
        .copied()
        .collect();

    if !common.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let sect = common.join(" ");
    let join = |rest: &[&str]| {
        if sect.is_empty() {
            rest.join(" ")
        } else {
            format!("{} {}", sect, rest.join(" "))
        }
    };
    let combined_a = join(&only_a);
    let combined_b = join(&only_b);

    let mut best = ratio(&combined_a, &combined_b);
    if !sect.is_empty() {
        best = best.max(ratio(&sect, &combined_a)).max(ratio(&sect, &combined_b));
    }
    best
}

/// Subsequence match of the shorter string inside the longer one, relative
/// to the score of a perfect match.
fn subsequence_ratio(a: &str, b: &str) -> f64 {
    let (needle, haystack) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    MATCHER.with(|matcher| {
        let mut matcher = matcher.borrow_mut();
        let mut needle_buf = Vec::new();
        let mut self_buf = Vec::new();
        let mut haystack_buf = Vec::new();

        let perfect = matcher.fuzzy_match(
            Utf32Str::new(needle, &mut self_buf),
            Utf32Str::new(needle, &mut needle_buf),
        );
        let actual = matcher.fuzzy_match(
            Utf32Str::new(haystack, &mut haystack_buf),
            Utf32Str::new(needle, &mut needle_buf),
        );

        match (perfect, actual) {
            (Some(perfect), Some(actual)) if perfect > 0 => {
                (100.0 * actual as f64 / perfect as f64).min(100.0)
            }
            _ => 0.0,
        }
    })
}
