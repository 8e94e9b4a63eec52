//! Complexity Analyzer (spec §4.4, `[C4-ROUTING]`).
//!
//! Grounded on the teacher's `orchestrator::router` heuristics (which
//! already scored prompts by length/keyword signals for model selection)
//! generalized to the full six-signal weighted sum spec.md specifies, and
//! on `original_source/packages/core/monkey_coder/quantum/quantum_models.py`'s
//! `ComplexityLevel` enum for the discrete-level thresholds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Trivial,
    Simple,
    Moderate,
    Complex,
    Critical,
}

impl ComplexityLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            ComplexityLevel::Trivial
        } else if score < 0.4 {
            ComplexityLevel::Simple
        } else if score < 0.6 {
            ComplexityLevel::Moderate
        } else if score < 0.85 {
            ComplexityLevel::Complex
        } else {
            ComplexityLevel::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Trivial => "trivial",
            ComplexityLevel::Simple => "simple",
            ComplexityLevel::Moderate => "moderate",
            ComplexityLevel::Complex => "complex",
            ComplexityLevel::Critical => "critical",
        }
    }
}

/// Built-in lexicon for the "domain keywords" signal. Not exhaustive by
/// design — spec §4.4 calls this a "built-in lexicon", not a config knob.
const DOMAIN_KEYWORDS: &[&str] = &[
    "distributed", "concurrent", "async", "neural", "quantum", "cryptographic",
    "kernel", "lock-free", "consensus", "byzantine", "microservice", "kubernetes",
    "race condition", "deadlock", "thread", "mutex", "transaction", "sharding",
    "replication", "compiler", "parser", "allocator", "garbage collection",
];

/// Inputs the analyzer needs beyond the raw prompt text (spec §4.4: "Pure
/// function of prompt text + file count + history length").
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityInputs {
    pub file_count: usize,
    pub history_depth: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComplexityResult {
    pub score: f64,
    pub level: ComplexityLevel,
}

fn clip01(x: f64) -> f64 {
    x.max(0.0).min(1.0)
}

fn tokenize(prompt: &str) -> Vec<String> {
    prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

fn length_signal(tokens: &[String]) -> f64 {
    clip01(tokens.len() as f64 / 2000.0)
}

fn vocabulary_richness_signal(tokens: &[String]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let unique: std::collections::HashSet<&str> = tokens.iter().map(|s| s.as_str()).collect();
    clip01(unique.len() as f64 / tokens.len() as f64)
}

fn domain_keyword_signal(prompt_lower: &str, tokens: &[String]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let matches = DOMAIN_KEYWORDS
        .iter()
        .filter(|kw| prompt_lower.contains(*kw))
        .count();
    clip01(matches as f64 / tokens.len().max(1) as f64 * 10.0)
}

fn structural_marker_signal(prompt: &str) -> f64 {
    let mut markers = 0u32;
    if prompt.contains("```") {
        markers += 1;
    }
    if prompt.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("- ") || t.starts_with("* ")
    }) {
        markers += 1;
    }
    if prompt.lines().any(|l| {
        let t = l.trim_start();
        t.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
            && t.contains(". ")
    }) {
        markers += 1;
    }
    if prompt.lines().any(|l| l.trim_start().starts_with('#')) {
        markers += 1;
    }
    clip01(markers as f64 / 4.0)
}

fn file_load_signal(file_count: usize) -> f64 {
    clip01(file_count as f64 / 10.0)
}

fn history_depth_signal(history_depth: usize) -> f64 {
    clip01(history_depth as f64 / 20.0)
}

/// Computes complexity per spec §4.4's weighted-signal table. Deterministic:
/// identical `(prompt, inputs)` always yields an identical `ComplexityResult`.
pub fn analyze_complexity(prompt: &str, inputs: ComplexityInputs) -> ComplexityResult {
    let tokens = tokenize(prompt);
    let prompt_lower = prompt.to_lowercase();

    let length = length_signal(&tokens);
    let vocabulary = vocabulary_richness_signal(&tokens);
    let domain = domain_keyword_signal(&prompt_lower, &tokens);
    let structural = structural_marker_signal(prompt);
    let file_load = file_load_signal(inputs.file_count);
    let history = history_depth_signal(inputs.history_depth);

    let score = clip01(
        0.15 * length
            + 0.10 * vocabulary
            + 0.25 * domain
            + 0.20 * structural
            + 0.15 * file_load
            + 0.15 * history,
    );

    ComplexityResult {
        score,
        level: ComplexityLevel::from_score(score),
    }
}
