//! Cleaning passes applied to raw engine output.
//!
//! Space-delimited scripts tolerate aggressive normalization: whitespace runs
//! collapse, blank-line runs collapse, and long runs of a repeated character
//! are capped (engines emit them when they latch onto table rules or page
//! borders). Dense scripts get a deliberate no-op, since collapsing
//! adjacency there destroys legitimate text. Which policy applies to which language is
//! decided by configuration, not here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How much normalization to apply to recognized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleaningPolicy {
    /// Collapse whitespace and blank lines, trim, cap repeated characters.
    Aggressive,
    /// Return the text unchanged.
    Minimal,
}

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{3000}]+").expect("valid regex"));
static BLANK_LINE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Runs of this many identical characters or more are capped.
const REPEAT_THRESHOLD: usize = 5;
/// Length a capped run is reduced to.
const REPEAT_KEEP: usize = 3;

/// Apply the given cleaning policy to recognized text.
pub fn clean_text(text: &str, policy: CleaningPolicy) -> String {
    match policy {
        CleaningPolicy::Minimal => text.to_string(),
        CleaningPolicy::Aggressive => aggressive_clean(text),
    }
}

fn aggressive_clean(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let collapsed: Vec<String> = unified
        .lines()
        .map(|line| WHITESPACE_RUN.replace_all(line, " ").trim().to_string())
        .collect();
    let joined = collapsed.join("\n");

    let without_blank_runs = BLANK_LINE_RUN.replace_all(&joined, "\n\n");
    cap_repeated_chars(without_blank_runs.trim(), REPEAT_THRESHOLD, REPEAT_KEEP)
}

/// Cap runs of `threshold`+ identical characters down to `keep` occurrences.
///
/// The regex crate has no backreferences, so runs are found with a linear
/// scan instead.
fn cap_repeated_chars(text: &str, threshold: usize, keep: usize) -> String {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(current) = chars.next() {
        let mut run = 1usize;
        while chars.peek() == Some(&current) {
            chars.next();
            run += 1;
        }

        let emit = if run >= threshold { keep } else { run };
        for _ in 0..emit {
            output.push(current);
        }
    }

    output
}
