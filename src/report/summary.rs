//! Combining per-group result lines into one summary.
//!
//! Each framework prints a result line such as `3 examples, 1 failure`. The
//! lines from every group are collected, split into `(number, word)` pairs,
//! and numbers sharing a word are added up. Plural and singular forms share
//! one key, so `1 failure` and `2 failures` sum to `3 failures`.
//!
//! Summation is commutative, so the order in which groups finished never
//! changes the summary.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::executor::ProcessResult;

static COUNT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d+) (\w+)").unwrap());

/// How matched lines are summed and rendered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SummaryStyle {
    /// One pool of counts rendered as `N word, N word` sorted by word.
    #[default]
    Flat,

    /// Separate pools per category, one line each:
    /// `7 scenarios (1 failed, 6 passed)`.
    ///
    /// A line belongs to a category when it starts with a number followed
    /// by the category word. `order` ranks the words inside the
    /// parentheses; unranked words go last.
    Categorized {
        categories: Vec<String>,
        order: Vec<String>,
    },
}

/// The outcome of a whole run as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    /// Combined summary, `None` if no result lines were found.
    pub summary: Option<String>,

    /// Counts summed over every matched line, keyed by singular word.
    pub counts: BTreeMap<String, u64>,

    /// True if any group exited with a non-zero status.
    pub failed: bool,

    pub duration: Duration,
}

impl FinalReport {
    /// Builds the report for `results`.
    ///
    /// `is_result_line` decides which output lines are summary lines. The
    /// failure flag comes from exit statuses alone, never from the text.
    pub fn build<F>(
        results: &[ProcessResult],
        is_result_line: F,
        style: &SummaryStyle,
        duration: Duration,
    ) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let outputs: Vec<&str> = results.iter().map(|r| r.stdout.as_str()).collect();
        let lines = result_lines(&outputs, &is_result_line);

        Self {
            summary: render(&lines, style),
            counts: sum_up(&lines),
            failed: any_failed(results),
            duration,
        }
    }

    /// `Took N seconds`.
    pub fn timing_line(&self) -> String {
        format!("Took {:.2} seconds", self.duration.as_secs_f64())
    }

    pub fn count(&self, word: &str) -> u64 {
        self.counts.get(word).copied().unwrap_or(0)
    }
}

/// Returns true if any process exited non-zero.
pub fn any_failed(results: &[ProcessResult]) -> bool {
    results.iter().any(|r| !r.success())
}

/// Extracts result lines from raw outputs, with ANSI escapes removed.
pub fn result_lines<F>(outputs: &[&str], is_result_line: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    outputs
        .iter()
        .flat_map(|output| {
            strip_ansi_escapes::strip_str(output)
                .lines()
                .filter(|line| is_result_line(line))
                .map(|line| line.trim().to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Summarizes the result lines found in `outputs`.
///
/// Returns `None` when no line matched.
pub fn summarize<F>(outputs: &[&str], is_result_line: F, style: &SummaryStyle) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    render(&result_lines(outputs, is_result_line), style)
}

/// Sums every `(number, word)` pair in `lines` by singular word.
pub fn sum_up<S: AsRef<str>>(lines: &[S]) -> BTreeMap<String, u64> {
    let mut sums = BTreeMap::new();
    for line in lines {
        for caps in COUNT_PATTERN.captures_iter(line.as_ref()) {
            let Ok(number) = caps[1].parse::<u64>() else {
                continue;
            };
            *sums.entry(singular(&caps[2]).to_string()).or_insert(0) += number;
        }
    }
    sums
}

/// `1 example`, `0 examples`, `2 examples`.
pub fn pluralize(number: u64, word: &str) -> String {
    if number == 1 {
        format!("{} {}", number, word)
    } else {
        format!("{} {}s", number, word)
    }
}

fn singular(word: &str) -> &str {
    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem,
        _ => word,
    }
}

fn render(lines: &[String], style: &SummaryStyle) -> Option<String> {
    if lines.is_empty() {
        return None;
    }

    match style {
        SummaryStyle::Flat => {
            let sums = sum_up(lines);
            if sums.is_empty() {
                return None;
            }
            Some(
                sums.iter()
                    .map(|(word, number)| pluralize(*number, word))
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        }
        SummaryStyle::Categorized { categories, order } => {
            let rendered: Vec<String> = categories
                .iter()
                .filter_map(|category| render_category(lines, category, order))
                .collect();
            if rendered.is_empty() {
                None
            } else {
                Some(rendered.join("\n"))
            }
        }
    }
}

fn render_category(lines: &[String], category: &str, order: &[String]) -> Option<String> {
    let pattern = Regex::new(&format!(r"^\d+ {}", regex::escape(category))).ok()?;
    let matching: Vec<&String> = lines.iter().filter(|l| pattern.is_match(l)).collect();
    if matching.is_empty() {
        return None;
    }

    let sums = sum_up(&matching);
    let total = sums.get(category).copied().unwrap_or(0);

    let rank = |word: &str| order.iter().position(|o| o == word).unwrap_or(usize::MAX);
    let mut details: Vec<(&String, &u64)> =
        sums.iter().filter(|(word, _)| *word != category).collect();
    details.sort_by_key(|(word, _)| rank(word));

    let head = pluralize(total, category);
    if details.is_empty() {
        return Some(head);
    }
    let details: Vec<String> = details
        .iter()
        .map(|(word, number)| format!("{} {}", number, word))
        .collect();
    Some(format!("{} ({})", head, details.join(", ")))
}
