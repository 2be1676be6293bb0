//! Result types: per-page classifications, per-document reports, run stats.
//!
//! [`RunReport::documents`] is exactly what lands in `results.json`: a map
//! from the source file name to the ordered per-page results.

use crate::config::AggregationPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The fixed document taxonomy.
///
/// `Unknown` is the sentinel used when the backend reply cannot be parsed;
/// every [`ClassificationResult`] carries one of these variants, never a
/// free-form label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// Identity documents: national ID cards, passports, driving licences.
    Id,
    /// Supplier invoices and bills.
    Invoice,
    /// Point-of-sale receipts and payment confirmations.
    Receipt,
    /// Tax returns, sworn tax declarations, withholding certificates.
    Tax,
    /// Bank and card statements.
    BankStatement,
    /// Sentinel: unrecognised or unparseable.
    Unknown,
}

impl Category {
    /// The five categories the backend is asked to choose from.
    pub const TARGETS: [Category; 5] = [
        Category::Id,
        Category::Invoice,
        Category::Receipt,
        Category::Tax,
        Category::BankStatement,
    ];

    /// Wire label, e.g. `"BANK_STATEMENT"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Id => "ID",
            Category::Invoice => "INVOICE",
            Category::Receipt => "RECEIPT",
            Category::Tax => "TAX",
            Category::BankStatement => "BANK_STATEMENT",
            Category::Unknown => "UNKNOWN",
        }
    }

    /// Parse a label leniently: case-insensitive, spaces and hyphens are
    /// treated as underscores.
    pub fn from_label(label: &str) -> Option<Category> {
        let normalised: String = label
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        Self::TARGETS
            .iter()
            .chain(std::iter::once(&Category::Unknown))
            .find(|c| c.as_str() == normalised)
            .copied()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classification of a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub reasoning: String,
}

impl ClassificationResult {
    /// Build a result, clamping `confidence` into `[0, 1]` (NaN → 0).
    pub fn new(category: Category, confidence: f64, reasoning: impl Into<String>) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            category,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    /// The sentinel result. `reasoning` echoes whatever could not be used.
    pub fn unrecognized(reasoning: impl Into<String>) -> Self {
        Self::new(Category::Unknown, 0.0, reasoning)
    }

    pub fn is_unknown(&self) -> bool {
        self.category == Category::Unknown
    }
}

/// The per-page results of one source document, in page order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentReport {
    pub pages: Vec<ClassificationResult>,
}

impl DocumentReport {
    pub fn new(pages: Vec<ClassificationResult>) -> Self {
        Self { pages }
    }

    /// Apply the aggregation policy.
    ///
    /// `PerPage` is the identity. The two reducing policies collapse the
    /// pages into a single result; a document with zero pages stays empty.
    pub fn aggregate(self, policy: AggregationPolicy) -> Self {
        if self.pages.is_empty() {
            return self;
        }
        match policy {
            AggregationPolicy::PerPage => self,
            AggregationPolicy::FirstPage => Self::new(self.pages.into_iter().take(1).collect()),
            AggregationPolicy::MajorityVote => Self::new(vec![majority_vote(&self.pages)]),
        }
    }
}

/// Most frequent known category wins; ties go to the category seen first.
/// Unknown pages only win when no page was recognised.
fn majority_vote(pages: &[ClassificationResult]) -> ClassificationResult {
    let known: Vec<&ClassificationResult> = pages.iter().filter(|p| !p.is_unknown()).collect();
    let pool: Vec<&ClassificationResult> = if known.is_empty() {
        pages.iter().collect()
    } else {
        known
    };

    // (category, votes, index of first vote)
    let mut tally: Vec<(Category, usize, usize)> = Vec::new();
    for (idx, page) in pool.iter().enumerate() {
        match tally.iter_mut().find(|(c, _, _)| *c == page.category) {
            Some(entry) => entry.1 += 1,
            None => tally.push((page.category, 1, idx)),
        }
    }
    let (winner, votes, first) = tally
        .iter()
        .copied()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
        .unwrap_or((Category::Unknown, 0, 0));

    let confidence = pool
        .iter()
        .filter(|p| p.category == winner)
        .map(|p| p.confidence)
        .sum::<f64>()
        / votes.max(1) as f64;

    ClassificationResult::new(
        winner,
        confidence,
        format!(
            "majority of {}/{} pages: {}",
            votes,
            pages.len(),
            pool.get(first).map(|p| p.reasoning.as_str()).unwrap_or("")
        ),
    )
}

/// Aggregate statistics for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Raw documents found by the scanner.
    pub total_documents: usize,
    /// Documents that yielded zero pages.
    pub failed_documents: usize,
    /// Pages sent to the backend.
    pub classified_pages: usize,
    /// Pages whose result is the sentinel.
    pub unknown_pages: usize,
    /// Pages whose backend call failed after all retries.
    pub backend_failures: usize,
    pub total_duration_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Source file name → per-page results.
    pub documents: BTreeMap<String, DocumentReport>,
    pub stats: RunStats,
}
