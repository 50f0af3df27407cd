use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed manifest and the path it was loaded from.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: String,
    pub document: serde_json::Value,
}

/// How a manifest is turned into text before tokenizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TextForm {
    Compact,
    #[default]
    Pretty,
    /// Human-oriented digest of the root dataset and its files.
    Summary,
}

/// Raw bytes of one input file, or the reason it could not be read.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: String,
    pub content: std::result::Result<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub model: String,
    /// Encoding name, e.g. `cl100k_base`.
    pub encoding: String,
    pub tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unreadable,
    MalformedDocument,
    UnsupportedModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Counted { tokens: usize, oversized: bool },
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub path: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl BatchEntry {
    pub fn counted(path: impl Into<String>, tokens: usize, oversized: bool) -> Self {
        Self {
            path: path.into(),
            outcome: ItemOutcome::Counted { tokens, oversized },
        }
    }

    pub fn failed(path: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            outcome: ItemOutcome::Failed {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn tokens(&self) -> Option<usize> {
        match self.outcome {
            ItemOutcome::Counted { tokens, .. } => Some(tokens),
            ItemOutcome::Failed { .. } => None,
        }
    }

    pub fn is_oversized(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Counted { oversized: true, .. })
    }
}

/// Aggregates over the counted entries only. With nothing counted the
/// min/max/mean/median fields stay `None` and serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub oversized: usize,
    pub total_tokens: usize,
    pub min_tokens: Option<usize>,
    pub max_tokens: Option<usize>,
    pub mean_tokens: Option<f64>,
    pub median_tokens: Option<usize>,
}

impl BatchStats {
    pub fn from_entries(entries: &[BatchEntry]) -> Self {
        let mut counts: Vec<usize> = entries.iter().filter_map(BatchEntry::tokens).collect();
        counts.sort_unstable();

        let succeeded = counts.len();
        let total_tokens: usize = counts.iter().sum();
        let mean_tokens = if succeeded > 0 {
            Some(total_tokens as f64 / succeeded as f64)
        } else {
            None
        };

        Self {
            total_items: entries.len(),
            succeeded,
            failed: entries.len() - succeeded,
            oversized: entries.iter().filter(|e| e.is_oversized()).count(),
            total_tokens,
            min_tokens: counts.first().copied(),
            max_tokens: counts.last().copied(),
            mean_tokens,
            median_tokens: counts.get(succeeded / 2).copied(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub model: String,
    pub encoding: Option<String>,
    pub threshold: Option<usize>,
    pub text_form: TextForm,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<BatchEntry>,
    pub stats: BatchStats,
}

impl BatchReport {
    pub fn from_entries(
        model: impl Into<String>,
        encoding: Option<String>,
        threshold: Option<usize>,
        text_form: TextForm,
        entries: Vec<BatchEntry>,
    ) -> Self {
        let stats = BatchStats::from_entries(&entries);
        Self {
            model: model.into(),
            encoding,
            threshold,
            text_form,
            generated_at: Utc::now(),
            entries,
            stats,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| e.tokens().is_none())
    }
}

/// LLM output for one manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub path: String,
    pub model: String,
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DescriptionOutcome {
    Described {
        output_file: String,
        prompt_tokens: usize,
        generated_at: DateTime<Utc>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionEntry {
    pub path: String,
    #[serde(flatten)]
    pub outcome: DescriptionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionReport {
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub entries: Vec<DescriptionEntry>,
}

impl DescriptionReport {
    pub fn new(
        model: impl Into<String>,
        started_at: DateTime<Utc>,
        entries: Vec<DescriptionEntry>,
    ) -> Self {
        let succeeded = entries
            .iter()
            .filter(|e| matches!(e.outcome, DescriptionOutcome::Described { .. }))
            .count();
        Self {
            model: model.into(),
            started_at,
            finished_at: Utc::now(),
            succeeded,
            failed: entries.len() - succeeded,
            entries,
        }
    }
}

/// Described manifests carry their text alongside the report entry until
/// the load step writes them out.
#[derive(Debug, Clone)]
pub struct DescriptionBatch {
    pub started_at: DateTime<Utc>,
    pub descriptions: Vec<Description>,
    pub entries: Vec<DescriptionEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_over_two_counts() {
        let entries = vec![
            BatchEntry::counted("a.json", 120, false),
            BatchEntry::counted("b.json", 380, false),
        ];
        let stats = BatchStats::from_entries(&entries);

        assert_eq!(stats.min_tokens, Some(120));
        assert_eq!(stats.max_tokens, Some(380));
        assert_eq!(stats.mean_tokens, Some(250.0));
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.total_tokens, 500);
    }

    #[test]
    fn test_stats_undefined_when_nothing_counted() {
        let entries = vec![BatchEntry::failed(
            "bad.json",
            FailureKind::MalformedDocument,
            "expected value",
        )];
        let stats = BatchStats::from_entries(&entries);

        assert_eq!(stats.total_items, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.mean_tokens, None);
        assert_eq!(stats.min_tokens, None);
        assert_eq!(stats.max_tokens, None);

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json["mean_tokens"].is_null());
    }

    #[test]
    fn test_stats_ignore_failures_and_count_oversized() {
        let entries = vec![
            BatchEntry::counted("a.json", 10, false),
            BatchEntry::failed("b.json", FailureKind::Unreadable, "permission denied"),
            BatchEntry::counted("c.json", 1500, true),
            BatchEntry::counted("d.json", 30, false),
        ];
        let stats = BatchStats::from_entries(&entries);

        assert_eq!(stats.succeeded + stats.failed, 4);
        assert_eq!(stats.oversized, 1);
        assert_eq!(stats.min_tokens, Some(10));
        assert_eq!(stats.median_tokens, Some(30));
    }

    #[test]
    fn test_entry_serializes_flat() {
        let entry = BatchEntry::counted("a.json", 42, true);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "counted");
        assert_eq!(json["tokens"], 42);
        assert_eq!(json["oversized"], true);
    }
}
