//! Helpers for keeping prompts inside a token budget.

use crate::core::tokenizer::{count_with, Tokenizer};
use crate::domain::ports::ChatMessage;
use crate::utils::error::{AppError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-message framing overhead of the chat format.
const MESSAGE_OVERHEAD: usize = 4;
/// Every reply is primed with the assistant header.
const REPLY_PRIMING: usize = 2;

const KEY_LINE_MARKERS: &[&str] = &[
    "dataset name:",
    "description:",
    "keywords:",
    "creators:",
    "published:",
    "license:",
    "number of files:",
];

/// Keep the first `max_tokens` tokens of `text`. A cut that lands inside a
/// multibyte character backs off to the previous character boundary.
pub fn truncate_to_tokens(
    tokenizer: &Tokenizer,
    text: &str,
    max_tokens: usize,
    model: &str,
) -> Result<String> {
    let bpe = tokenizer.bpe_for_model(model)?;
    let tokens = bpe.encode_ordinary(text);
    if tokens.len() <= max_tokens {
        return Ok(text.to_string());
    }

    let offsets = token_offsets(
        tokens
            .iter()
            .map(|token| bpe._decode_native(std::slice::from_ref(token)).len()),
    );
    let end = floor_char_boundary(text, offsets[max_tokens]);
    Ok(text[..end].to_string())
}

/// Byte offset in the source text of every token boundary, including both
/// ends. Ordinary encoding is lossless, so token bytes concatenate back to
/// the text.
fn token_offsets(token_lengths: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut offsets = vec![0];
    let mut position = 0;
    for length in token_lengths {
        position += length;
        offsets.push(position);
    }
    offsets
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Split into windows of `chunk_size` tokens, each starting `overlap`
/// tokens before the end of the previous one. Window edges snap back to
/// character boundaries.
pub fn chunk_by_tokens(
    tokenizer: &Tokenizer,
    text: &str,
    chunk_size: usize,
    overlap: usize,
    model: &str,
) -> Result<Vec<String>> {
    if chunk_size == 0 || overlap >= chunk_size {
        return Err(AppError::InvalidConfigValueError {
            field: "chunk_size".to_string(),
            value: format!("{} (overlap {})", chunk_size, overlap),
            reason: "chunk size must be positive and larger than the overlap".to_string(),
        });
    }

    let bpe = tokenizer.bpe_for_model(model)?;
    let tokens = bpe.encode_ordinary(text);
    let mut chunks = Vec::new();

    let offsets = token_offsets(
        tokens
            .iter()
            .map(|token| bpe._decode_native(std::slice::from_ref(token)).len()),
    );

    let mut start = 0;
    while start < tokens.len() {
        let end = (start + chunk_size).min(tokens.len());
        let from = floor_char_boundary(text, offsets[start]);
        let to = floor_char_boundary(text, offsets[end]);
        // 整段落在同一個多位元組字元內時，交給下一段
        if to > from {
            chunks.push(text[from..to].to_string());
        }

        if end == tokens.len() {
            break;
        }
        start = end - overlap;
    }

    Ok(chunks)
}

pub fn estimate_prompt_tokens(
    tokenizer: &Tokenizer,
    messages: &[ChatMessage],
    model: &str,
) -> Result<usize> {
    let bpe = tokenizer.bpe_for_model(model)?;
    let total = messages
        .iter()
        .map(|m| {
            count_with(&bpe, &m.content)
                + MESSAGE_OVERHEAD
                + m.name.as_deref().map(|n| count_with(&bpe, n)).unwrap_or(0)
        })
        .sum::<usize>();
    Ok(total + REPLY_PRIMING)
}

/// Shrink a manifest digest to `max_tokens`: key lines first, then the
/// remaining lines in order while they fit, then a hard cut.
pub fn fit_to_budget(
    tokenizer: &Tokenizer,
    text: &str,
    max_tokens: usize,
    model: &str,
) -> Result<String> {
    let bpe = tokenizer.bpe_for_model(model)?;
    if count_with(&bpe, text) <= max_tokens {
        return Ok(text.to_string());
    }

    let (key_lines, other_lines): (Vec<&str>, Vec<&str>) = text.lines().partition(|line| {
        let lower = line.to_lowercase();
        KEY_LINE_MARKERS.iter().any(|marker| lower.contains(marker))
    });

    let mut kept = key_lines;
    for line in other_lines {
        kept.push(line);
        if count_with(&bpe, &kept.join("\n")) > max_tokens {
            kept.pop();
            break;
        }
    }

    let fitted = kept.join("\n");
    if count_with(&bpe, &fitted) > max_tokens {
        return truncate_to_tokens(tokenizer, &fitted, max_tokens, model);
    }
    Ok(fitted)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetSummary {
    pub total_budget: usize,
    pub used_tokens: usize,
    pub remaining_tokens: usize,
    pub utilization_percent: f64,
    pub allocations: BTreeMap<String, usize>,
}

/// Named allocations against a fixed token total.
#[derive(Debug, Clone)]
pub struct TokenBudget {
    total: usize,
    used: usize,
    allocations: BTreeMap<String, usize>,
}

impl TokenBudget {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            used: 0,
            allocations: BTreeMap::new(),
        }
    }

    /// Returns false and leaves the budget untouched when it would overflow.
    pub fn allocate(&mut self, component: impl Into<String>, tokens: usize) -> bool {
        if self.used + tokens > self.total {
            return false;
        }
        *self.allocations.entry(component.into()).or_insert(0) += tokens;
        self.used += tokens;
        true
    }

    pub fn remaining(&self) -> usize {
        self.total - self.used
    }

    pub fn allocation(&self, component: &str) -> usize {
        self.allocations.get(component).copied().unwrap_or(0)
    }

    pub fn can_fit(&self, tokenizer: &Tokenizer, text: &str, model: &str) -> Result<bool> {
        Ok(tokenizer.estimate(text, model)?.tokens <= self.remaining())
    }

    pub fn summary(&self) -> BudgetSummary {
        let utilization_percent = if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        };
        BudgetSummary {
            total_budget: self.total,
            used_tokens: self.used,
            remaining_tokens: self.remaining(),
            utilization_percent,
            allocations: self.allocations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "gpt-4";

    fn long_text() -> String {
        (0..50)
            .map(|i| format!("line {} describes one of the files in the crate", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_truncate_to_tokens() {
        let tokenizer = Tokenizer::default();
        let text = long_text();

        let short = truncate_to_tokens(&tokenizer, &text, 20, MODEL).unwrap();
        assert!(tokenizer.estimate(&short, MODEL).unwrap().tokens <= 20);
        assert!(text.starts_with(&short));

        let untouched = truncate_to_tokens(&tokenizer, "short text", 20, MODEL).unwrap();
        assert_eq!(untouched, "short text");
    }

    #[test]
    fn test_chunk_by_tokens_covers_text() {
        let tokenizer = Tokenizer::default();
        let text = long_text();
        let total = tokenizer.estimate(&text, MODEL).unwrap().tokens;

        let chunks = chunk_by_tokens(&tokenizer, &text, 100, 0, MODEL).unwrap();
        assert_eq!(chunks.len(), total.div_ceil(100));
        assert_eq!(chunks.concat(), text);
    }

    const MULTIBYTE: &str = "Datensatz über Klimadaten 🌍🌍🌍 東京の気象観測データ";

    #[test]
    fn test_truncate_multibyte_text_at_every_cut() {
        let tokenizer = Tokenizer::default();
        let total = tokenizer.estimate(MULTIBYTE, MODEL).unwrap().tokens;

        let mut previous = 0;
        for max_tokens in 0..total {
            let short = truncate_to_tokens(&tokenizer, MULTIBYTE, max_tokens, MODEL).unwrap();
            assert!(MULTIBYTE.starts_with(&short));
            assert!(short.len() >= previous);
            previous = short.len();
        }
        assert_eq!(
            truncate_to_tokens(&tokenizer, MULTIBYTE, total, MODEL).unwrap(),
            MULTIBYTE
        );
    }

    #[test]
    fn test_chunk_multibyte_text() {
        let tokenizer = Tokenizer::default();

        for size in 1..6 {
            let chunks = chunk_by_tokens(&tokenizer, MULTIBYTE, size, 0, MODEL).unwrap();
            assert!(!chunks.is_empty());
            assert_eq!(chunks.concat(), MULTIBYTE);
        }

        let overlapping = chunk_by_tokens(&tokenizer, MULTIBYTE, 3, 1, MODEL).unwrap();
        assert!(overlapping.iter().all(|chunk| MULTIBYTE.contains(chunk.as_str())));
        assert!(overlapping.last().unwrap().ends_with("データ"));
    }

    #[test]
    fn test_chunk_overlap_must_be_smaller() {
        let tokenizer = Tokenizer::default();
        assert!(chunk_by_tokens(&tokenizer, "abc", 10, 10, MODEL).is_err());
        assert!(chunk_by_tokens(&tokenizer, "abc", 0, 0, MODEL).is_err());
        assert!(chunk_by_tokens(&tokenizer, "", 10, 2, MODEL).unwrap().is_empty());
    }

    #[test]
    fn test_prompt_overhead() {
        let tokenizer = Tokenizer::default();
        let messages = vec![ChatMessage::system(""), ChatMessage::user("")];
        assert_eq!(estimate_prompt_tokens(&tokenizer, &messages, MODEL).unwrap(), 10);
    }

    #[test]
    fn test_fit_to_budget_keeps_key_lines() {
        let tokenizer = Tokenizer::default();
        let text = format!(
            "{}\nDataset Name: Ocean salinity\nLicense: CC-BY-4.0",
            long_text()
        );

        let fitted = fit_to_budget(&tokenizer, &text, 60, MODEL).unwrap();
        assert!(tokenizer.estimate(&fitted, MODEL).unwrap().tokens <= 60);
        assert!(fitted.starts_with("Dataset Name: Ocean salinity\nLicense: CC-BY-4.0"));
    }

    #[test]
    fn test_budget_allocation() {
        let mut budget = TokenBudget::new(100);
        assert!(budget.allocate("system", 30));
        assert!(budget.allocate("manifest", 60));
        assert!(!budget.allocate("examples", 20));

        assert_eq!(budget.remaining(), 10);
        assert_eq!(budget.allocation("manifest"), 60);
        assert_eq!(budget.allocation("examples"), 0);

        let summary = budget.summary();
        assert_eq!(summary.used_tokens, 90);
        assert_eq!(summary.utilization_percent, 90.0);

        let tokenizer = Tokenizer::default();
        assert!(budget.can_fit(&tokenizer, "hi", MODEL).unwrap());
    }
}
