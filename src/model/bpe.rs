//! BPE segmentation kernel
//!
//! Greedy pair merging driven by vocabulary scores: starting from single
//! codepoints, the adjacent pair whose concatenation is the best-scored
//! in-vocabulary piece merges first, until no mergeable pair remains.

use crate::error::Result;
use crate::model::{EncodeResult, SubwordModel, Vocab};

/// Byte-pair-encoding kernel
#[derive(Debug, Clone)]
pub struct BpeModel {
    vocab: Vocab,
}

impl BpeModel {
    /// Wrap a vocabulary table
    #[must_use]
    pub fn new(vocab: Vocab) -> Self {
        Self { vocab }
    }

    /// Id of the best-scored mergeable piece spelled by `text`, if any
    fn mergeable(&self, text: &str) -> Option<u32> {
        self.vocab
            .lookup(text)
            .filter(|&id| self.vocab.is_matchable(id))
    }
}

impl SubwordModel for BpeModel {
    fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn vocab_mut(&mut self) -> &mut Vocab {
        &mut self.vocab
    }

    fn encode(&self, normalized: &str) -> Result<EncodeResult> {
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        // Symbols are byte spans over the normalized input, one codepoint
        // each to start with.
        let mut symbols: Vec<(usize, usize)> = Vec::new();
        let mut pos = 0;
        for ch in normalized.chars() {
            symbols.push((pos, pos + ch.len_utf8()));
            pos += ch.len_utf8();
        }

        loop {
            let mut best: Option<(usize, f32)> = None;
            for i in 0..symbols.len().saturating_sub(1) {
                let merged = &normalized[symbols[i].0..symbols[i + 1].1];
                if let Some(id) = self.mergeable(merged) {
                    let score = self.vocab.score(id);
                    let better = best.is_none() || best.is_some_and(|(_, s)| score > s);
                    if better {
                        best = Some((i, score));
                    }
                }
            }
            let Some((i, _)) = best else {
                break;
            };
            symbols[i] = (symbols[i].0, symbols[i + 1].1);
            symbols.remove(i + 1);
        }

        let result = symbols
            .into_iter()
            .map(|(begin, end)| {
                let text = &normalized[begin..end];
                match self.mergeable(text) {
                    Some(id) => (text.to_string(), id),
                    None => (text.to_string(), self.vocab.unk_id()),
                }
            })
            .collect();
        Ok(result)
    }
}
