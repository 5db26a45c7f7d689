//! Whole-word segmentation kernel
//!
//! Splits normalized text at meta-space boundaries and looks each word up as
//! a single piece. Out-of-vocabulary words surface as unknown pieces
//! carrying their own spelling.

use crate::error::Result;
use crate::model::{EncodeResult, SubwordModel, Vocab};
use crate::normalizer::SPACE_SYMBOL;

/// Word-lookup kernel
#[derive(Debug, Clone)]
pub struct WordModel {
    vocab: Vocab,
}

impl WordModel {
    /// Wrap a vocabulary table
    #[must_use]
    pub fn new(vocab: Vocab) -> Self {
        Self { vocab }
    }
}

impl SubwordModel for WordModel {
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

        // A word starts at the beginning of input and at every meta-space.
        let mut starts = vec![];
        for (idx, _) in normalized.match_indices(SPACE_SYMBOL) {
            if idx > 0 {
                starts.push(idx);
            }
        }
        let mut bounds = vec![0];
        bounds.extend(starts);
        bounds.push(normalized.len());

        let result = bounds
            .windows(2)
            .filter(|w| w[0] < w[1])
            .map(|w| {
                let word = &normalized[w[0]..w[1]];
                match self.vocab.lookup(word).filter(|&id| self.vocab.is_matchable(id)) {
                    Some(id) => (word.to_string(), id),
                    None => (word.to_string(), self.vocab.unk_id()),
                }
            })
            .collect();
        Ok(result)
    }
}
