//! Character segmentation kernel
//!
//! One piece per codepoint of the normalized text.

use crate::error::Result;
use crate::model::{EncodeResult, SubwordModel, Vocab};

/// Per-codepoint kernel
#[derive(Debug, Clone)]
pub struct CharModel {
    vocab: Vocab,
}

impl CharModel {
    /// Wrap a vocabulary table
    #[must_use]
    pub fn new(vocab: Vocab) -> Self {
        Self { vocab }
    }
}

impl SubwordModel for CharModel {
    fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn vocab_mut(&mut self) -> &mut Vocab {
        &mut self.vocab
    }

    fn encode(&self, normalized: &str) -> Result<EncodeResult> {
        let result = normalized
            .chars()
            .map(|ch| {
                let text = ch.to_string();
                match self.vocab.lookup(&text).filter(|&id| self.vocab.is_matchable(id)) {
                    Some(id) => (text, id),
                    None => (text, self.vocab.unk_id()),
                }
            })
            .collect();
        Ok(result)
    }
}
