//! Tokenized-text envelopes
//!
//! Structured results emitted by the processor: each piece with its id, the
//! surface it covers in the source text, and the half-open byte range
//! `[begin, end)` of that surface. Envelopes serialize to JSON bytes for the
//! serialized variants of the encode/decode API.

use serde::{Deserialize, Serialize};

/// A single emitted piece with its source alignment
///
/// Invariants maintained by the processor:
/// - control pieces have `begin == end` and an empty surface;
/// - for all other pieces `surface` equals the source substring
///   `[begin, end)`, except byte-fallback intermediates which carry an empty
///   surface while the last byte of the codepoint carries the full one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PieceRecord {
    /// Piece text as it appears in the vocabulary
    pub piece: String,
    /// Vocabulary id
    pub id: u32,
    /// Source substring covered by this piece
    pub surface: String,
    /// Start byte offset into the source text
    pub begin: usize,
    /// End byte offset into the source text (exclusive)
    pub end: usize,
}

/// A tokenization of one input text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TokenizedText {
    /// The source text the offsets refer to
    pub text: String,
    /// Emitted pieces in order
    pub pieces: Vec<PieceRecord>,
    /// Model score of this segmentation, for n-best results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl TokenizedText {
    /// Piece texts in order
    #[must_use]
    pub fn piece_texts(&self) -> Vec<String> {
        self.pieces.iter().map(|p| p.piece.clone()).collect()
    }

    /// Piece ids in order
    #[must_use]
    pub fn piece_ids(&self) -> Vec<u32> {
        self.pieces.iter().map(|p| p.id).collect()
    }

    /// Serialize the envelope; empty bytes on failure
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Ranked alternative tokenizations of one input text
///
/// Ordering is the model's, best first, and is stable with respect to the
/// model's scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NBestTokenizedText {
    /// Alternatives, best first
    pub nbests: Vec<TokenizedText>,
}

impl NBestTokenizedText {
    /// Serialize the envelope; empty bytes on failure
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}
