//! # Trocear
//!
//! Subword tokenizer processor: turns raw text into subword pieces and ids,
//! and reconstructs text from them, while preserving a byte-exact alignment
//! between every emitted piece and the original input.
//!
//! Trocear (Spanish: "to cut into pieces") is the runtime side of a trained
//! subword model: it consumes a model artifact and drives normalization,
//! segmentation, byte fallback, run-length piece compression and
//! denormalization. Training is out of scope.
//!
//! ## Features
//!
//! - **Offset-true encoding**: every piece carries the `[begin, end)` byte
//!   span of the original input it covers, across charmap rewrites,
//!   whitespace escaping and the dummy prefix
//! - **Four kernel families**: unigram (Viterbi, n-best, sampling), BPE,
//!   word and character, selected by the artifact
//! - **Byte fallback**: out-of-vocabulary text decomposes into `<0xXX>`
//!   pieces and reassembles as UTF-8 on decode, U+FFFD for invalid bytes
//! - **Run-length piece compression**: repeated pieces fold into a compact
//!   `(#startrepeat) … (#endrepeat)` form and unfold symmetrically
//! - **Vocabulary constraints**: restrict segmentation to an allow-set
//!   without reloading the artifact
//!
//! ## Example
//!
//! ```rust
//! use trocear::{ModelArtifact, PieceType, Processor, VocabPiece};
//!
//! let artifact = ModelArtifact {
//!     pieces: vec![
//!         VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
//!         VocabPiece::normal("\u{2581}He", -1.0),
//!         VocabPiece::normal("llo", -1.5),
//!     ],
//!     ..ModelArtifact::default()
//! };
//! let processor = Processor::from_artifact(artifact).unwrap();
//!
//! let pieces = processor.encode_pieces("Hello").unwrap();
//! assert_eq!(pieces, vec!["\u{2581}He", "llo"]);
//!
//! let text = processor.decode_pieces(&pieces).unwrap();
//! assert_eq!(text, "Hello");
//! ```
//!
//! ## Concurrency
//!
//! A [`Processor`] is logically immutable once constructed: every encode and
//! decode operation takes `&self` and is safe to call from multiple threads.
//! Reconfiguration (vocabulary constraints, extra options, encoder version)
//! takes `&mut self`; quiesce readers first.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Offset arithmetic compares byte positions all over; the lint noise
// outweighs the casts it would catch.
#![allow(clippy::cast_possible_truncation)]

pub mod artifact;
pub mod error;
pub mod model;
pub mod normalizer;
pub mod processor;
pub mod rle;
pub mod text;

// Re-exports for convenience
pub use artifact::{
    DenormalizerSpec, ModelArtifact, ModelType, NormalizerSpec, PieceType, SelfTestSample,
    TrainerSpec, VocabPiece,
};
pub use error::{Result, TrocearError};
pub use model::{EncoderVersion, SubwordModel};
pub use normalizer::{Normalizer, PrefixMatcher, SPACE_SYMBOL};
pub use processor::{ExtraOption, Processor};
pub use text::{NBestTokenizedText, PieceRecord, TokenizedText};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.contains('.'));
    }
}
