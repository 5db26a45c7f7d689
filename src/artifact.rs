//! Model artifact schema
//!
//! The trained-model artifact consumed by the [`Processor`](crate::Processor):
//! the piece inventory with scores and types, the normalizer/denormalizer
//! specs, the trainer spec, and optional self-test samples. Artifacts are
//! serialized as JSON and can be loaded from a file, from raw bytes, or
//! passed in already parsed.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrocearError};

/// Classification of a vocabulary piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PieceType {
    /// Regular subword piece
    #[default]
    Normal,
    /// The unknown piece (`<unk>`)
    Unknown,
    /// Control piece with no surface (`<s>`, `</s>`, `<pad>`)
    Control,
    /// Caller-reserved symbol, matched atomically and never normalized
    UserDefined,
    /// Excluded from segmentation by a vocabulary constraint
    Unused,
    /// One of the 256 byte-fallback pieces (`<0x00>`..`<0xFF>`)
    Byte,
}

/// A single vocabulary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabPiece {
    /// Piece text, with whitespace carried as U+2581
    pub piece: String,
    /// Log probability assigned by training
    #[serde(default)]
    pub score: f32,
    /// Piece classification
    #[serde(default)]
    pub kind: PieceType,
}

impl VocabPiece {
    /// Create a normal piece with the given score
    #[must_use]
    pub fn normal(piece: impl Into<String>, score: f32) -> Self {
        Self {
            piece: piece.into(),
            score,
            kind: PieceType::Normal,
        }
    }

    /// Create a piece of an explicit type
    #[must_use]
    pub fn typed(piece: impl Into<String>, score: f32, kind: PieceType) -> Self {
        Self {
            piece: piece.into(),
            score,
            kind,
        }
    }
}

/// Subword model family the artifact was trained for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Unigram language model segmentation (Viterbi over piece scores)
    #[default]
    Unigram,
    /// Byte-pair-encoding style greedy merging
    Bpe,
    /// Whole-word lookup delimited by the meta-space marker
    Word,
    /// One piece per codepoint
    Char,
}

fn default_true() -> bool {
    true
}

/// Normalization policy applied before segmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerSpec {
    /// Rewrite rules, applied longest-source-first
    #[serde(default)]
    pub char_map: Vec<(String, String)>,
    /// Prepend a single whitespace to the input (or append in suffix mode)
    #[serde(default = "default_true")]
    pub add_dummy_prefix: bool,
    /// Trim and collapse consecutive whitespace
    #[serde(default = "default_true")]
    pub remove_extra_whitespaces: bool,
    /// Rewrite ASCII space to the meta-space marker U+2581
    #[serde(default = "default_true")]
    pub escape_whitespaces: bool,
    /// Treat whitespace as a suffix of the preceding word instead of a prefix
    #[serde(default)]
    pub treat_whitespace_as_suffix: bool,
}

impl Default for NormalizerSpec {
    fn default() -> Self {
        Self {
            char_map: Vec::new(),
            add_dummy_prefix: true,
            remove_extra_whitespaces: true,
            escape_whitespaces: true,
            treat_whitespace_as_suffix: false,
        }
    }
}

/// Inverse rewrite rules applied after decoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DenormalizerSpec {
    /// Rewrite rules, applied longest-source-first
    #[serde(default)]
    pub char_map: Vec<(String, String)>,
}

fn default_unk_piece() -> String {
    "<unk>".to_string()
}

fn default_bos_piece() -> String {
    "<s>".to_string()
}

fn default_eos_piece() -> String {
    "</s>".to_string()
}

fn default_pad_piece() -> String {
    "<pad>".to_string()
}

/// Training-time parameters the processor consults at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSpec {
    /// Which kernel family to instantiate
    #[serde(default)]
    pub model_type: ModelType,
    /// Visible replacement for decoded unknown pieces; `None` selects " ⁇ "
    #[serde(default)]
    pub unk_surface: Option<String>,
    /// Spelling of the unknown piece
    #[serde(default = "default_unk_piece")]
    pub unk_piece: String,
    /// Spelling of the beginning-of-sentence piece
    #[serde(default = "default_bos_piece")]
    pub bos_piece: String,
    /// Spelling of the end-of-sentence piece
    #[serde(default = "default_eos_piece")]
    pub eos_piece: String,
    /// Spelling of the padding piece
    #[serde(default = "default_pad_piece")]
    pub pad_piece: String,
    /// Decompose out-of-vocabulary text into byte pieces instead of `<unk>`
    #[serde(default)]
    pub byte_fallback: bool,
}

impl Default for TrainerSpec {
    fn default() -> Self {
        Self {
            model_type: ModelType::Unigram,
            unk_surface: None,
            unk_piece: default_unk_piece(),
            bos_piece: default_bos_piece(),
            eos_piece: default_eos_piece(),
            pad_piece: default_pad_piece(),
            byte_fallback: false,
        }
    }
}

/// A `(input, expected)` pair verified at load time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfTestSample {
    /// Raw input text
    pub input: String,
    /// Expected encoded pieces, joined by a single space
    pub expected: String,
}

/// The trained model artifact
///
/// Owned exclusively by the processor after load. All segmentation state
/// (vocabulary, normalization policy, self tests) lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelArtifact {
    /// Piece inventory; index is the piece id
    pub pieces: Vec<VocabPiece>,
    /// Trainer parameters
    #[serde(default)]
    pub trainer: TrainerSpec,
    /// Normalization policy
    #[serde(default)]
    pub normalizer: NormalizerSpec,
    /// Optional inverse rewrite applied after decoding
    #[serde(default)]
    pub denormalizer: Option<DenormalizerSpec>,
    /// Load-time verification samples
    #[serde(default)]
    pub self_test: Vec<SelfTestSample>,
}

impl ModelArtifact {
    /// Parse an artifact from serialized bytes
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::Internal`] if the bytes are not a valid
    /// serialized artifact.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| TrocearError::internal(format!("could not parse model artifact: {e}")))
    }

    /// Read and parse an artifact from a file
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::NotFound`] if the path is empty or the file
    /// does not exist, [`TrocearError::Internal`] on read or parse failures.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(TrocearError::NotFound {
                path: String::new(),
            });
        }
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TrocearError::NotFound {
                    path: path.display().to_string(),
                }
            } else {
                TrocearError::internal(format!("could not read {}: {e}", path.display()))
            }
        })?;
        Self::from_bytes(&bytes)
    }

    /// Serialize the artifact
    ///
    /// Returns empty bytes if serialization fails.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_artifact() -> ModelArtifact {
        ModelArtifact {
            pieces: vec![
                VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
                VocabPiece::typed("<s>", 0.0, PieceType::Control),
                VocabPiece::typed("</s>", 0.0, PieceType::Control),
                VocabPiece::normal("\u{2581}He", -1.0),
                VocabPiece::normal("llo", -1.5),
            ],
            ..ModelArtifact::default()
        }
    }

    #[test]
    fn test_artifact_roundtrip() {
        let artifact = sample_artifact();
        let bytes = artifact.to_bytes();
        let parsed = ModelArtifact::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, artifact);
    }

    #[test]
    fn test_artifact_from_bytes_invalid() {
        let result = ModelArtifact::from_bytes(b"not json");
        assert!(matches!(result, Err(TrocearError::Internal { .. })));
    }

    #[test]
    fn test_artifact_empty_path_not_found() {
        let result = ModelArtifact::from_file("");
        assert_eq!(
            result,
            Err(TrocearError::NotFound {
                path: String::new()
            })
        );
    }

    #[test]
    fn test_artifact_missing_file_not_found() {
        let result = ModelArtifact::from_file("/no/such/model.json");
        assert!(matches!(result, Err(TrocearError::NotFound { .. })));
    }

    #[test]
    fn test_normalizer_spec_defaults() {
        let spec = NormalizerSpec::default();
        assert!(spec.add_dummy_prefix);
        assert!(spec.remove_extra_whitespaces);
        assert!(spec.escape_whitespaces);
        assert!(!spec.treat_whitespace_as_suffix);
        assert!(spec.char_map.is_empty());
    }

    #[test]
    fn test_trainer_spec_defaults() {
        let spec = TrainerSpec::default();
        assert_eq!(spec.model_type, ModelType::Unigram);
        assert_eq!(spec.unk_piece, "<unk>");
        assert_eq!(spec.bos_piece, "<s>");
        assert_eq!(spec.eos_piece, "</s>");
        assert_eq!(spec.pad_piece, "<pad>");
        assert!(spec.unk_surface.is_none());
        assert!(!spec.byte_fallback);
    }

    #[test]
    fn test_sparse_json_uses_defaults() {
        let json = br#"{"pieces":[{"piece":"<unk>","kind":"unknown"}]}"#;
        let artifact = ModelArtifact::from_bytes(json).unwrap();
        assert_eq!(artifact.pieces.len(), 1);
        assert_eq!(artifact.pieces[0].kind, PieceType::Unknown);
        assert!((artifact.pieces[0].score - 0.0).abs() < f32::EPSILON);
        assert!(artifact.normalizer.add_dummy_prefix);
        assert!(artifact.denormalizer.is_none());
        assert!(artifact.self_test.is_empty());
    }

    #[test]
    fn test_piece_type_serialization_names() {
        let json = serde_json::to_string(&PieceType::UserDefined).unwrap();
        assert_eq!(json, r#""user_defined""#);
    }
}
