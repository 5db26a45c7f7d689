//! Subword model kernels
//!
//! The processor drives segmentation through the [`SubwordModel`] capability
//! trait; concrete kernels are selected by the artifact's
//! [`ModelType`](crate::artifact::ModelType):
//!
//! - [`UnigramModel`]: Viterbi segmentation over piece scores, with n-best
//!   and sampling support
//! - [`BpeModel`]: greedy score-driven pair merging
//! - [`WordModel`]: whole-word lookup delimited by the meta-space marker
//! - [`CharModel`]: one piece per codepoint
//!
//! All kernels share the [`Vocab`] table built from the artifact's piece
//! inventory.

mod bpe;
mod chars;
mod unigram;
mod word;

use std::collections::HashMap;

use rand::RngCore;

use crate::artifact::{ModelArtifact, ModelType, PieceType, VocabPiece};
use crate::error::{Result, TrocearError};

pub use bpe::BpeModel;
pub use chars::CharModel;
pub use unigram::UnigramModel;
pub use word::WordModel;

/// One segmentation: `(piece text, id)` pairs in order
pub type EncodeResult = Vec<(String, u32)>;

/// A segmentation with its model score
pub type ScoredEncodeResult = (EncodeResult, f32);

/// Encoder implementation selector
///
/// Kernels may ship more than one encoder for the same segmentation
/// semantics; both versions must produce identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderVersion {
    /// The tuned default encoder
    #[default]
    Optimized,
    /// The reference encoder
    Original,
}

/// Spelling of the byte-fallback piece for `b`, e.g. `<0xFF>`
#[must_use]
pub fn byte_to_piece(b: u8) -> String {
    format!("<0x{b:02X}>")
}

/// Inverse of [`byte_to_piece`]; `None` if `piece` is not a byte piece spelling
#[must_use]
pub fn piece_to_byte(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// Vocabulary table shared by all kernels
///
/// Holds the piece inventory with types and scores, the reverse id map, the
/// trainer's special-piece spellings and the encoder version.
#[derive(Debug, Clone)]
pub struct Vocab {
    pieces: Vec<VocabPiece>,
    piece_to_id: HashMap<String, u32>,
    unk_id: u32,
    byte_fallback: bool,
    unk_piece: String,
    bos_piece: String,
    eos_piece: String,
    pad_piece: String,
    encoder_version: EncoderVersion,
    max_piece_len: usize,
    min_score: f32,
}

impl Vocab {
    /// Build the table from an artifact
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::Internal`] if the inventory is empty, holds a
    /// duplicate or empty piece, defines no unknown piece, or enables byte
    /// fallback without all 256 byte pieces.
    pub fn build(artifact: &ModelArtifact) -> Result<Self> {
        if artifact.pieces.is_empty() {
            return Err(TrocearError::internal("vocabulary cannot be empty"));
        }

        let mut piece_to_id = HashMap::with_capacity(artifact.pieces.len());
        let mut unk_id = None;
        for (id, piece) in artifact.pieces.iter().enumerate() {
            if piece.piece.is_empty() {
                return Err(TrocearError::internal(format!("piece {id} is empty")));
            }
            let id = u32::try_from(id)
                .map_err(|_| TrocearError::internal(format!("piece id {id} exceeds u32 limit")))?;
            if piece_to_id.insert(piece.piece.clone(), id).is_some() {
                return Err(TrocearError::internal(format!(
                    "duplicate piece: {}",
                    piece.piece
                )));
            }
            if piece.kind == PieceType::Unknown && unk_id.is_none() {
                unk_id = Some(id);
            }
        }

        let unk_id = unk_id
            .ok_or_else(|| TrocearError::internal("vocabulary must define an unknown piece"))?;

        let byte_fallback = artifact.trainer.byte_fallback;
        if byte_fallback {
            for b in 0..=u8::MAX {
                let spelling = byte_to_piece(b);
                let ok = piece_to_id
                    .get(&spelling)
                    .is_some_and(|&id| artifact.pieces[id as usize].kind == PieceType::Byte);
                if !ok {
                    return Err(TrocearError::internal(format!(
                        "byte fallback requires byte piece {spelling}"
                    )));
                }
            }
        }

        let max_piece_len = artifact
            .pieces
            .iter()
            .map(|p| p.piece.len())
            .max()
            .unwrap_or(0);
        let min_score = artifact
            .pieces
            .iter()
            .filter(|p| p.kind == PieceType::Normal)
            .map(|p| p.score)
            .fold(f32::INFINITY, f32::min);
        let min_score = if min_score.is_finite() { min_score } else { 0.0 };

        Ok(Self {
            pieces: artifact.pieces.clone(),
            piece_to_id,
            unk_id,
            byte_fallback,
            unk_piece: artifact.trainer.unk_piece.clone(),
            bos_piece: artifact.trainer.bos_piece.clone(),
            eos_piece: artifact.trainer.eos_piece.clone(),
            pad_piece: artifact.trainer.pad_piece.clone(),
            encoder_version: EncoderVersion::default(),
            max_piece_len,
            min_score,
        })
    }

    /// Number of pieces
    #[must_use]
    pub fn size(&self) -> usize {
        self.pieces.len()
    }

    /// Id for `piece`; the unknown id when out of vocabulary
    #[must_use]
    pub fn piece_to_id(&self, piece: &str) -> u32 {
        self.piece_to_id.get(piece).copied().unwrap_or(self.unk_id)
    }

    /// Id for `piece` only if it is in the vocabulary
    #[must_use]
    pub fn lookup(&self, piece: &str) -> Option<u32> {
        self.piece_to_id.get(piece).copied()
    }

    /// Piece text for `id`; empty for out-of-range ids
    #[must_use]
    pub fn id_to_piece(&self, id: u32) -> &str {
        self.pieces
            .get(id as usize)
            .map_or("", |p| p.piece.as_str())
    }

    /// Score for `id`; `0.0` for out-of-range ids
    #[must_use]
    pub fn score(&self, id: u32) -> f32 {
        self.pieces.get(id as usize).map_or(0.0, |p| p.score)
    }

    /// Type of `id`, if in range
    #[must_use]
    pub fn piece_type(&self, id: u32) -> Option<PieceType> {
        self.pieces.get(id as usize).map(|p| p.kind)
    }

    /// The unknown id
    #[must_use]
    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    /// Lowest score among normal pieces; `0.0` when there are none
    #[must_use]
    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    /// Longest piece spelling in bytes
    #[must_use]
    pub fn max_piece_len(&self) -> usize {
        self.max_piece_len
    }

    /// Whether `id` may start or extend a segmentation match
    ///
    /// Control, unknown, unused and byte pieces never participate in
    /// segmentation; byte pieces enter only through fallback expansion.
    #[must_use]
    pub fn is_matchable(&self, id: u32) -> bool {
        matches!(
            self.piece_type(id),
            Some(PieceType::Normal | PieceType::UserDefined)
        )
    }

    /// Spellings of all user-defined pieces
    #[must_use]
    pub fn user_defined_pieces(&self) -> Vec<String> {
        self.pieces
            .iter()
            .filter(|p| p.kind == PieceType::UserDefined)
            .map(|p| p.piece.clone())
            .collect()
    }
}

/// Capability interface every kernel implements
///
/// Provided methods delegate to the shared [`Vocab`]; kernels implement the
/// segmentation entry points and advertise the optional capabilities they
/// support.
pub trait SubwordModel: Send + Sync {
    /// The shared vocabulary table
    fn vocab(&self) -> &Vocab;

    /// Mutable access to the shared vocabulary table
    fn vocab_mut(&mut self) -> &mut Vocab;

    /// Segment normalized text into `(piece, id)` pairs
    ///
    /// # Errors
    ///
    /// Kernel-specific; the shipped kernels never fail here.
    fn encode(&self, normalized: &str) -> Result<EncodeResult>;

    /// Up to `n` best segmentations with scores, best first
    ///
    /// # Errors
    ///
    /// Fails unless the kernel advertises [`SubwordModel::nbest_available`].
    fn nbest_encode(&self, _normalized: &str, _n: usize) -> Result<Vec<ScoredEncodeResult>> {
        Err(TrocearError::internal(
            "NBestEncode is not available for the current model",
        ))
    }

    /// Draw one segmentation with scores flattened by `alpha`
    ///
    /// # Errors
    ///
    /// Fails unless the kernel advertises [`SubwordModel::sample_available`].
    fn sample_encode(
        &self,
        _normalized: &str,
        _alpha: f32,
        _rng: &mut dyn RngCore,
    ) -> Result<EncodeResult> {
        Err(TrocearError::internal(
            "SampleEncode is not available for the current model",
        ))
    }

    /// Whether [`SubwordModel::nbest_encode`] is supported
    fn nbest_available(&self) -> bool {
        false
    }

    /// Whether [`SubwordModel::sample_encode`] is supported
    fn sample_available(&self) -> bool {
        false
    }

    /// Self-test equivalence of an expected and an actual encode output
    ///
    /// Both arguments are piece sequences joined by single spaces. The
    /// default is byte equality; kernels with score-equivalent segmentations
    /// may override.
    fn verify_outputs_equivalent(&self, expected: &str, actual: &str) -> bool {
        expected == actual
    }

    /// Number of pieces
    fn piece_size(&self) -> usize {
        self.vocab().size()
    }

    /// Id for `piece`; the unknown id when out of vocabulary
    fn piece_to_id(&self, piece: &str) -> u32 {
        self.vocab().piece_to_id(piece)
    }

    /// Piece text for `id`; empty for out-of-range ids
    fn id_to_piece(&self, id: u32) -> &str {
        self.vocab().id_to_piece(id)
    }

    /// Score for `id`; `0.0` for out-of-range ids
    fn score(&self, id: u32) -> f32 {
        self.vocab().score(id)
    }

    /// Whether `id` is a control piece
    fn is_control(&self, id: u32) -> bool {
        self.vocab().piece_type(id) == Some(PieceType::Control)
    }

    /// Whether `id` is the unknown piece
    fn is_unknown(&self, id: u32) -> bool {
        self.vocab().piece_type(id) == Some(PieceType::Unknown)
    }

    /// Whether `id` is masked out by a vocabulary constraint
    fn is_unused(&self, id: u32) -> bool {
        self.vocab().piece_type(id) == Some(PieceType::Unused)
    }

    /// Whether `id` is a byte-fallback piece
    fn is_byte(&self, id: u32) -> bool {
        self.vocab().piece_type(id) == Some(PieceType::Byte)
    }

    /// Whether `id` is a user-defined symbol
    fn is_user_defined(&self, id: u32) -> bool {
        self.vocab().piece_type(id) == Some(PieceType::UserDefined)
    }

    /// Whether unknown spans decompose into byte pieces
    fn byte_fallback_enabled(&self) -> bool {
        self.vocab().byte_fallback
    }

    /// Spelling of the unknown piece
    fn unk_piece(&self) -> &str {
        &self.vocab().unk_piece
    }

    /// Spelling of the beginning-of-sentence piece
    fn bos_piece(&self) -> &str {
        &self.vocab().bos_piece
    }

    /// Spelling of the end-of-sentence piece
    fn eos_piece(&self) -> &str {
        &self.vocab().eos_piece
    }

    /// Spelling of the padding piece
    fn pad_piece(&self) -> &str {
        &self.vocab().pad_piece
    }

    /// Current encoder version
    fn encoder_version(&self) -> EncoderVersion {
        self.vocab().encoder_version
    }

    /// Select the encoder version
    fn set_encoder_version(&mut self, version: EncoderVersion) {
        self.vocab_mut().encoder_version = version;
    }
}

/// Instantiate the kernel the artifact asks for
///
/// # Errors
///
/// Propagates [`Vocab::build`] validation failures.
pub fn from_artifact(artifact: &ModelArtifact) -> Result<Box<dyn SubwordModel>> {
    let vocab = Vocab::build(artifact)?;
    Ok(match artifact.trainer.model_type {
        ModelType::Unigram => Box::new(UnigramModel::new(vocab)),
        ModelType::Bpe => Box::new(BpeModel::new(vocab)),
        ModelType::Word => Box::new(WordModel::new(vocab)),
        ModelType::Char => Box::new(CharModel::new(vocab)),
    })
}
