//! The tokenizer processor façade
//!
//! Owns the loaded [`ModelArtifact`], the kernel selected by its model type,
//! the normalizer and the optional denormalizer, and drives the full
//! encode/decode pipelines:
//!
//! - **Encode**: normalize with offset tracking, segment through the kernel,
//!   rebuild the piece structure with original-input byte spans, merge
//!   unknown runs or expand byte fallback, apply extra options.
//! - **Decode**: invert run-length folding, derive per-piece surfaces,
//!   reassemble byte-fallback runs as UTF-8, optionally reapply the
//!   denormalizer while keeping per-piece offsets aligned.
//!
//! A processor is ready the moment construction succeeds; immutable
//! operations take `&self` and are safe to share across threads. Mutating
//! operations (vocabulary constraints, extra options, encoder version) take
//! `&mut self` and require readers to be quiesced.
//!
//! ## Example
//!
//! ```rust,ignore
//! use trocear::Processor;
//!
//! let processor = Processor::from_file("model.json")?;
//! let pieces = processor.encode_pieces("Hello world")?;
//! let text = processor.decode_pieces(&pieces)?;
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{info, warn};
use rand::{Rng, RngCore};

use crate::artifact::{ModelArtifact, ModelType, PieceType};
use crate::error::{Result, TrocearError};
use crate::model::{self, byte_to_piece, piece_to_byte, EncodeResult, EncoderVersion, SubwordModel};
use crate::normalizer::{one_char_len, Normalizer, PrefixMatcher, SPACE_SYMBOL};
use crate::rle;
use crate::text::{NBestTokenizedText, PieceRecord, TokenizedText};

// Decoded <unk> surfaces as U+2047 (DOUBLE QUESTION MARK) so emitted unknown
// tokens stay recognizable in plain text.
const DEFAULT_UNK_SURFACE: &str = " \u{2047} ";

const MAX_NBEST_SIZE: i32 = 512;

/// Order-sensitive post-processing applied to a tokenized envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraOption {
    /// Prepend the beginning-of-sentence piece
    Bos,
    /// Append the end-of-sentence piece
    Eos,
    /// Reverse the piece order
    Reverse,
}

/// Subword tokenizer processor
///
/// See the [module documentation](crate::processor) for the pipeline
/// overview.
pub struct Processor {
    artifact: ModelArtifact,
    model: Box<dyn SubwordModel>,
    normalizer: Normalizer,
    denormalizer: Option<Normalizer>,
    encode_extra_options: Vec<ExtraOption>,
    decode_extra_options: Vec<ExtraOption>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("pieces", &self.artifact.pieces.len())
            .field("model_type", &self.artifact.trainer.model_type)
            .finish_non_exhaustive()
    }
}

impl Processor {
    /// Load a processor from an artifact file
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::NotFound`] for an empty path or missing file,
    /// plus everything [`Processor::from_artifact`] can fail with.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_artifact(ModelArtifact::from_file(path)?)
    }

    /// Load a processor from serialized artifact bytes
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::Internal`] on parse failures, plus everything
    /// [`Processor::from_artifact`] can fail with.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_artifact(ModelArtifact::from_bytes(bytes)?)
    }

    /// Load a processor from a parsed artifact
    ///
    /// Instantiates the kernel for the artifact's model type, builds the
    /// normalizer (wiring in the user-defined-symbol matcher) and the
    /// denormalizer when a non-empty charmap is present, then runs the
    /// artifact's self-test samples.
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::Internal`] on vocabulary validation or
    /// self-test failures.
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        let model = model::from_artifact(&artifact)?;

        let mut normalizer = Normalizer::new(&artifact.normalizer);
        normalizer.set_prefix_matcher(PrefixMatcher::new(model.vocab().user_defined_pieces()));

        let denormalizer = artifact
            .denormalizer
            .as_ref()
            .filter(|spec| !spec.char_map.is_empty())
            .map(Normalizer::denormalizer);

        let processor = Self {
            artifact,
            model,
            normalizer,
            denormalizer,
            encode_extra_options: Vec::new(),
            decode_extra_options: Vec::new(),
        };
        processor.run_self_tests()?;
        Ok(processor)
    }

    fn run_self_tests(&self) -> Result<()> {
        let mut failures = Vec::new();
        for sample in &self.artifact.self_test {
            let actual = self.encode_pieces(&sample.input)?.join(" ");
            if !self.model.verify_outputs_equivalent(&sample.expected, &actual) {
                failures.push(format!("{}\t{}\t{actual}", sample.input, sample.expected));
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        info!(
            "{}/{} self-test samples did not pass",
            failures.len(),
            self.artifact.self_test.len()
        );
        for failure in &failures {
            info!("{failure}");
        }
        Err(TrocearError::internal(
            "self-test failures; each mismatch was logged",
        ))
    }

    /// Swap in a different kernel
    ///
    /// Not thread-safe with respect to concurrent readers.
    pub fn set_model(&mut self, model: Box<dyn SubwordModel>) {
        self.model = model;
    }

    /// Swap in a different normalizer
    ///
    /// Not thread-safe with respect to concurrent readers.
    pub fn set_normalizer(&mut self, normalizer: Normalizer) {
        self.normalizer = normalizer;
    }

    /// The loaded artifact
    #[must_use]
    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Serialized bytes of the loaded artifact; empty on failure
    #[must_use]
    pub fn serialized_artifact(&self) -> Vec<u8> {
        self.artifact.to_bytes()
    }

    /// Current encoder version
    #[must_use]
    pub fn encoder_version(&self) -> EncoderVersion {
        self.model.encoder_version()
    }

    /// Select the encoder version
    pub fn set_encoder_version(&mut self, version: EncoderVersion) {
        self.model.set_encoder_version(version);
    }

    // ------------------------------------------------------------------
    // Extra options
    // ------------------------------------------------------------------

    fn parse_extra_options(&self, spec: &str) -> Result<Vec<ExtraOption>> {
        let mut options = Vec::new();
        if spec.is_empty() {
            return Ok(options);
        }
        for token in spec.split(':') {
            let option = match token {
                "bos" => ExtraOption::Bos,
                "eos" => ExtraOption::Eos,
                "reverse" => ExtraOption::Reverse,
                other => {
                    return Err(TrocearError::internal(format!(
                        "option \"{other}\" is not available"
                    )))
                }
            };
            let required_piece = match option {
                ExtraOption::Bos => Some(self.model.bos_piece().to_string()),
                ExtraOption::Eos => Some(self.model.eos_piece().to_string()),
                ExtraOption::Reverse => None,
            };
            if let Some(piece) = required_piece {
                if self.model.is_unknown(self.model.piece_to_id(&piece)) {
                    return Err(TrocearError::internal(format!(
                        "id for `{piece}` is not defined"
                    )));
                }
            }
            options.push(option);
        }
        Ok(options)
    }

    /// Configure post-processing for the encode paths
    ///
    /// `spec` is a colon-separated mix of `bos`, `eos` and `reverse`,
    /// applied in order.
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::Internal`] for unknown option names or when
    /// `bos`/`eos` cannot resolve to a defined id.
    pub fn set_encode_extra_options(&mut self, spec: &str) -> Result<()> {
        self.encode_extra_options = self.parse_extra_options(spec)?;
        Ok(())
    }

    /// Configure post-processing for the decode paths
    ///
    /// # Errors
    ///
    /// As [`Processor::set_encode_extra_options`].
    pub fn set_decode_extra_options(&mut self, spec: &str) -> Result<()> {
        self.decode_extra_options = self.parse_extra_options(spec)?;
        Ok(())
    }

    fn apply_extra_options(&self, options: &[ExtraOption], spt: &mut TokenizedText) {
        for option in options {
            match option {
                ExtraOption::Reverse => spt.pieces.reverse(),
                ExtraOption::Eos => {
                    let piece = self.model.eos_piece().to_string();
                    let id = self.model.piece_to_id(&piece);
                    spt.pieces.push(PieceRecord {
                        piece,
                        id,
                        ..PieceRecord::default()
                    });
                }
                ExtraOption::Bos => {
                    let piece = self.model.bos_piece().to_string();
                    let id = self.model.piece_to_id(&piece);
                    spt.pieces.insert(
                        0,
                        PieceRecord {
                            piece,
                            id,
                            ..PieceRecord::default()
                        },
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Vocabulary constraints
    // ------------------------------------------------------------------

    fn rebuild_model(&mut self) -> Result<()> {
        let version = self.model.encoder_version();
        self.model = model::from_artifact(&self.artifact)?;
        self.model.set_encoder_version(version);
        Ok(())
    }

    /// Restrict segmentation to an allow-set of pieces
    ///
    /// Control, unknown and user-defined pieces are untouched. Every other
    /// piece becomes normal when its text is in `valid` or spells a single
    /// codepoint, and unused otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::InvalidArgument`] for model types other than
    /// unigram and BPE.
    pub fn set_vocabulary<S: AsRef<str>>(&mut self, valid: &[S]) -> Result<()> {
        let model_type = self.artifact.trainer.model_type;
        if !matches!(model_type, ModelType::Unigram | ModelType::Bpe) {
            return Err(TrocearError::invalid_argument(
                "vocabulary constraint is only enabled in subword units",
            ));
        }

        let allow: HashSet<&str> = valid.iter().map(AsRef::as_ref).collect();
        for piece in &mut self.artifact.pieces {
            if matches!(
                piece.kind,
                PieceType::Control | PieceType::Unknown | PieceType::UserDefined
            ) {
                continue;
            }
            let single_codepoint = piece
                .piece
                .as_bytes()
                .first()
                .is_some_and(|&b| one_char_len(b) == piece.piece.len());
            piece.kind = if allow.contains(piece.piece.as_str()) || single_codepoint {
                PieceType::Normal
            } else {
                PieceType::Unused
            };
        }
        self.rebuild_model()
    }

    /// Lift a previously applied vocabulary constraint
    ///
    /// # Errors
    ///
    /// Propagates kernel rebuild failures.
    pub fn reset_vocabulary(&mut self) -> Result<()> {
        for piece in &mut self.artifact.pieces {
            if piece.kind == PieceType::Unused {
                piece.kind = PieceType::Normal;
            }
        }
        self.rebuild_model()
    }

    /// Read an allow-set from a vocabulary file and apply it
    ///
    /// One record per line: `piece` optionally followed by `\t freq`
    /// (default 1). Records with `freq < threshold` are filtered out.
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::NotFound`] for an empty path or missing file,
    /// [`TrocearError::Internal`] for blank pieces or unparsable
    /// frequencies, plus everything [`Processor::set_vocabulary`] can fail
    /// with.
    pub fn load_vocabulary(&mut self, path: impl AsRef<Path>, threshold: u32) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(TrocearError::NotFound {
                path: String::new(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TrocearError::NotFound {
                    path: path.display().to_string(),
                }
            } else {
                TrocearError::internal(format!("could not read {}: {e}", path.display()))
            }
        })?;

        let mut vocab = Vec::new();
        for line in content.lines() {
            let mut fields = line.split('\t');
            let piece = fields.next().unwrap_or_default();
            if piece.is_empty() {
                return Err(TrocearError::internal(
                    "vocabulary file holds an empty piece",
                ));
            }
            let freq = match fields.next() {
                Some(field) => field.parse::<u32>().map_err(|_| {
                    TrocearError::internal(format!("could not parse the frequency: {field}"))
                })?,
                None => 1,
            };
            if freq >= threshold {
                vocab.push(piece.to_string());
            }
        }
        self.set_vocabulary(&vocab)
    }

    // ------------------------------------------------------------------
    // Encode
    // ------------------------------------------------------------------

    /// Rebuild the kernel output as piece records with original-input spans
    fn populate(
        &self,
        input: &str,
        normalized: &str,
        norm_to_orig: &[usize],
        result: EncodeResult,
        score: Option<f32>,
    ) -> Result<TokenizedText> {
        let mut spt = TokenizedText {
            score,
            ..TokenizedText::default()
        };

        let mut consumed = 0usize;
        let mut is_prev_unk = false;
        for (w, id) in result {
            if w.is_empty() {
                return Err(TrocearError::internal("empty piece is not allowed"));
            }
            let is_unk = self.model.is_unknown(id);

            if self.model.is_control(id) {
                // Control symbols have no source surface.
                let at = norm_to_orig[consumed];
                spt.pieces.push(PieceRecord {
                    piece: w,
                    id,
                    surface: String::new(),
                    begin: at,
                    end: at,
                });
            } else {
                let begin = consumed;
                let end = consumed + w.len();
                if end >= norm_to_orig.len() {
                    return Err(TrocearError::internal(
                        "piece runs past the normalized text",
                    ));
                }
                let orig_begin = norm_to_orig[begin];
                let orig_end = norm_to_orig[end];
                if orig_begin > orig_end || orig_end > input.len() {
                    return Err(TrocearError::internal("piece span is out of order"));
                }
                let surface = &input[orig_begin..orig_end];

                if is_unk && self.model.byte_fallback_enabled() {
                    // Decompose the unknown span into byte pieces; only the
                    // last byte carries the source surface.
                    let bytes = w.as_bytes();
                    for (i, &b) in bytes.iter().enumerate() {
                        let piece = byte_to_piece(b);
                        let piece_id = self.model.piece_to_id(&piece);
                        let last = i + 1 == bytes.len();
                        spt.pieces.push(PieceRecord {
                            piece,
                            id: piece_id,
                            surface: if last {
                                surface.to_string()
                            } else {
                                String::new()
                            },
                            begin: orig_begin,
                            end: if last { orig_end } else { orig_begin },
                        });
                    }
                } else if is_prev_unk && is_unk {
                    // Merge the run so the decoder can treat one unknown
                    // token as one surface span.
                    if let Some(prev) = spt.pieces.last_mut() {
                        prev.piece.push_str(&w);
                        prev.surface.push_str(surface);
                        prev.end = orig_end;
                    }
                } else {
                    spt.pieces.push(PieceRecord {
                        piece: w,
                        id,
                        surface: surface.to_string(),
                        begin: orig_begin,
                        end: orig_end,
                    });
                }
                consumed = end;
            }
            is_prev_unk = is_unk;
        }

        if consumed != normalized.len() {
            return Err(TrocearError::internal(
                "all normalized characters are not consumed",
            ));
        }

        self.apply_extra_options(&self.encode_extra_options, &mut spt);
        spt.text = input.to_string();
        Ok(spt)
    }

    /// Encode into a structured envelope with per-piece source spans
    ///
    /// # Errors
    ///
    /// Propagates kernel failures and offset invariant violations.
    pub fn encode_tokenized(&self, input: &str) -> Result<TokenizedText> {
        let (normalized, norm_to_orig) = self.normalizer.normalize(input);
        let result = self.model.encode(&normalized)?;
        self.populate(input, &normalized, &norm_to_orig, result, None)
    }

    /// Encode into piece strings, with repeated-piece runs folded
    ///
    /// # Errors
    ///
    /// As [`Processor::encode_tokenized`].
    pub fn encode_pieces(&self, input: &str) -> Result<Vec<String>> {
        let spt = self.encode_tokenized(input)?;
        Ok(rle::fold(&spt.piece_texts()))
    }

    /// Encode into piece ids, with repeated-piece runs folded
    ///
    /// # Errors
    ///
    /// As [`Processor::encode_tokenized`].
    pub fn encode_ids(&self, input: &str) -> Result<Vec<u32>> {
        Ok(self
            .encode_pieces(input)?
            .iter()
            .map(|piece| self.model.piece_to_id(piece))
            .collect())
    }

    /// Serialized-envelope sibling of [`Processor::encode_tokenized`]
    ///
    /// Returns empty bytes on any failure.
    #[must_use]
    pub fn encode_serialized(&self, input: &str) -> Vec<u8> {
        self.encode_tokenized(input)
            .map(|spt| spt.to_bytes())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // N-best encode
    // ------------------------------------------------------------------

    /// Up to `n` alternative tokenizations, best first
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::InvalidArgument`] when `n` exceeds 512 and
    /// [`TrocearError::Internal`] when the model does not support n-best
    /// enumeration or returns nothing.
    pub fn nbest_encode_tokenized(&self, input: &str, n: usize) -> Result<NBestTokenizedText> {
        if n > MAX_NBEST_SIZE as usize {
            return Err(TrocearError::invalid_argument(
                "nbest_size must be nbest_size <= 512",
            ));
        }
        if !self.model.nbest_available() {
            return Err(TrocearError::internal(
                "NBestEncode is not available for the current model",
            ));
        }
        let (normalized, norm_to_orig) = self.normalizer.normalize(input);
        let nbests = self.model.nbest_encode(&normalized, n)?;
        if nbests.is_empty() {
            return Err(TrocearError::internal("NBestEncode returned no result"));
        }
        let mut out = NBestTokenizedText::default();
        for (result, score) in nbests {
            out.nbests
                .push(self.populate(input, &normalized, &norm_to_orig, result, Some(score))?);
        }
        Ok(out)
    }

    /// N-best variant returning piece strings
    ///
    /// # Errors
    ///
    /// As [`Processor::nbest_encode_tokenized`].
    pub fn nbest_encode_pieces(&self, input: &str, n: usize) -> Result<Vec<Vec<String>>> {
        let nbest = self.nbest_encode_tokenized(input, n)?;
        Ok(nbest.nbests.iter().map(TokenizedText::piece_texts).collect())
    }

    /// N-best variant returning piece ids
    ///
    /// # Errors
    ///
    /// As [`Processor::nbest_encode_tokenized`].
    pub fn nbest_encode_ids(&self, input: &str, n: usize) -> Result<Vec<Vec<u32>>> {
        let nbest = self.nbest_encode_tokenized(input, n)?;
        Ok(nbest.nbests.iter().map(TokenizedText::piece_ids).collect())
    }

    /// Serialized-envelope sibling of [`Processor::nbest_encode_tokenized`]
    ///
    /// Returns empty bytes on any failure.
    #[must_use]
    pub fn nbest_encode_serialized(&self, input: &str, n: usize) -> Vec<u8> {
        self.nbest_encode_tokenized(input, n)
            .map(|nbest| nbest.to_bytes())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Sampled encode
    // ------------------------------------------------------------------

    /// Draw one tokenization, using the process-wide random source
    ///
    /// Dispatch follows `nbest_size`:
    /// - negative (or a model without n-best): kernel-level sampling with
    ///   temperature `alpha`;
    /// - `0` or `1`: the greedy [`Processor::encode_tokenized`] result;
    /// - otherwise: one of the top-`nbest_size` candidates drawn with
    ///   probability proportional to `exp(alpha * score)`.
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::InvalidArgument`] when `nbest_size` exceeds
    /// 512 and [`TrocearError::Internal`] when the required capability is
    /// missing.
    pub fn sample_encode_tokenized(
        &self,
        input: &str,
        nbest_size: i32,
        alpha: f32,
    ) -> Result<TokenizedText> {
        let mut rng = rand::rng();
        self.sample_encode_tokenized_with_rng(input, nbest_size, alpha, &mut rng)
    }

    /// Deterministic seam for [`Processor::sample_encode_tokenized`]
    ///
    /// # Errors
    ///
    /// As [`Processor::sample_encode_tokenized`].
    pub fn sample_encode_tokenized_with_rng(
        &self,
        input: &str,
        nbest_size: i32,
        alpha: f32,
        rng: &mut dyn RngCore,
    ) -> Result<TokenizedText> {
        if nbest_size > MAX_NBEST_SIZE {
            return Err(TrocearError::invalid_argument(
                "nbest_size must be nbest_size <= 512",
            ));
        }
        let (normalized, norm_to_orig) = self.normalizer.normalize(input);

        if !self.model.nbest_available() || nbest_size < 0 {
            if !self.model.sample_available() {
                return Err(TrocearError::internal(
                    "SampleEncode is not available for the current model",
                ));
            }
            let result = self.model.sample_encode(&normalized, alpha, rng)?;
            return self.populate(input, &normalized, &norm_to_orig, result, None);
        }

        if nbest_size <= 1 {
            let result = self.model.encode(&normalized)?;
            return self.populate(input, &normalized, &norm_to_orig, result, None);
        }

        let nbests = self
            .model
            .nbest_encode(&normalized, usize::try_from(nbest_size).unwrap_or(1))?;
        if nbests.is_empty() {
            return Err(TrocearError::internal("NBestEncode returned no result"));
        }

        let probs: Vec<f32> = nbests
            .iter()
            .map(|(_, score)| (alpha * score).exp())
            .collect();
        let total: f32 = probs.iter().sum();
        let mut draw = rng.random::<f32>() * total;
        let mut chosen = nbests.len() - 1;
        for (i, p) in probs.iter().enumerate() {
            if draw < *p {
                chosen = i;
                break;
            }
            draw -= p;
        }
        let (result, _) = nbests.into_iter().nth(chosen).unwrap_or_default();
        self.populate(input, &normalized, &norm_to_orig, result, None)
    }

    /// Sampled variant returning piece strings
    ///
    /// # Errors
    ///
    /// As [`Processor::sample_encode_tokenized`].
    pub fn sample_encode_pieces(
        &self,
        input: &str,
        nbest_size: i32,
        alpha: f32,
    ) -> Result<Vec<String>> {
        Ok(self
            .sample_encode_tokenized(input, nbest_size, alpha)?
            .piece_texts())
    }

    /// Sampled variant returning piece ids
    ///
    /// # Errors
    ///
    /// As [`Processor::sample_encode_tokenized`].
    pub fn sample_encode_ids(
        &self,
        input: &str,
        nbest_size: i32,
        alpha: f32,
    ) -> Result<Vec<u32>> {
        Ok(self
            .sample_encode_tokenized(input, nbest_size, alpha)?
            .piece_ids())
    }

    /// Serialized-envelope sibling of [`Processor::sample_encode_tokenized`]
    ///
    /// Returns empty bytes on any failure.
    #[must_use]
    pub fn sample_encode_serialized(&self, input: &str, nbest_size: i32, alpha: f32) -> Vec<u8> {
        self.sample_encode_tokenized(input, nbest_size, alpha)
            .map(|spt| spt.to_bytes())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Decode
    // ------------------------------------------------------------------

    /// Per-piece surface for a non-byte piece
    fn decode_piece(
        &self,
        piece: &str,
        id: u32,
        is_bos_ws: bool,
        is_eos_ws: bool,
        unk_surface: &str,
    ) -> String {
        if self.model.is_control(id) {
            return String::new();
        }
        if self.model.is_unknown(id) {
            // A merged unknown run carries its own spelling; the canonical
            // <unk> spelling decodes to the visible unknown surface.
            if self.model.id_to_piece(id) == piece {
                return unk_surface.to_string();
            }
            return piece.to_string();
        }

        let spec = &self.artifact.normalizer;
        let ws_sensitive = spec.add_dummy_prefix || spec.remove_extra_whitespaces;
        let mut piece = piece;
        if spec.treat_whitespace_as_suffix {
            if is_eos_ws && ws_sensitive {
                piece = piece.strip_suffix(SPACE_SYMBOL).unwrap_or(piece);
            }
        } else if is_bos_ws && ws_sensitive {
            piece = piece.strip_prefix(SPACE_SYMBOL).unwrap_or(piece);
        }
        piece.replace(SPACE_SYMBOL, " ")
    }

    fn set_surface(records: &mut [PieceRecord], text: &mut String, index: usize, surface: &str) {
        let record = &mut records[index];
        record.begin = text.len();
        record.surface = surface.to_string();
        text.push_str(surface);
        record.end = text.len();
    }

    /// Spread the codepoints of `chunk` over byte-piece positions starting
    /// at `index`; returns the position after the last one written
    fn distribute_codepoints(
        records: &mut [PieceRecord],
        text: &mut String,
        mut index: usize,
        chunk: &str,
    ) -> usize {
        for ch in chunk.chars() {
            let mut buf = [0u8; 4];
            let encoded = ch.encode_utf8(&mut buf);
            for j in 0..encoded.len() {
                if j + 1 == encoded.len() {
                    Self::set_surface(records, text, index, encoded);
                } else {
                    Self::set_surface(records, text, index, "");
                }
                index += 1;
            }
        }
        index
    }

    /// Reassemble a contiguous run of byte pieces as UTF-8
    ///
    /// Each decoded codepoint distributes its UTF-8 bytes over the run's
    /// positions: intermediates get empty surfaces, the final byte the whole
    /// codepoint. Invalid bytes map to one U+FFFD each.
    fn process_byte_pieces(
        &self,
        records: &mut [PieceRecord],
        text: &mut String,
        begin: usize,
        end: usize,
    ) -> Result<()> {
        if begin >= end {
            return Ok(());
        }

        let mut bytes = Vec::with_capacity(end - begin);
        for record in &records[begin..end] {
            let b = piece_to_byte(&record.piece).ok_or_else(|| {
                TrocearError::internal(format!("not a byte piece: {}", record.piece))
            })?;
            bytes.push(b);
        }

        let mut index = begin;
        let mut rest: &[u8] = &bytes;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(chunk) => {
                    index = Self::distribute_codepoints(records, text, index, chunk);
                    rest = &[];
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(chunk) = std::str::from_utf8(valid) {
                        index = Self::distribute_codepoints(records, text, index, chunk);
                    }
                    // One replacement character per offending byte.
                    Self::set_surface(records, text, index, "\u{fffd}");
                    index += 1;
                    rest = &after[1..];
                }
            }
        }

        if index != end {
            return Err(TrocearError::internal(
                "byte pieces were not fully consumed",
            ));
        }
        Ok(())
    }

    /// Remap piece surfaces and offsets through the denormalizer
    fn denormalize(&self, spt: &mut TokenizedText, text: String) -> String {
        let Some(denormalizer) = &self.denormalizer else {
            return text;
        };
        let (denormalized, norm_to_orig) = denormalizer.normalize(&text);

        // First observed normalized position for each original offset; the
        // first-occurrence rule keeps the remap deterministic.
        let mut orig_to_norm: HashMap<usize, usize> = HashMap::new();
        for (i, &orig) in norm_to_orig.iter().enumerate() {
            orig_to_norm.entry(orig).or_insert(i);
        }

        let mut new_begin = 0usize;
        let mut surface_cursor = 0usize;
        let mut next_unconsumed = 0usize;
        for record in &mut spt.pieces {
            let surface_len = record.surface.len();
            let mut new_surface = String::new();
            for j in surface_cursor..surface_cursor + surface_len {
                if let Some(&norm_index) = orig_to_norm.get(&(j + 1)) {
                    if norm_index > next_unconsumed {
                        new_surface
                            .push_str(denormalized.get(next_unconsumed..norm_index).unwrap_or(""));
                    }
                    next_unconsumed = norm_index;
                }
            }
            surface_cursor += surface_len;

            record.surface = new_surface;
            record.begin = new_begin;
            new_begin += record.surface.len();
            record.end = new_begin;
        }

        denormalized
    }

    /// Decode already-unfolded piece strings into an envelope
    fn decode_records(&self, pieces: Vec<String>) -> Result<TokenizedText> {
        let unk_surface = self
            .artifact
            .trainer
            .unk_surface
            .as_deref()
            .unwrap_or(DEFAULT_UNK_SURFACE);

        let mut spt = TokenizedText::default();
        for piece in pieces {
            let id = self.model.piece_to_id(&piece);
            spt.pieces.push(PieceRecord {
                piece,
                id,
                ..PieceRecord::default()
            });
        }

        self.apply_extra_options(&self.decode_extra_options, &mut spt);

        let total = spt.pieces.len();
        let mut text = String::new();
        let mut byte_start = 0usize;
        for i in 0..total {
            let id = spt.pieces[i].id;
            if !self.model.is_byte(id) {
                self.process_byte_pieces(&mut spt.pieces, &mut text, byte_start, i)?;
                byte_start = i + 1;
                let piece = spt.pieces[i].piece.clone();
                let surface =
                    self.decode_piece(&piece, id, text.is_empty(), i + 1 == total, unk_surface);
                Self::set_surface(&mut spt.pieces, &mut text, i, &surface);
            }
        }
        self.process_byte_pieces(&mut spt.pieces, &mut text, byte_start, total)?;

        let text = self.denormalize(&mut spt, text);
        spt.text = text;
        Ok(spt)
    }

    /// Decode piece strings into an envelope (no run-length unfolding)
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::Internal`] on malformed byte pieces.
    pub fn decode_pieces_tokenized<S: AsRef<str>>(&self, pieces: &[S]) -> Result<TokenizedText> {
        self.decode_records(pieces.iter().map(|p| p.as_ref().to_string()).collect())
    }

    /// Decode piece ids into an envelope (no run-length unfolding)
    ///
    /// # Errors
    ///
    /// As [`Processor::decode_pieces_tokenized`].
    pub fn decode_ids_tokenized(&self, ids: &[u32]) -> Result<TokenizedText> {
        self.decode_records(
            ids.iter()
                .map(|&id| self.model.id_to_piece(id).to_string())
                .collect(),
        )
    }

    /// Decode piece strings into text, unfolding run-length runs first
    ///
    /// # Errors
    ///
    /// Returns [`TrocearError::Internal`] on malformed run-length input or
    /// byte pieces.
    pub fn decode_pieces<S: AsRef<str>>(&self, pieces: &[S]) -> Result<String> {
        let pieces: Vec<String> = pieces.iter().map(|p| p.as_ref().to_string()).collect();
        let unfolded = rle::unfold(&pieces)?;
        Ok(self.decode_records(unfolded)?.text)
    }

    /// Decode piece ids into text, unfolding run-length runs first
    ///
    /// # Errors
    ///
    /// As [`Processor::decode_pieces`].
    pub fn decode_ids(&self, ids: &[u32]) -> Result<String> {
        let unfolded = rle::unfold_ids(ids, self.model.as_ref())?;
        self.decode_records(
            unfolded
                .iter()
                .map(|&id| self.model.id_to_piece(id).to_string())
                .collect(),
        )
        .map(|spt| spt.text)
    }

    /// Serialized-envelope sibling of [`Processor::decode_pieces_tokenized`]
    ///
    /// Returns empty bytes on any failure.
    #[must_use]
    pub fn decode_pieces_serialized<S: AsRef<str>>(&self, pieces: &[S]) -> Vec<u8> {
        self.decode_pieces_tokenized(pieces)
            .map(|spt| spt.to_bytes())
            .unwrap_or_default()
    }

    /// Serialized-envelope sibling of [`Processor::decode_ids_tokenized`]
    ///
    /// Returns empty bytes on any failure.
    #[must_use]
    pub fn decode_ids_serialized(&self, ids: &[u32]) -> Vec<u8> {
        self.decode_ids_tokenized(ids)
            .map(|spt| spt.to_bytes())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of pieces in the vocabulary
    #[must_use]
    pub fn piece_size(&self) -> usize {
        self.model.piece_size()
    }

    /// Id for `piece`; the unknown id when out of vocabulary
    #[must_use]
    pub fn piece_to_id(&self, piece: &str) -> u32 {
        self.model.piece_to_id(piece)
    }

    /// Piece text for `id`; logs and returns an empty string when out of range
    #[must_use]
    pub fn id_to_piece(&self, id: u32) -> &str {
        if id as usize >= self.model.piece_size() {
            warn!("piece id {id} is out of range; returning the default value");
        }
        self.model.id_to_piece(id)
    }

    /// Score for `id`; logs and returns `0.0` when out of range
    #[must_use]
    pub fn score(&self, id: u32) -> f32 {
        if id as usize >= self.model.piece_size() {
            warn!("piece id {id} is out of range; returning the default value");
        }
        self.model.score(id)
    }

    /// Whether `id` is a control piece; `false` when out of range
    #[must_use]
    pub fn is_control(&self, id: u32) -> bool {
        self.model.is_control(id)
    }

    /// Whether `id` is the unknown piece; `false` when out of range
    #[must_use]
    pub fn is_unknown(&self, id: u32) -> bool {
        self.model.is_unknown(id)
    }

    /// Whether `id` is masked out by a vocabulary constraint
    #[must_use]
    pub fn is_unused(&self, id: u32) -> bool {
        self.model.is_unused(id)
    }

    /// Whether `id` is a byte-fallback piece
    #[must_use]
    pub fn is_byte(&self, id: u32) -> bool {
        self.model.is_byte(id)
    }

    /// Id of the unknown piece, when it resolves to an unknown-typed piece
    #[must_use]
    pub fn unk_id(&self) -> Option<u32> {
        let id = self.model.piece_to_id(self.model.unk_piece());
        self.model.is_unknown(id).then_some(id)
    }

    /// Id of the beginning-of-sentence piece, when control-typed
    #[must_use]
    pub fn bos_id(&self) -> Option<u32> {
        let id = self.model.piece_to_id(self.model.bos_piece());
        self.model.is_control(id).then_some(id)
    }

    /// Id of the end-of-sentence piece, when control-typed
    #[must_use]
    pub fn eos_id(&self) -> Option<u32> {
        let id = self.model.piece_to_id(self.model.eos_piece());
        self.model.is_control(id).then_some(id)
    }

    /// Id of the padding piece, when control-typed
    #[must_use]
    pub fn pad_id(&self) -> Option<u32> {
        let id = self.model.piece_to_id(self.model.pad_piece());
        self.model.is_control(id).then_some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{
        DenormalizerSpec, NormalizerSpec, SelfTestSample, TrainerSpec, VocabPiece,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn base_pieces() -> Vec<VocabPiece> {
        vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::typed("<s>", 0.0, PieceType::Control),
            VocabPiece::typed("</s>", 0.0, PieceType::Control),
            VocabPiece::normal("\u{2581}He", -1.0),
            VocabPiece::normal("llo", -1.5),
            VocabPiece::normal("\u{2581}", -3.0),
            VocabPiece::normal("H", -4.0),
            VocabPiece::normal("e", -4.0),
            VocabPiece::normal("l", -4.0),
            VocabPiece::normal("o", -4.0),
        ]
    }

    fn unigram_artifact() -> ModelArtifact {
        ModelArtifact {
            pieces: base_pieces(),
            ..ModelArtifact::default()
        }
    }

    fn processor() -> Processor {
        Processor::from_artifact(unigram_artifact()).unwrap()
    }

    #[test]
    fn test_encode_pieces_with_offsets() {
        let spt = processor().encode_tokenized("Hello").unwrap();
        assert_eq!(spt.text, "Hello");
        let pieces: Vec<_> = spt.pieces.iter().map(|p| p.piece.as_str()).collect();
        assert_eq!(pieces, vec!["\u{2581}He", "llo"]);
        assert_eq!((spt.pieces[0].begin, spt.pieces[0].end), (0, 2));
        assert_eq!((spt.pieces[1].begin, spt.pieces[1].end), (2, 5));
        assert_eq!(spt.pieces[0].surface, "He");
        assert_eq!(spt.pieces[1].surface, "llo");
    }

    #[test]
    fn test_encode_empty_input() {
        let spt = processor().encode_tokenized("").unwrap();
        assert!(spt.pieces.is_empty());
        assert!(spt.text.is_empty());
    }

    #[test]
    fn test_encode_ids_roundtrip_decode() {
        let processor = processor();
        let ids = processor.encode_ids("Hello").unwrap();
        assert_eq!(processor.decode_ids(&ids).unwrap(), "Hello");
    }

    #[test]
    fn test_encode_pieces_fold_runs() {
        let artifact = ModelArtifact {
            pieces: vec![
                VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
                VocabPiece::normal("ab", -1.0),
            ],
            normalizer: NormalizerSpec {
                add_dummy_prefix: false,
                ..NormalizerSpec::default()
            },
            ..ModelArtifact::default()
        };
        let processor = Processor::from_artifact(artifact).unwrap();
        let pieces = processor.encode_pieces("ababab").unwrap();
        assert_eq!(
            pieces,
            vec!["ab", "(#startrepeat)", "3", "(#endrepeat)"]
        );
        assert_eq!(processor.decode_pieces(&pieces).unwrap(), "ababab");
    }

    #[test]
    fn test_unknown_run_merging() {
        let artifact = ModelArtifact {
            pieces: vec![
                VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
                VocabPiece::normal("a", -1.0),
            ],
            normalizer: NormalizerSpec {
                add_dummy_prefix: false,
                ..NormalizerSpec::default()
            },
            ..ModelArtifact::default()
        };
        let processor = Processor::from_artifact(artifact).unwrap();
        let spt = processor.encode_tokenized("axya").unwrap();
        let pieces: Vec<_> = spt.pieces.iter().map(|p| p.piece.as_str()).collect();
        assert_eq!(pieces, vec!["a", "xy", "a"]);
        assert_eq!(spt.pieces[1].surface, "xy");
        assert_eq!((spt.pieces[1].begin, spt.pieces[1].end), (1, 3));
    }

    fn byte_fallback_artifact() -> ModelArtifact {
        let mut pieces = vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::normal("a", -1.0),
        ];
        for b in 0..=u8::MAX {
            pieces.push(VocabPiece::typed(byte_to_piece(b), -10.0, PieceType::Byte));
        }
        ModelArtifact {
            pieces,
            trainer: TrainerSpec {
                byte_fallback: true,
                ..TrainerSpec::default()
            },
            normalizer: NormalizerSpec {
                add_dummy_prefix: false,
                ..NormalizerSpec::default()
            },
            ..ModelArtifact::default()
        }
    }

    #[test]
    fn test_byte_fallback_encode() {
        let processor = Processor::from_artifact(byte_fallback_artifact()).unwrap();
        let spt = processor.encode_tokenized("\u{20ac}").unwrap();
        let pieces: Vec<_> = spt.pieces.iter().map(|p| p.piece.as_str()).collect();
        assert_eq!(pieces, vec!["<0xE2>", "<0x82>", "<0xAC>"]);
        // Intermediates are empty with begin == end; the last carries it all.
        assert_eq!(spt.pieces[0].surface, "");
        assert_eq!((spt.pieces[0].begin, spt.pieces[0].end), (0, 0));
        assert_eq!(spt.pieces[2].surface, "\u{20ac}");
        assert_eq!((spt.pieces[2].begin, spt.pieces[2].end), (0, 3));
    }

    #[test]
    fn test_byte_fallback_decode() {
        let processor = Processor::from_artifact(byte_fallback_artifact()).unwrap();
        let spt = processor
            .decode_pieces_tokenized(&["<0xE2>", "<0x82>", "<0xAC>"])
            .unwrap();
        assert_eq!(spt.text, "\u{20ac}");
        assert_eq!(spt.pieces[0].surface, "");
        assert_eq!(spt.pieces[1].surface, "");
        assert_eq!(spt.pieces[2].surface, "\u{20ac}");
        assert_eq!((spt.pieces[2].begin, spt.pieces[2].end), (0, 3));
    }

    #[test]
    fn test_byte_fallback_decode_invalid_utf8() {
        let processor = Processor::from_artifact(byte_fallback_artifact()).unwrap();
        // 0xFF can never start a UTF-8 sequence.
        let spt = processor
            .decode_pieces_tokenized(&["<0xFF>", "<0x61>"])
            .unwrap();
        assert_eq!(spt.text, "\u{fffd}a");
        assert_eq!(spt.pieces[0].surface, "\u{fffd}");
        assert_eq!(spt.pieces[1].surface, "a");
    }

    #[test]
    fn test_decode_pieces_simple() {
        let processor = processor();
        let text = processor
            .decode_pieces(&["\u{2581}He", "llo"])
            .unwrap();
        assert_eq!(text, "Hello");
    }

    #[test]
    fn test_decode_strips_leading_space_only_with_dummy_prefix() {
        let artifact = ModelArtifact {
            pieces: base_pieces(),
            normalizer: NormalizerSpec {
                add_dummy_prefix: false,
                remove_extra_whitespaces: false,
                ..NormalizerSpec::default()
            },
            ..ModelArtifact::default()
        };
        let processor = Processor::from_artifact(artifact).unwrap();
        let text = processor
            .decode_pieces(&["\u{2581}He", "llo"])
            .unwrap();
        assert_eq!(text, " Hello");
    }

    #[test]
    fn test_decode_suffix_mode_strips_trailing_space() {
        let artifact = ModelArtifact {
            pieces: vec![
                VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
                VocabPiece::normal("He", -1.0),
                VocabPiece::normal("llo\u{2581}", -1.0),
            ],
            normalizer: NormalizerSpec {
                treat_whitespace_as_suffix: true,
                ..NormalizerSpec::default()
            },
            ..ModelArtifact::default()
        };
        let processor = Processor::from_artifact(artifact).unwrap();
        let text = processor.decode_pieces(&["He", "llo\u{2581}"]).unwrap();
        assert_eq!(text, "Hello");
    }

    #[test]
    fn test_decode_unknown_surface() {
        let processor = processor();
        let text = processor.decode_pieces(&["<unk>"]).unwrap();
        assert_eq!(text, " \u{2047} ");
    }

    #[test]
    fn test_decode_unknown_surface_override() {
        let artifact = ModelArtifact {
            trainer: TrainerSpec {
                unk_surface: Some("<?>".to_string()),
                ..TrainerSpec::default()
            },
            ..unigram_artifact()
        };
        let processor = Processor::from_artifact(artifact).unwrap();
        assert_eq!(processor.decode_pieces(&["<unk>"]).unwrap(), "<?>");
    }

    #[test]
    fn test_decode_merged_unknown_keeps_spelling() {
        let processor = processor();
        // Not the canonical <unk> spelling: decodes as-is.
        let spt = processor.decode_pieces_tokenized(&["xy"]).unwrap();
        assert_eq!(spt.pieces[0].id, processor.unk_id().unwrap());
        assert_eq!(spt.text, "xy");
    }

    #[test]
    fn test_decode_control_pieces_invisible() {
        let processor = processor();
        let spt = processor
            .decode_pieces_tokenized(&["<s>", "\u{2581}He", "llo", "</s>"])
            .unwrap();
        assert_eq!(spt.text, "Hello");
        assert_eq!(spt.pieces[0].surface, "");
        assert_eq!(spt.pieces[0].begin, spt.pieces[0].end);
        assert_eq!(spt.pieces[3].begin, spt.pieces[3].end);
    }

    #[test]
    fn test_decode_offsets_cover_text() {
        let processor = processor();
        let spt = processor
            .decode_pieces_tokenized(&["\u{2581}He", "llo"])
            .unwrap();
        assert_eq!((spt.pieces[0].begin, spt.pieces[0].end), (0, 2));
        assert_eq!((spt.pieces[1].begin, spt.pieces[1].end), (2, 5));
    }

    #[test]
    fn test_denormalizer_remaps_surfaces() {
        let artifact = ModelArtifact {
            denormalizer: Some(DenormalizerSpec {
                char_map: vec![("a".to_string(), "AA".to_string())],
            }),
            pieces: vec![
                VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
                VocabPiece::normal("\u{2581}a", -1.0),
                VocabPiece::normal("b", -1.0),
            ],
            ..ModelArtifact::default()
        };
        let processor = Processor::from_artifact(artifact).unwrap();
        let spt = processor
            .decode_pieces_tokenized(&["\u{2581}a", "b"])
            .unwrap();
        assert_eq!(spt.text, "AAb");
        assert_eq!(spt.pieces[0].surface, "AA");
        assert_eq!((spt.pieces[0].begin, spt.pieces[0].end), (0, 2));
        assert_eq!(spt.pieces[1].surface, "b");
        assert_eq!((spt.pieces[1].begin, spt.pieces[1].end), (2, 3));
    }

    #[test]
    fn test_extra_options_bos_eos() {
        let mut processor = processor();
        processor.set_encode_extra_options("bos:eos").unwrap();
        let spt = processor.encode_tokenized("Hello").unwrap();
        let pieces: Vec<_> = spt.pieces.iter().map(|p| p.piece.as_str()).collect();
        assert_eq!(pieces, vec!["<s>", "\u{2581}He", "llo", "</s>"]);
        assert_eq!(spt.pieces[0].begin, spt.pieces[0].end);
    }

    #[test]
    fn test_extra_options_reverse_then_eos() {
        let mut processor = processor();
        processor.set_encode_extra_options("reverse:eos").unwrap();
        let spt = processor.encode_tokenized("Hello").unwrap();
        let pieces: Vec<_> = spt.pieces.iter().map(|p| p.piece.as_str()).collect();
        assert_eq!(pieces, vec!["llo", "\u{2581}He", "</s>"]);
    }

    #[test]
    fn test_extra_options_unknown_name_fails() {
        let mut processor = processor();
        assert!(processor.set_encode_extra_options("bos:nope").is_err());
    }

    #[test]
    fn test_extra_options_require_defined_special() {
        let artifact = ModelArtifact {
            pieces: vec![
                VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
                VocabPiece::normal("a", -1.0),
            ],
            ..ModelArtifact::default()
        };
        let mut processor = Processor::from_artifact(artifact).unwrap();
        // <s> resolves to the unknown id: rejected.
        assert!(processor.set_encode_extra_options("bos").is_err());
        assert!(processor.set_decode_extra_options("eos").is_err());
        assert!(processor.set_encode_extra_options("reverse").is_ok());
    }

    #[test]
    fn test_sample_encode_greedy_for_small_n() {
        let processor = processor();
        let greedy = processor.encode_tokenized("Hello").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for n in [0, 1] {
            let sampled = processor
                .sample_encode_tokenized_with_rng("Hello", n, 0.1, &mut rng)
                .unwrap();
            assert_eq!(sampled.pieces, greedy.pieces);
        }
    }

    #[test]
    fn test_sample_encode_nbest_size_cap() {
        let processor = processor();
        let result = processor.sample_encode_tokenized("Hello", 513, 0.1);
        assert!(matches!(
            result,
            Err(TrocearError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_sample_encode_without_capability_fails() {
        let artifact = ModelArtifact {
            trainer: TrainerSpec {
                model_type: ModelType::Bpe,
                ..TrainerSpec::default()
            },
            ..unigram_artifact()
        };
        let processor = Processor::from_artifact(artifact).unwrap();
        // BPE advertises neither n-best nor sampling.
        assert!(processor.sample_encode_tokenized("Hello", -1, 0.1).is_err());
        assert!(processor.sample_encode_tokenized("Hello", 3, 0.1).is_err());
    }

    #[test]
    fn test_nbest_encode() {
        let processor = processor();
        let nbest = processor.nbest_encode_tokenized("Hello", 2).unwrap();
        assert_eq!(nbest.nbests.len(), 2);
        let best: Vec<_> = nbest.nbests[0]
            .pieces
            .iter()
            .map(|p| p.piece.as_str())
            .collect();
        assert_eq!(best, vec!["\u{2581}He", "llo"]);
        assert!(nbest.nbests[0].score.unwrap() >= nbest.nbests[1].score.unwrap());
    }

    #[test]
    fn test_nbest_encode_unsupported_model() {
        let artifact = ModelArtifact {
            trainer: TrainerSpec {
                model_type: ModelType::Word,
                ..TrainerSpec::default()
            },
            ..unigram_artifact()
        };
        let processor = Processor::from_artifact(artifact).unwrap();
        assert!(processor.nbest_encode_tokenized("Hello", 2).is_err());
    }

    #[test]
    fn test_serialized_shims_swallow_errors() {
        let processor = processor();
        // NBest over a word model fails; the shim returns empty bytes.
        let artifact = ModelArtifact {
            trainer: TrainerSpec {
                model_type: ModelType::Word,
                ..TrainerSpec::default()
            },
            ..unigram_artifact()
        };
        let word = Processor::from_artifact(artifact).unwrap();
        assert!(word.nbest_encode_serialized("Hello", 2).is_empty());
        assert!(!processor.encode_serialized("Hello").is_empty());
    }

    #[test]
    fn test_set_vocabulary_restricts_encode() {
        let mut processor = processor();
        // Disallow the multi-byte pieces: only single characters survive.
        processor.set_vocabulary(&[] as &[&str]).unwrap();
        let spt = processor.encode_tokenized("Hello").unwrap();
        let pieces: Vec<_> = spt.pieces.iter().map(|p| p.piece.as_str()).collect();
        assert_eq!(pieces, vec!["\u{2581}", "H", "e", "l", "l", "o"]);

        processor.reset_vocabulary().unwrap();
        let spt = processor.encode_tokenized("Hello").unwrap();
        let pieces: Vec<_> = spt.pieces.iter().map(|p| p.piece.as_str()).collect();
        assert_eq!(pieces, vec!["\u{2581}He", "llo"]);
    }

    #[test]
    fn test_set_vocabulary_allow_set() {
        let mut processor = processor();
        processor.set_vocabulary(&["\u{2581}He", "llo"]).unwrap();
        let spt = processor.encode_tokenized("Hello").unwrap();
        let pieces: Vec<_> = spt.pieces.iter().map(|p| p.piece.as_str()).collect();
        assert_eq!(pieces, vec!["\u{2581}He", "llo"]);
    }

    #[test]
    fn test_set_vocabulary_wrong_model_type() {
        let artifact = ModelArtifact {
            trainer: TrainerSpec {
                model_type: ModelType::Char,
                ..TrainerSpec::default()
            },
            ..unigram_artifact()
        };
        let mut processor = Processor::from_artifact(artifact).unwrap();
        let result = processor.set_vocabulary(&["a"]);
        assert!(matches!(
            result,
            Err(TrocearError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_self_tests_pass_on_load() {
        let artifact = ModelArtifact {
            self_test: vec![SelfTestSample {
                input: "Hello".to_string(),
                expected: "\u{2581}He llo".to_string(),
            }],
            ..unigram_artifact()
        };
        assert!(Processor::from_artifact(artifact).is_ok());
    }

    #[test]
    fn test_self_tests_fail_on_load() {
        let artifact = ModelArtifact {
            self_test: vec![SelfTestSample {
                input: "Hello".to_string(),
                expected: "\u{2581}H e l l o".to_string(),
            }],
            ..unigram_artifact()
        };
        assert!(matches!(
            Processor::from_artifact(artifact),
            Err(TrocearError::Internal { .. })
        ));
    }

    #[test]
    fn test_special_id_accessors() {
        let processor = processor();
        assert_eq!(processor.unk_id(), Some(0));
        assert_eq!(processor.bos_id(), Some(1));
        assert_eq!(processor.eos_id(), Some(2));
        // No <pad> piece: resolves to unknown, which is not control-typed.
        assert_eq!(processor.pad_id(), None);
    }

    #[test]
    fn test_primitive_accessors() {
        let processor = processor();
        assert_eq!(processor.piece_size(), 10);
        assert_eq!(processor.piece_to_id("llo"), 4);
        assert_eq!(processor.id_to_piece(4), "llo");
        assert_eq!(processor.id_to_piece(999), "");
        assert!((processor.score(4) - (-1.5)).abs() < f32::EPSILON);
        assert!((processor.score(999) - 0.0).abs() < f32::EPSILON);
        assert!(processor.is_control(1));
        assert!(processor.is_unknown(0));
        assert!(!processor.is_byte(0));
        assert!(!processor.is_unused(3));
    }

    #[test]
    fn test_encoder_version_roundtrip() {
        let mut processor = processor();
        assert_eq!(processor.encoder_version(), EncoderVersion::Optimized);
        processor.set_encoder_version(EncoderVersion::Original);
        assert_eq!(processor.encoder_version(), EncoderVersion::Original);
        // Vocabulary rebuilds keep the selection.
        processor.set_vocabulary(&["\u{2581}He"]).unwrap();
        assert_eq!(processor.encoder_version(), EncoderVersion::Original);
    }

    #[test]
    fn test_whitespace_only_input() {
        let spt = processor().encode_tokenized("   ").unwrap();
        assert!(spt.pieces.is_empty());
        assert_eq!(spt.text, "   ");
    }
}
