//! Unigram segmentation kernel
//!
//! Finds the most likely segmentation of normalized text under per-piece log
//! probabilities with a Viterbi pass over the byte lattice. Also provides
//! exact n-best enumeration (per-position top-k hypothesis lists) and
//! segmentation sampling (forward-filtering backward-sampling with
//! temperature `alpha`).

use rand::{Rng, RngCore};

use crate::error::{Result, TrocearError};
use crate::model::{EncodeResult, ScoredEncodeResult, SubwordModel, Vocab};

// Score handicap for codepoints no piece covers, below the worst piece.
const UNK_PENALTY: f32 = 10.0;

/// One lattice edge: piece span ending at `end`
///
/// `id` is `None` for the synthetic unknown edge covering one codepoint.
#[derive(Debug, Clone, Copy)]
struct Edge {
    end: usize,
    id: Option<u32>,
    score: f32,
}

/// Unigram language-model kernel
#[derive(Debug, Clone)]
pub struct UnigramModel {
    vocab: Vocab,
    unk_penalty: f32,
}

impl UnigramModel {
    /// Wrap a vocabulary table
    #[must_use]
    pub fn new(vocab: Vocab) -> Self {
        let unk_penalty = vocab.min_score() - UNK_PENALTY;
        Self { vocab, unk_penalty }
    }

    /// Lattice edges leaving byte position `start`
    ///
    /// Matches every vocabulary piece prefixing `normalized[start..]`; when
    /// no single-codepoint piece matches, a synthetic unknown edge covers the
    /// codepoint so every position stays reachable.
    fn edges_at(&self, normalized: &str, start: usize) -> Vec<Edge> {
        let tail = &normalized[start..];
        let char_len = tail.chars().next().map_or(0, char::len_utf8);
        let mut edges = Vec::new();
        let mut has_single = false;

        let max_len = self.vocab.max_piece_len().min(tail.len());
        for len in 1..=max_len {
            let end = start + len;
            if !normalized.is_char_boundary(end) {
                continue;
            }
            if let Some(id) = self.vocab.lookup(&normalized[start..end]) {
                if self.vocab.is_matchable(id) {
                    edges.push(Edge {
                        end,
                        id: Some(id),
                        score: self.vocab.score(id),
                    });
                    has_single |= len == char_len;
                }
            }
        }

        if !has_single && char_len > 0 {
            edges.push(Edge {
                end: start + char_len,
                id: None,
                score: self.unk_penalty,
            });
        }

        edges
    }

    /// Materialize an edge as an emitted `(piece, id)` pair
    fn emit(&self, normalized: &str, start: usize, edge: Edge) -> (String, u32) {
        match edge.id {
            Some(id) => (self.vocab.id_to_piece(id).to_string(), id),
            None => (
                normalized[start..edge.end].to_string(),
                self.vocab.unk_id(),
            ),
        }
    }

    /// Total vocabulary score of a space-joined piece sequence
    fn sequence_score(&self, joined: &str) -> f32 {
        joined
            .split(' ')
            .filter(|p| !p.is_empty())
            .map(|p| self.vocab.score(self.vocab.piece_to_id(p)))
            .sum()
    }
}

fn log_add_exp(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let hi = a.max(b);
    hi + ((a - hi).exp() + (b - hi).exp()).ln()
}

impl SubwordModel for UnigramModel {
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
        let n = normalized.len();

        // Viterbi: best_score[i] is the best path score reaching byte i,
        // back[i] the (start, edge) that achieved it.
        let mut best_score = vec![f32::NEG_INFINITY; n + 1];
        let mut back: Vec<Option<(usize, Edge)>> = vec![None; n + 1];
        best_score[0] = 0.0;

        for start in 0..n {
            if !normalized.is_char_boundary(start) || best_score[start] == f32::NEG_INFINITY {
                continue;
            }
            for edge in self.edges_at(normalized, start) {
                let total = best_score[start] + edge.score;
                if total > best_score[edge.end] {
                    best_score[edge.end] = total;
                    back[edge.end] = Some((start, edge));
                }
            }
        }

        let mut result = Vec::new();
        let mut pos = n;
        while pos > 0 {
            // Unknown edges keep every position reachable.
            let Some((start, edge)) = back[pos] else {
                return Err(TrocearError::internal("segmentation lattice is disconnected"));
            };
            result.push(self.emit(normalized, start, edge));
            pos = start;
        }
        result.reverse();
        Ok(result)
    }

    fn nbest_encode(&self, normalized: &str, n: usize) -> Result<Vec<ScoredEncodeResult>> {
        if normalized.is_empty() {
            return Ok(vec![(Vec::new(), 0.0)]);
        }
        let n = n.max(1);
        let len = normalized.len();

        // Per-position top-n hypothesis lists. A hypothesis records the edge
        // that reached this position and which ranked hypothesis it extended.
        #[derive(Clone, Copy)]
        struct Hyp {
            score: f32,
            start: usize,
            rank: usize,
            edge: Edge,
        }

        let mut hyps: Vec<Vec<Hyp>> = vec![Vec::new(); len + 1];
        hyps[0].push(Hyp {
            score: 0.0,
            start: 0,
            rank: 0,
            edge: Edge {
                end: 0,
                id: None,
                score: 0.0,
            },
        });

        for start in 0..len {
            if !normalized.is_char_boundary(start) || hyps[start].is_empty() {
                continue;
            }
            // All contributions to this position arrived already; fix its
            // ranking before expanding so ranks stay valid for backtracking.
            hyps[start].sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            hyps[start].truncate(n);
            let sources = hyps[start].clone();
            for edge in self.edges_at(normalized, start) {
                for (rank, hyp) in sources.iter().enumerate() {
                    hyps[edge.end].push(Hyp {
                        score: hyp.score + edge.score,
                        start,
                        rank,
                        edge,
                    });
                }
            }
        }

        hyps[len].sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hyps[len].truncate(n);

        let mut nbests = Vec::with_capacity(hyps[len].len());
        for i in 0..hyps[len].len() {
            let mut pieces = Vec::new();
            let mut pos = len;
            let mut rank = i;
            while pos > 0 {
                let hyp = hyps[pos][rank];
                pieces.push(self.emit(normalized, hyp.start, hyp.edge));
                rank = hyp.rank;
                pos = hyp.start;
            }
            pieces.reverse();
            nbests.push((pieces, hyps[len][i].score));
        }
        Ok(nbests)
    }

    fn sample_encode(
        &self,
        normalized: &str,
        alpha: f32,
        rng: &mut dyn RngCore,
    ) -> Result<EncodeResult> {
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        let n = normalized.len();

        // Forward filtering: marginal log mass of all paths reaching each
        // byte position, with scores flattened by alpha.
        let mut forward = vec![f32::NEG_INFINITY; n + 1];
        forward[0] = 0.0;
        let mut by_end: Vec<Vec<(usize, Edge)>> = vec![Vec::new(); n + 1];

        for start in 0..n {
            if !normalized.is_char_boundary(start) || forward[start] == f32::NEG_INFINITY {
                continue;
            }
            for edge in self.edges_at(normalized, start) {
                forward[edge.end] =
                    log_add_exp(forward[edge.end], forward[start] + alpha * edge.score);
                by_end[edge.end].push((start, edge));
            }
        }

        // Backward sampling: at each position draw an incoming edge with
        // probability proportional to its share of the forward mass.
        let mut result = Vec::new();
        let mut pos = n;
        while pos > 0 {
            let incoming = &by_end[pos];
            if incoming.is_empty() {
                return Err(TrocearError::internal("sampling lattice is disconnected"));
            }
            let weights: Vec<f32> = incoming
                .iter()
                .map(|(start, edge)| (forward[*start] + alpha * edge.score - forward[pos]).exp())
                .collect();
            let total: f32 = weights.iter().sum();
            let mut draw = rng.random::<f32>() * total;
            let mut chosen = incoming.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if draw < *w {
                    chosen = i;
                    break;
                }
                draw -= w;
            }
            let (start, edge) = incoming[chosen];
            result.push(self.emit(normalized, start, edge));
            pos = start;
        }
        result.reverse();
        Ok(result)
    }

    fn nbest_available(&self) -> bool {
        true
    }

    fn sample_available(&self) -> bool {
        true
    }

    /// Segmentations are equivalent when their total scores agree
    fn verify_outputs_equivalent(&self, expected: &str, actual: &str) -> bool {
        (self.sequence_score(expected) - self.sequence_score(actual)).abs() < 1e-4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ModelArtifact, PieceType, VocabPiece};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model(pieces: Vec<VocabPiece>) -> UnigramModel {
        let artifact = ModelArtifact {
            pieces,
            ..ModelArtifact::default()
        };
        UnigramModel::new(Vocab::build(&artifact).unwrap())
    }

    fn hello_model() -> UnigramModel {
        model(vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::normal("h", -5.0),
            VocabPiece::normal("e", -5.0),
            VocabPiece::normal("l", -5.0),
            VocabPiece::normal("o", -5.0),
            VocabPiece::normal("he", -2.0),
            VocabPiece::normal("llo", -2.0),
            VocabPiece::normal("hello", -1.0),
        ])
    }

    fn pieces_of(result: &EncodeResult) -> Vec<&str> {
        result.iter().map(|(p, _)| p.as_str()).collect()
    }

    #[test]
    fn test_encode_prefers_higher_score() {
        let result = hello_model().encode("hello").unwrap();
        assert_eq!(pieces_of(&result), vec!["hello"]);
    }

    #[test]
    fn test_encode_subwords() {
        let model = model(vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::normal("he", -0.5),
            VocabPiece::normal("llo", -0.5),
            VocabPiece::normal("h", -1.0),
            VocabPiece::normal("e", -1.0),
            VocabPiece::normal("l", -1.0),
            VocabPiece::normal("o", -1.0),
        ]);
        let result = model.encode("hello").unwrap();
        assert_eq!(pieces_of(&result), vec!["he", "llo"]);
    }

    #[test]
    fn test_encode_empty() {
        assert!(hello_model().encode("").unwrap().is_empty());
    }

    #[test]
    fn test_encode_unknown_codepoints() {
        let model = model(vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::normal("h", -1.0),
            VocabPiece::normal("i", -1.0),
        ]);
        let result = model.encode("hix").unwrap();
        assert_eq!(pieces_of(&result), vec!["h", "i", "x"]);
        let unk = model.vocab().unk_id();
        assert_eq!(result[2].1, unk);
        assert_ne!(result[0].1, unk);
    }

    #[test]
    fn test_encode_multibyte_unknown() {
        let model = model(vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::normal("a", -1.0),
        ]);
        let result = model.encode("a\u{20ac}a").unwrap();
        assert_eq!(pieces_of(&result), vec!["a", "\u{20ac}", "a"]);
        assert_eq!(result[1].1, model.vocab().unk_id());
    }

    #[test]
    fn test_encode_skips_unused_pieces() {
        let model = model(vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::typed("hello", -1.0, PieceType::Unused),
            VocabPiece::normal("he", -2.0),
            VocabPiece::normal("llo", -2.0),
        ]);
        let result = model.encode("hello").unwrap();
        assert_eq!(pieces_of(&result), vec!["he", "llo"]);
    }

    #[test]
    fn test_encode_matches_user_defined() {
        let model = model(vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::typed("<sym>", 0.0, PieceType::UserDefined),
            VocabPiece::normal("a", -1.0),
        ]);
        let result = model.encode("a<sym>a").unwrap();
        assert_eq!(pieces_of(&result), vec!["a", "<sym>", "a"]);
    }

    #[test]
    fn test_nbest_orders_by_score() {
        let nbests = hello_model().nbest_encode("hello", 3).unwrap();
        assert_eq!(nbests.len(), 3);
        assert_eq!(pieces_of(&nbests[0].0), vec!["hello"]);
        assert!((nbests[0].1 - (-1.0)).abs() < 1e-5);
        // Scores are non-increasing.
        for pair in nbests.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
        assert_eq!(pieces_of(&nbests[1].0), vec!["he", "llo"]);
        assert!((nbests[1].1 - (-4.0)).abs() < 1e-5);
    }

    #[test]
    fn test_nbest_fewer_than_requested() {
        let model = model(vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::normal("ab", -1.0),
        ]);
        let nbests = model.nbest_encode("ab", 10).unwrap();
        // "ab" as one piece, or two unknown codepoints, or unknown+unknown
        // variants; all distinct hypotheses the lattice yields.
        assert!(!nbests.is_empty());
        assert!(nbests.len() <= 10);
        assert_eq!(pieces_of(&nbests[0].0), vec!["ab"]);
    }

    #[test]
    fn test_sample_encode_deterministic_rng() {
        let model = hello_model();
        let mut rng = StdRng::seed_from_u64(42);
        let a = model.sample_encode("hello", 0.5, &mut rng).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let b = model.sample_encode("hello", 0.5, &mut rng).unwrap();
        assert_eq!(a, b);
        // Whatever was drawn concatenates back to the input.
        let joined: String = a.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(joined, "hello");
    }

    #[test]
    fn test_sample_encode_high_alpha_is_greedy() {
        // A sharp distribution concentrates all mass on the best path.
        let model = hello_model();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let result = model.sample_encode("hello", 100.0, &mut rng).unwrap();
            assert_eq!(pieces_of(&result), vec!["hello"]);
        }
    }

    #[test]
    fn test_capabilities() {
        let model = hello_model();
        assert!(model.nbest_available());
        assert!(model.sample_available());
    }

    #[test]
    fn test_verify_outputs_equivalent_by_score() {
        let model = model(vec![
            VocabPiece::typed("<unk>", 0.0, PieceType::Unknown),
            VocabPiece::normal("ab", -2.0),
            VocabPiece::normal("a", -1.0),
            VocabPiece::normal("b", -1.0),
        ]);
        // Same total score, different pieces.
        assert!(model.verify_outputs_equivalent("ab", "a b"));
        assert!(!model.verify_outputs_equivalent("ab", "a"));
    }

    #[test]
    fn test_log_add_exp() {
        let sum = log_add_exp(0.0_f32.ln(), 0.0_f32.ln());
        assert_eq!(sum, f32::NEG_INFINITY);
        let sum = log_add_exp(1.0_f32.ln(), 1.0_f32.ln());
        assert!((sum - 2.0_f32.ln()).abs() < 1e-6);
    }
}
