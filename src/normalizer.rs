//! Text normalization with source-offset tracking
//!
//! Rewrites raw input into the normalized form the subword kernels segment:
//! charmap rules, whitespace trimming/collapsing, meta-space escaping and the
//! dummy whitespace prefix (or suffix). Alongside the normalized string the
//! normalizer produces `norm_to_orig`, mapping every normalized byte position
//! to the original-input byte offset it came from; the map carries one extra
//! trailing entry so piece end boundaries can be resolved, giving it length
//! `normalized.len() + 1`.
//!
//! The same type drives denormalization after decoding: a denormalizer is a
//! normalizer with only charmap rules and every whitespace policy disabled.

use std::borrow::Cow;

use crate::artifact::{DenormalizerSpec, NormalizerSpec};

/// The meta-space marker U+2581, standing in for whitespace inside pieces
pub const SPACE_SYMBOL: &str = "\u{2581}";

/// Length in bytes of the UTF-8 sequence started by `b`
pub(crate) fn one_char_len(b: u8) -> usize {
    match b {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 1,
    }
}

/// Longest-prefix matcher over user-defined piece spellings
///
/// Spans matched here are copied into the normalized output verbatim so that
/// charmap rules never rewrite across a user-defined symbol.
#[derive(Debug, Clone, Default)]
pub struct PrefixMatcher {
    // Sorted longest-first so the first hit is the longest match.
    pieces: Vec<String>,
}

impl PrefixMatcher {
    /// Build a matcher from piece spellings; empty spellings are dropped
    #[must_use]
    pub fn new(pieces: impl IntoIterator<Item = String>) -> Self {
        let mut pieces: Vec<String> = pieces.into_iter().filter(|p| !p.is_empty()).collect();
        pieces.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        pieces.dedup();
        Self { pieces }
    }

    /// Whether the matcher holds no pieces
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Byte length of the longest piece that prefixes `s`, if any
    #[must_use]
    pub fn prefix_match(&self, s: &str) -> Option<usize> {
        self.pieces
            .iter()
            .find(|p| s.starts_with(p.as_str()))
            .map(String::len)
    }
}

/// Charmap-and-whitespace normalizer
#[derive(Debug, Clone)]
pub struct Normalizer {
    // Sorted longest-source-first for longest-match rewriting.
    rules: Vec<(String, String)>,
    add_dummy_prefix: bool,
    remove_extra_whitespaces: bool,
    escape_whitespaces: bool,
    treat_whitespace_as_suffix: bool,
    matcher: PrefixMatcher,
}

fn sort_rules(mut rules: Vec<(String, String)>) -> Vec<(String, String)> {
    rules.retain(|(src, _)| !src.is_empty());
    rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    rules
}

impl Normalizer {
    /// Build a normalizer from an artifact spec
    #[must_use]
    pub fn new(spec: &NormalizerSpec) -> Self {
        Self {
            rules: sort_rules(spec.char_map.clone()),
            add_dummy_prefix: spec.add_dummy_prefix,
            remove_extra_whitespaces: spec.remove_extra_whitespaces,
            escape_whitespaces: spec.escape_whitespaces,
            treat_whitespace_as_suffix: spec.treat_whitespace_as_suffix,
            matcher: PrefixMatcher::default(),
        }
    }

    /// Build a denormalizer: charmap rules only, no whitespace policies
    #[must_use]
    pub fn denormalizer(spec: &DenormalizerSpec) -> Self {
        Self {
            rules: sort_rules(spec.char_map.clone()),
            add_dummy_prefix: false,
            remove_extra_whitespaces: false,
            escape_whitespaces: false,
            treat_whitespace_as_suffix: false,
            matcher: PrefixMatcher::default(),
        }
    }

    /// Install the user-defined-symbol matcher
    pub fn set_prefix_matcher(&mut self, matcher: PrefixMatcher) {
        self.matcher = matcher;
    }

    /// Normalize one chunk at the head of `rest`
    ///
    /// Returns the replacement text and the number of input bytes consumed.
    /// User-defined symbols and unmatched codepoints pass through verbatim.
    fn normalize_prefix<'a>(&'a self, rest: &'a str) -> (Cow<'a, str>, usize) {
        if let Some(len) = self.matcher.prefix_match(rest) {
            return (Cow::Borrowed(&rest[..len]), len);
        }
        for (src, tgt) in &self.rules {
            if rest.starts_with(src.as_str()) {
                return (Cow::Borrowed(tgt.as_str()), src.len());
            }
        }
        let len = rest.chars().next().map_or(0, char::len_utf8);
        (Cow::Borrowed(&rest[..len]), len)
    }

    /// Normalize `input`, producing the normalized text and the offset map
    ///
    /// `norm_to_orig[i]` is the original byte offset aligned with normalized
    /// byte `i`; the map has `normalized.len() + 1` entries and the final
    /// entry closes the last span.
    #[must_use]
    pub fn normalize(&self, input: &str) -> (String, Vec<usize>) {
        let mut normalized = String::new();
        let mut norm_to_orig: Vec<usize> = Vec::with_capacity(input.len() + 1);

        let mut consumed = 0usize;

        // Leading whitespace is dropped before the dummy prefix goes in.
        if self.remove_extra_whitespaces {
            while consumed < input.len() {
                let (out, len) = self.normalize_prefix(&input[consumed..]);
                if out != " " {
                    break;
                }
                consumed += len;
            }
        }

        if consumed == input.len() {
            norm_to_orig.push(input.len());
            return (normalized, norm_to_orig);
        }

        let ws: &str = if self.escape_whitespaces {
            SPACE_SYMBOL
        } else {
            " "
        };

        if self.add_dummy_prefix && !self.treat_whitespace_as_suffix {
            normalized.push_str(ws);
            norm_to_orig.extend(std::iter::repeat(consumed).take(ws.len()));
        }

        let mut is_prev_space = self.remove_extra_whitespaces;
        while consumed < input.len() {
            let (out, len) = self.normalize_prefix(&input[consumed..]);
            for ch in out.chars() {
                if ch == ' ' {
                    if self.remove_extra_whitespaces && is_prev_space {
                        continue;
                    }
                    is_prev_space = true;
                    normalized.push_str(ws);
                    norm_to_orig.extend(std::iter::repeat(consumed).take(ws.len()));
                } else {
                    is_prev_space = false;
                    normalized.push(ch);
                    norm_to_orig.extend(std::iter::repeat(consumed).take(ch.len_utf8()));
                }
            }
            consumed += len;
        }

        // Boundary offset for the final map entry; pulled back when a
        // trailing space is stripped.
        let mut tail = input.len();

        if self.remove_extra_whitespaces {
            while normalized.ends_with(ws) {
                let len = normalized.len() - ws.len();
                tail = norm_to_orig[len];
                normalized.truncate(len);
                norm_to_orig.truncate(len);
            }
        }

        if self.add_dummy_prefix && self.treat_whitespace_as_suffix {
            normalized.push_str(ws);
            norm_to_orig.extend(std::iter::repeat(tail).take(ws.len()));
        }

        norm_to_orig.push(tail);
        debug_assert_eq!(norm_to_orig.len(), normalized.len() + 1);

        (normalized, norm_to_orig)
    }
}
