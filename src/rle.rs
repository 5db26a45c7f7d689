//! Run-length compression of repeated pieces
//!
//! The string and id encode paths fold maximal runs of identical pieces into
//! a compact control-token form:
//!
//! ```text
//! a a a b b   ->   a (#startrepeat) 3 (#endrepeat) b (#startrepeat) 2 (#endrepeat)
//! ```
//!
//! The count is spelled as individual decimal digit pieces, most significant
//! first. Decode paths invert the transform before any other processing.
//! Digit pieces are the literal spellings `"0"`..`"9"`; a vocabulary piece
//! with one of those spellings is indistinguishable from a count digit
//! between the markers.

use crate::error::{Result, TrocearError};
use crate::model::SubwordModel;

/// Marker opening a run-length count
pub const START_REPEAT: &str = "(#startrepeat)";

/// Marker closing a run-length count
pub const END_REPEAT: &str = "(#endrepeat)";

/// Fold maximal runs of identical pieces into run-length form
///
/// Runs of length one pass through unchanged.
#[must_use]
pub fn fold(pieces: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(pieces.len());
    let mut i = 0;
    while i < pieces.len() {
        let mut run = 1;
        while i + run < pieces.len() && pieces[i + run] == pieces[i] {
            run += 1;
        }
        out.push(pieces[i].clone());
        if run > 1 {
            out.push(START_REPEAT.to_string());
            for digit in run.to_string().chars() {
                out.push(digit.to_string());
            }
            out.push(END_REPEAT.to_string());
        }
        i += run;
    }
    out
}

fn parse_count<'a>(digits: impl Iterator<Item = &'a str>) -> Result<usize> {
    let mut count: usize = 0;
    let mut seen = false;
    for digit in digits {
        seen = true;
        let value = match digit.as_bytes() {
            [b @ b'0'..=b'9'] => usize::from(b - b'0'),
            _ => {
                return Err(TrocearError::internal(format!(
                    "run-length count holds a non-digit piece: {digit}"
                )))
            }
        };
        count = count
            .checked_mul(10)
            .and_then(|c| c.checked_add(value))
            .ok_or_else(|| TrocearError::internal("run-length count overflows"))?;
    }
    if !seen {
        return Err(TrocearError::internal("run-length count is empty"));
    }
    if count == 0 {
        return Err(TrocearError::internal("run-length count is zero"));
    }
    Ok(count)
}

fn end_marker_position<T: PartialEq>(pieces: &[T], start_pos: usize, end: &T) -> Result<usize> {
    let end_pos = pieces.iter().position(|p| p == end).ok_or_else(|| {
        TrocearError::internal("run-length start marker without a matching end marker")
    })?;
    if end_pos < start_pos {
        return Err(TrocearError::internal(
            "run-length end marker precedes the start marker",
        ));
    }
    if start_pos == 0 {
        return Err(TrocearError::internal(
            "run-length start marker has no preceding repeat symbol",
        ));
    }
    Ok(end_pos)
}

/// Invert [`fold`] over piece strings
///
/// Repeatedly resolves the first marker pair: the piece before the start
/// marker is the repeat symbol, the digit pieces between the markers form the
/// count `k`, and the marker span collapses so the symbol appears `k` times.
///
/// # Errors
///
/// Returns [`TrocearError::Internal`] on malformed input: an end marker
/// before the first start marker, an unmatched start marker, a missing
/// repeat symbol, a non-digit count piece, or a zero count.
pub fn unfold(pieces: &[String]) -> Result<Vec<String>> {
    let mut pieces = pieces.to_vec();
    let end = END_REPEAT.to_string();
    while let Some(start_pos) = pieces.iter().position(|p| p == START_REPEAT) {
        let end_pos = end_marker_position(&pieces, start_pos, &end)?;
        let count = parse_count(pieces[start_pos + 1..end_pos].iter().map(String::as_str))?;
        let symbol = pieces[start_pos - 1].clone();
        pieces.splice(
            start_pos..=end_pos,
            std::iter::repeat(symbol).take(count - 1),
        );
    }
    Ok(pieces)
}

/// Invert [`fold`] over piece ids
///
/// The same algorithm as [`unfold`], resolving markers and digit pieces
/// through the model's vocabulary. When the vocabulary does not define the
/// marker pieces the input cannot hold a run and passes through unchanged.
///
/// # Errors
///
/// As [`unfold`].
pub fn unfold_ids(ids: &[u32], model: &dyn SubwordModel) -> Result<Vec<u32>> {
    let start_id = model.piece_to_id(START_REPEAT);
    let end_id = model.piece_to_id(END_REPEAT);
    if model.id_to_piece(start_id) != START_REPEAT || model.id_to_piece(end_id) != END_REPEAT {
        return Ok(ids.to_vec());
    }

    let mut ids = ids.to_vec();
    while let Some(start_pos) = ids.iter().position(|&id| id == start_id) {
        let end_pos = end_marker_position(&ids, start_pos, &end_id)?;
        let count = parse_count(
            ids[start_pos + 1..end_pos]
                .iter()
                .map(|&id| model.id_to_piece(id)),
        )?;
        let symbol = ids[start_pos - 1];
        ids.splice(
            start_pos..=end_pos,
            std::iter::repeat(symbol).take(count - 1),
        );
    }
    Ok(ids)
}
