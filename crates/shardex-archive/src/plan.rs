//! Pure piece arithmetic for byte-range extraction.
//!
//! A byte-range job starts from an absolute payload offset and a torrent's
//! fixed piece length. The planner decides which leading pieces must be
//! fetched before the entry header can be located, and, once framing has
//! produced the payload end offset, which piece closes the range. It holds
//! no state and performs no I/O; the extractor drives piece priorities
//! through the torrent driver using these numbers.

/// The leading slice of a byte-range download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiecePlan {
    /// Piece containing the payload start.
    pub first_piece: u32,
    /// Absolute offset of the first byte of the leading buffer.
    ///
    /// When the previous piece is part of the plan this is that piece's
    /// start, so a buffer concatenated in plan order begins here.
    pub piece_start: u64,
    /// Pieces to fetch before framing, in index order.
    pub leading: Vec<u32>,
}

/// Compute the leading pieces for a payload at absolute offset `offset`.
///
/// The entry header precedes the payload by at most 512 bytes (a full TAR
/// block; a ZIP local header plus name is far smaller). When the payload
/// starts less than 512 bytes into its piece, the previous piece is needed
/// so the backward header scan can cross the boundary; otherwise the next
/// piece is fetched eagerly so a complete header and name are guaranteed to
/// be in the buffer.
///
/// # Panics
///
/// Panics if `piece_length` is zero; torrent metadata never reports that.
#[must_use]
pub fn leading_pieces(piece_length: u64, offset: u64, num_pieces: u32) -> PiecePlan {
    assert!(piece_length > 0, "piece length must be positive");
    let first_piece = u32::try_from(offset / piece_length).unwrap_or(u32::MAX);
    let offset_in_piece = offset % piece_length;

    let mut leading = Vec::with_capacity(2);
    let piece_start;
    if offset_in_piece < 512 && first_piece > 0 {
        leading.push(first_piece - 1);
        leading.push(first_piece);
        piece_start = u64::from(first_piece - 1) * piece_length;
    } else {
        leading.push(first_piece);
        if first_piece + 1 < num_pieces {
            leading.push(first_piece + 1);
        }
        piece_start = u64::from(first_piece) * piece_length;
    }

    PiecePlan {
        first_piece,
        piece_start,
        leading,
    }
}

/// Piece containing the last payload byte.
///
/// `end_offset` is exclusive (one past the last byte), as produced by the
/// framing layer; an empty payload closes in the piece its start falls in.
#[must_use]
pub fn last_piece(piece_length: u64, end_offset: u64) -> u32 {
    assert!(piece_length > 0, "piece length must be positive");
    let last_byte = end_offset.saturating_sub(1);
    u32::try_from(last_byte / piece_length).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_inside_first_piece_pulls_the_next_piece() {
        // No previous piece exists, so the eager-next rule applies instead.
        let plan = leading_pieces(16_384, 30, 4);
        assert_eq!(plan.first_piece, 0);
        assert_eq!(plan.piece_start, 0);
        assert_eq!(plan.leading, vec![0, 1]);
    }

    #[test]
    fn offset_just_past_block_boundary_stays_forward() {
        // 512 into the piece: the header fits behind the payload, fetch
        // first + next.
        let plan = leading_pieces(32_768, 512, 2);
        assert_eq!(plan.first_piece, 0);
        assert_eq!(plan.leading, vec![0, 1]);
        assert_eq!(plan.piece_start, 0);
    }

    #[test]
    fn shallow_offset_in_later_piece_pulls_the_previous_piece() {
        let plan = leading_pieces(1_024, 1_038, 8);
        assert_eq!(plan.first_piece, 1);
        assert_eq!(plan.leading, vec![0, 1]);
        assert_eq!(plan.piece_start, 0);
    }

    #[test]
    fn boundary_cases_for_the_two_piece_rule() {
        let piece = 4_096_u64;

        // o mod P == 0 in a later piece: previous piece required.
        let at_zero = leading_pieces(piece, piece * 3, 8);
        assert_eq!(at_zero.leading, vec![2, 3]);
        assert_eq!(at_zero.piece_start, piece * 2);

        // o mod P == 1: still shallow.
        let at_one = leading_pieces(piece, piece * 3 + 1, 8);
        assert_eq!(at_one.leading, vec![2, 3]);

        // o mod P == 511: last shallow offset.
        let at_511 = leading_pieces(piece, piece * 3 + 511, 8);
        assert_eq!(at_511.leading, vec![2, 3]);

        // o mod P == 512: first forward offset.
        let at_512 = leading_pieces(piece, piece * 3 + 512, 8);
        assert_eq!(at_512.leading, vec![3, 4]);
        assert_eq!(at_512.piece_start, piece * 3);

        // o mod P == P-1: deep in the piece.
        let at_last = leading_pieces(piece, piece * 4 - 1, 8);
        assert_eq!(at_last.leading, vec![3, 4]);
    }

    #[test]
    fn eager_next_piece_is_skipped_past_the_torrent_end() {
        let plan = leading_pieces(16_384, 600, 1);
        assert_eq!(plan.leading, vec![0]);
    }

    #[test]
    fn last_piece_covers_the_final_byte() {
        assert_eq!(last_piece(1_024, 1_538), 1);
        assert_eq!(last_piece(16_384, 36), 0);
        // Exclusive end exactly on a boundary does not drag in the next piece.
        assert_eq!(last_piece(1_024, 2_048), 1);
        // Empty payload closes where it starts.
        assert_eq!(last_piece(1_024, 0), 0);
    }
}
