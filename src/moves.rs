use chess::{ChessMove, File, Piece, Rank, Square};
use thiserror::Error;

/// A string that is not a move in coordinate notation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0:?} is not a move in coordinate notation")]
pub struct MalformedMove(pub String);

/// Parse coordinate notation, e.g. "e2e4", "a7a8q".
///
/// Accepts exactly four or five characters: origin square, destination
/// square, optional promotion piece (q/r/b/n). The result is only a
/// syntactically well-formed candidate; legality is checked by the board.
pub fn parse_coordinate(s: &str) -> Result<ChessMove, MalformedMove> {
    let malformed = || MalformedMove(s.to_string());

    let bytes = s.as_bytes();
    if bytes.len() < 4 || bytes.len() > 5 {
        return Err(malformed());
    }

    let square = |file: u8, rank: u8| -> Option<Square> {
        if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
            return None;
        }
        Some(Square::make_square(
            Rank::from_index((rank - b'1') as usize),
            File::from_index((file - b'a') as usize),
        ))
    };

    let from = square(bytes[0], bytes[1]).ok_or_else(malformed)?;
    let to = square(bytes[2], bytes[3]).ok_or_else(malformed)?;
    let promotion = match bytes.get(4).copied() {
        None => None,
        Some(b'q') => Some(Piece::Queen),
        Some(b'r') => Some(Piece::Rook),
        Some(b'b') => Some(Piece::Bishop),
        Some(b'n') => Some(Piece::Knight),
        Some(_) => return Err(malformed()),
    };

    Ok(ChessMove::new(from, to, promotion))
}

/// Format a move back to coordinate notation, e.g. "e2e4", "a7a8q".
pub fn format_coordinate(mv: ChessMove) -> String {
    let promo = match mv.get_promotion() {
        Some(Piece::Queen) => "q",
        Some(Piece::Rook) => "r",
        Some(Piece::Bishop) => "b",
        Some(Piece::Knight) => "n",
        _ => "",
    };
    format!("{}{}{}", mv.get_source(), mv.get_dest(), promo)
}
