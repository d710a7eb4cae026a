use std::fmt;
use std::str::FromStr;

use chess::{Board, BoardStatus, ChessMove, Color, Game, MoveGen};
use thiserror::Error;

use crate::moves::format_coordinate;

/// A syntactically valid move that is not legal in the current position.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{0} is not legal in the current position")]
pub struct IllegalMove(pub String);

/// Final classification of a finished game.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameOutcome {
    WhiteWins,
    BlackWins,
    Draw,
}

impl fmt::Display for GameOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameOutcome::WhiteWins => write!(f, "White wins"),
            GameOutcome::BlackWins => write!(f, "Black wins"),
            GameOutcome::Draw => write!(f, "Draw"),
        }
    }
}

/// The game position, wrapped around the rules engine.
///
/// All mutation goes through [`GameBoard::apply`], which rejects anything
/// outside [`GameBoard::legal_moves`], so the position is always reachable.
/// One instance is owned by a [`crate::arbiter::GameSession`] for the
/// lifetime of that session.
pub struct GameBoard {
    game: Game,
}

impl GameBoard {
    /// Initial position, White to move.
    pub fn new() -> Self {
        GameBoard { game: Game::new() }
    }

    /// Build a board from a FEN string. Useful for setting up test
    /// positions.
    pub fn from_fen(fen: &str) -> Option<Self> {
        let board = Board::from_str(fen).ok()?;
        Some(GameBoard {
            game: Game::new_with_board(board),
        })
    }

    pub fn side_to_move(&self) -> Color {
        self.game.side_to_move()
    }

    /// Every legal move in the current position. The order follows the
    /// move generator and is deterministic for a given position.
    pub fn legal_moves(&self) -> Vec<ChessMove> {
        MoveGen::new_legal(&self.game.current_position()).collect()
    }

    /// Apply a move, rejecting it unless it is legal right now. This is
    /// the single mutation gate: candidates from the human, the agent and
    /// the fallback engine all pass through here at commit time.
    pub fn apply(&mut self, mv: ChessMove) -> Result<(), IllegalMove> {
        if !self.legal_moves().contains(&mv) {
            return Err(IllegalMove(format_coordinate(mv)));
        }
        if !self.game.make_move(mv) {
            return Err(IllegalMove(format_coordinate(mv)));
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }

    /// Result classification once the game is over, `None` while it is
    /// still running. Draws claimable by rule (threefold repetition,
    /// fifty-move rule) count as over.
    pub fn outcome(&self) -> Option<GameOutcome> {
        let position = self.game.current_position();
        match position.status() {
            BoardStatus::Checkmate => Some(match position.side_to_move() {
                Color::White => GameOutcome::BlackWins,
                Color::Black => GameOutcome::WhiteWins,
            }),
            BoardStatus::Stalemate => Some(GameOutcome::Draw),
            BoardStatus::Ongoing => {
                if self.game.can_declare_draw() {
                    Some(GameOutcome::Draw)
                } else {
                    None
                }
            }
        }
    }

    /// Current position in FEN, for the board-info capability and the
    /// engine transport.
    pub fn fen(&self) -> String {
        self.game.current_position().to_string()
    }

    /// Read-only snapshot for presentational collaborators.
    pub fn position(&self) -> Board {
        self.game.current_position()
    }
}

impl Default for GameBoard {
    fn default() -> Self {
        Self::new()
    }
}
