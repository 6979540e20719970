//! 3x3 Tic-Tac-Toe board: move parsing, legality, and win/draw detection.

use std::fmt;

use crate::codec::Role;
use crate::error::{Result, ServerError};

const WINNING_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Empty,
    First,
    Second,
}

impl Cell {
    fn role(self) -> Role {
        match self {
            Cell::Empty => Role::None,
            Cell::First => Role::First,
            Cell::Second => Role::Second,
        }
    }

    fn from_role(role: Role) -> Cell {
        match role {
            Role::None => Cell::Empty,
            Role::First => Cell::First,
            Role::Second => Cell::Second,
        }
    }

    fn glyph(self) -> char {
        match self {
            Cell::Empty => ' ',
            Cell::First => 'X',
            Cell::Second => 'O',
        }
    }
}

fn parse_piece(c: char) -> Result<Role> {
    match c {
        'X' | 'x' => Ok(Role::First),
        'O' | 'o' => Ok(Role::Second),
        _ => Err(ServerError::InvalidMove("unrecognised piece")),
    }
}

/// A parsed, not-yet-applied move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub cell: usize, // 0..9
    pub role: Role,
}

pub struct Game {
    cells: [Cell; 9],
    turn: Role,
    over: bool,
    winner: Role,
}

impl Game {
    pub fn create() -> Self {
        Game {
            cells: [Cell::Empty; 9],
            turn: Role::First,
            over: false,
            winner: Role::None,
        }
    }

    pub fn turn(&self) -> Role {
        self.turn
    }

    pub fn is_over(&self) -> bool {
        self.over
    }

    pub fn winner(&self) -> Role {
        self.winner
    }

    /// Parses `<cell>` or `<cell><sep><piece>`, e.g. `"5"`, `"5X"`, `"5-X"`.
    /// `cell` is 1..9 mapped left-to-right, top-to-bottom; `piece` is one
    /// of X/O/x/o. Piece-role agreement against the caller's own role is
    /// enforced by the caller, not here.
    pub fn parse_move(text: &str) -> Result<Move> {
        let text = text.trim();
        let mut chars = text.chars().peekable();

        let digit = chars.next().ok_or(ServerError::InvalidMove("empty move"))?;
        if chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            return Err(ServerError::InvalidMove("cell must be a single digit 1..9"));
        }
        let cell_num = digit
            .to_digit(10)
            .filter(|n| (1..=9).contains(n))
            .ok_or(ServerError::InvalidMove("cell must be 1..9"))?;

        let rest: Vec<char> = chars.collect();
        let role = match rest.len() {
            0 => Role::None,
            1 => parse_piece(rest[0])?,
            2 => parse_piece(rest[1])?,
            _ => return Err(ServerError::InvalidMove("malformed move")),
        };

        Ok(Move {
            cell: (cell_num - 1) as usize,
            role,
        })
    }

    /// Unparses a move back into wire text, for round-trip testing.
    pub fn unparse_move(mv: Move) -> String {
        let piece = match mv.role {
            Role::None => "",
            Role::First => "X",
            Role::Second => "O",
        };
        format!("{}{}", mv.cell + 1, piece)
    }

    /// Applies a move, enforcing turn order and cell occupancy. `mv.role`
    /// must already have been checked by the caller to match the acting
    /// client's role.
    pub fn apply_move(&mut self, mv: Move) -> Result<()> {
        if self.over {
            return Err(ServerError::InvalidMove("game already over"));
        }
        if mv.role != self.turn {
            return Err(ServerError::InvalidMove("not this piece's turn"));
        }
        if self.cells[mv.cell] != Cell::Empty {
            return Err(ServerError::InvalidMove("cell already occupied"));
        }

        self.cells[mv.cell] = Cell::from_role(mv.role);
        self.turn = self.turn.other();
        self.check_terminal();
        Ok(())
    }

    pub fn resign(&mut self, role: Role) -> Result<()> {
        if self.over {
            return Err(ServerError::BadState("game already over"));
        }
        self.over = true;
        self.winner = role.other();
        Ok(())
    }

    fn check_terminal(&mut self) {
        for line in WINNING_LINES {
            let [a, b, c] = line;
            if self.cells[a] != Cell::Empty && self.cells[a] == self.cells[b] && self.cells[b] == self.cells[c] {
                self.over = true;
                self.winner = self.cells[a].role();
                return;
            }
        }
        if self.cells.iter().all(|c| *c != Cell::Empty) {
            self.over = true;
            self.winner = Role::None;
        }
    }

    /// Five-line ASCII board. The caller appends a "to move" line while the
    /// game is in progress.
    pub fn unparse_state(&self) -> String {
        let row = |r: usize| {
            let base = r * 3;
            format!(
                "{}|{}|{}",
                self.cells[base].glyph(),
                self.cells[base + 1].glyph(),
                self.cells[base + 2].glyph()
            )
        };
        format!("{}\n-----\n{}\n-----\n{}", row(0), row(1), row(2))
    }

    pub fn to_move_line(&self) -> Option<String> {
        if self.over {
            return None;
        }
        let label = match self.turn {
            Role::First => "X",
            Role::Second => "O",
            Role::None => return None,
        };
        Some(format!("{label} to move"))
    }
}

impl fmt::Debug for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Game {{ turn: {:?}, over: {}, winner: {:?} }}", self.turn, self.over, self.winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_move_accepts_cell_and_piece() {
        let mv = Game::parse_move("5X").unwrap();
        assert_eq!(mv.cell, 4);
        assert_eq!(mv.role, Role::First);
    }

    #[test]
    fn parse_move_accepts_lowercase_piece() {
        let mv = Game::parse_move("1o").unwrap();
        assert_eq!(mv.cell, 0);
        assert_eq!(mv.role, Role::Second);
    }

    #[test]
    fn parse_move_rejects_out_of_range_cell() {
        assert!(Game::parse_move("0X").is_err());
        assert!(Game::parse_move("10X").is_err());
    }

    #[test]
    fn parse_unparse_round_trips() {
        for text in ["1X", "5O", "9X"] {
            let mv = Game::parse_move(text).unwrap();
            assert_eq!(Game::unparse_move(mv), text);
        }
    }

    #[test]
    fn row_win_detected() {
        let mut g = Game::create();
        for mv in ["1X", "4O", "2X", "5O", "3X"] {
            g.apply_move(Game::parse_move(mv).unwrap()).unwrap();
        }
        assert!(g.is_over());
        assert_eq!(g.winner(), Role::First);
    }

    #[test]
    fn draw_detected() {
        let mut g = Game::create();
        // X O X
        // X O O
        // O X X
        let moves = ["1X", "2O", "3X", "5O", "4X", "6O", "8X", "7O", "9X"];
        for mv in moves {
            g.apply_move(Game::parse_move(mv).unwrap()).unwrap();
        }
        assert!(g.is_over());
        assert_eq!(g.winner(), Role::None);
    }

    #[test]
    fn over_flag_is_monotonic() {
        let mut g = Game::create();
        for mv in ["1X", "4O", "2X", "5O", "3X"] {
            g.apply_move(Game::parse_move(mv).unwrap()).unwrap();
        }
        assert!(g.is_over());
        let winner_before = g.winner();
        assert!(g.apply_move(Game::parse_move("7O").unwrap()).is_err());
        assert_eq!(g.winner(), winner_before);
    }

    #[test]
    fn occupied_cell_is_rejected() {
        let mut g = Game::create();
        g.apply_move(Game::parse_move("1X").unwrap()).unwrap();
        assert!(g.apply_move(Game::parse_move("1O").unwrap()).is_err());
    }

    #[test]
    fn out_of_turn_piece_is_rejected() {
        let mut g = Game::create();
        assert!(g.apply_move(Game::parse_move("1O").unwrap()).is_err());
    }

    #[test]
    fn resign_sets_opponent_as_winner() {
        let mut g = Game::create();
        g.resign(Role::First).unwrap();
        assert!(g.is_over());
        assert_eq!(g.winner(), Role::Second);
        assert!(g.resign(Role::Second).is_err());
    }
}
