//! Normalized positions and evaluation requests.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize, Serializer};

use crate::error::RulesError;

/// FEN of the standard starting position.
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

/// A board state.
///
/// The key holds the four FEN fields that decide what an engine will say
/// about the position: placement, side to move, castling rights and the en
/// passant target. Move clocks are carried along for display but are not
/// part of equality or hashing, so transpositions share cache entries.
#[derive(Debug, Clone)]
pub struct Position {
    key: String,
    halfmove: u32,
    fullmove: u32,
}

impl Position {
    /// Split a FEN into key and clocks without checking board legality.
    ///
    /// Missing clocks default to `0 1`. Use [`crate::RulesEngine::parse_fen`]
    /// to get a canonical key for an arbitrary FEN.
    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        let invalid = |reason: &str| RulesError::InvalidFen {
            fen: fen.to_string(),
            reason: reason.to_string(),
        };

        if fields.len() < 4 || fields.len() > 6 {
            return Err(invalid("expected 4 to 6 fields"));
        }
        if fields[0].split('/').count() != 8 {
            return Err(invalid("placement must have 8 ranks"));
        }
        if !matches!(fields[1], "w" | "b") {
            return Err(invalid("side to move must be 'w' or 'b'"));
        }
        let halfmove = match fields.get(4) {
            Some(h) => h.parse().map_err(|_| invalid("bad halfmove clock"))?,
            None => 0,
        };
        let fullmove = match fields.get(5) {
            Some(f) => f.parse().map_err(|_| invalid("bad fullmove number"))?,
            None => 1,
        };

        Ok(Self {
            key: fields[..4].join(" "),
            halfmove,
            fullmove: fullmove.max(1),
        })
    }

    pub(crate) fn from_parts(key: String, halfmove: u32, fullmove: u32) -> Self {
        Self { key, halfmove, fullmove }
    }

    /// The standard starting position.
    pub fn startpos() -> Self {
        Self::from_parts(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq -".to_string(),
            0,
            1,
        )
    }

    /// The normalized key: placement, side to move, castling, en passant.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Full six-field FEN.
    pub fn fen(&self) -> String {
        format!("{} {} {}", self.key, self.halfmove, self.fullmove)
    }

    pub fn side_to_move(&self) -> Side {
        match self.key.split(' ').nth(1) {
            Some("b") => Side::Black,
            _ => Side::White,
        }
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove
    }

    /// Number of knights, bishops, rooks and queens of both colors.
    pub fn non_pawn_material(&self) -> u32 {
        self.key
            .split(' ')
            .next()
            .unwrap_or_default()
            .chars()
            .filter(|c| matches!(c.to_ascii_lowercase(), 'n' | 'b' | 'r' | 'q'))
            .count() as u32
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Position {}

impl Hash for Position {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fen())
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.fen())
    }
}

/// How long the engine should search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchLimit {
    /// Search to a fixed depth in plies.
    Depth(u32),
    /// Search for a fixed time in milliseconds.
    MoveTime(u64),
}

impl fmt::Display for SearchLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchLimit::Depth(d) => write!(f, "depth {}", d),
            SearchLimit::MoveTime(ms) => write!(f, "movetime {}", ms),
        }
    }
}

/// One unit of engine work, and the cache key for its result.
///
/// Requests that differ in limit or line count are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AnalysisRequest {
    pub position: Position,
    pub limit: SearchLimit,
    pub lines: u32,
}

impl AnalysisRequest {
    pub fn new(position: Position, limit: SearchLimit, lines: u32) -> Self {
        Self { position, limit, lines: lines.max(1) }
    }
}
