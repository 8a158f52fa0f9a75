//! Chess position evaluation types.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::position::AnalysisRequest;

/// Largest mate distance that still maps to a distinct normalized value.
pub const MAX_MATE_DISTANCE: i32 = 100;

/// Centipawns subtracted from the mate value per move of mate distance.
pub const MATE_DISTANCE_STEP: i32 = 10;

/// Engine score, relative to the side to move at the evaluated position.
///
/// Positive values favor the side to move. `Mate(0)` means the side to
/// move is already checkmated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Score {
    /// Centipawn evaluation (100 = one pawn).
    Centipawns(i32),
    /// Mate in N moves (positive = side to move mates, negative or zero = gets mated).
    Mate(i32),
}

impl Score {
    /// Map the score onto a single centipawn scale.
    ///
    /// Mate in N becomes `mate_value - N * 10` (saturating at N = 100), so
    /// shorter mates rank above longer ones and every mate ranks above every
    /// centipawn score, which is capped just below the longest mate.
    pub fn to_centipawns(self, mate_value: i32) -> i32 {
        let slowest_mate = mate_value - MAX_MATE_DISTANCE * MATE_DISTANCE_STEP;
        match self {
            Score::Centipawns(cp) => cp.clamp(-(slowest_mate - 1), slowest_mate - 1),
            Score::Mate(n) => {
                let value = mate_value - n.abs().min(MAX_MATE_DISTANCE) * MATE_DISTANCE_STEP;
                if n > 0 {
                    value
                } else {
                    -value
                }
            }
        }
    }

    /// The same score seen from the other side.
    pub fn flip(self) -> Self {
        match self {
            Score::Centipawns(cp) => Score::Centipawns(-cp),
            Score::Mate(n) => Score::Mate(-n),
        }
    }

    /// True when the side to move can force mate.
    pub fn is_winning_mate(self) -> bool {
        matches!(self, Score::Mate(n) if n > 0)
    }
}

impl From<uci::Score> for Score {
    fn from(score: uci::Score) -> Self {
        match score {
            uci::Score::Cp(cp) => Score::Centipawns(cp),
            uci::Score::Mate(n) => Score::Mate(n),
        }
    }
}

/// One ranked line of a multi-line search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvLine {
    /// 1-based rank as reported by the engine.
    pub rank: u32,
    pub score: Score,
    pub pv: Vec<String>,
}

/// Result of searching one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Score of the best line.
    pub score: Score,
    /// Principal variation of the best line, in UCI notation.
    pub pv: Vec<String>,
    /// Depth the engine actually reached.
    pub depth: u32,
    pub seldepth: Option<u32>,
    pub nodes: Option<u64>,
    pub time_ms: Option<u64>,
    /// Remaining lines when more than one was requested, best first.
    #[serde(default)]
    pub alternatives: Vec<PvLine>,
}

impl Evaluation {
    /// Evaluation of a position decided on the board, produced without an engine.
    pub fn terminal(score: Score) -> Self {
        Self {
            score,
            pv: Vec::new(),
            depth: 0,
            seldepth: None,
            nodes: None,
            time_ms: None,
            alternatives: Vec::new(),
        }
    }

    /// First move of the principal variation.
    pub fn best_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }
}

/// Anything that can turn an [`AnalysisRequest`] into an [`Evaluation`].
///
/// Implemented by the worker pool and by the cache sitting in front of it,
/// so the pipeline does not care which one it drives.
pub trait PositionEvaluator: Send + Sync {
    fn evaluate(&self, request: AnalysisRequest) -> BoxFuture<'_, Result<Evaluation, EngineError>>;
}
