//! Move verdicts and the analyzed-game record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::evaluation::Evaluation;
use crate::position::{Position, Side};
use crate::summary::{summarize, GameSummary, SummaryConfig};

/// Classification of move quality based on evaluation loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MoveQuality {
    /// Not the engine's first choice, yet as good as it.
    Brilliant,
    /// The engine's best move, or within a hair of it.
    Great,
    /// Good move (small centipawn loss)
    Good,
    /// Inaccuracy (noticeable centipawn loss)
    Inaccuracy,
    /// Mistake (significant centipawn loss)
    Mistake,
    /// Blunder (major centipawn loss, or throwing away the game)
    Blunder,
    /// Book move or the only legal move.
    Forced,
}

impl MoveQuality {
    pub const ALL: [MoveQuality; 7] = [
        MoveQuality::Brilliant,
        MoveQuality::Great,
        MoveQuality::Good,
        MoveQuality::Inaccuracy,
        MoveQuality::Mistake,
        MoveQuality::Blunder,
        MoveQuality::Forced,
    ];

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            MoveQuality::Brilliant => "Brilliant",
            MoveQuality::Great => "Great",
            MoveQuality::Good => "Good",
            MoveQuality::Inaccuracy => "Inaccuracy",
            MoveQuality::Mistake => "Mistake",
            MoveQuality::Blunder => "Blunder",
            MoveQuality::Forced => "Forced",
        }
    }

    /// Annotation glyph written after the move.
    pub fn symbol(self) -> Option<&'static str> {
        match self {
            MoveQuality::Brilliant => Some("!!"),
            MoveQuality::Great => Some("!"),
            MoveQuality::Inaccuracy => Some("?!"),
            MoveQuality::Mistake => Some("?"),
            MoveQuality::Blunder => Some("??"),
            MoveQuality::Good | MoveQuality::Forced => None,
        }
    }

    /// Numeric annotation glyph matching [`symbol`](Self::symbol).
    pub fn nag(self) -> Option<u8> {
        match self {
            MoveQuality::Great => Some(1),
            MoveQuality::Mistake => Some(2),
            MoveQuality::Brilliant => Some(3),
            MoveQuality::Blunder => Some(4),
            MoveQuality::Inaccuracy => Some(6),
            MoveQuality::Good | MoveQuality::Forced => None,
        }
    }

    /// 0 for best-move verdicts up to 4 for a blunder. Forced moves rank 0.
    pub fn severity(self) -> u8 {
        match self {
            MoveQuality::Brilliant | MoveQuality::Great | MoveQuality::Forced => 0,
            MoveQuality::Good => 1,
            MoveQuality::Inaccuracy => 2,
            MoveQuality::Mistake => 3,
            MoveQuality::Blunder => 4,
        }
    }
}

/// Side observations made while classifying a move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictFlags {
    /// A forced mate was on the board and the move let it go.
    pub missed_mate: bool,
    /// A blunder played right after the opponent blundered.
    pub reciprocal_blunder: bool,
}

/// Verdict for one ply plus the centipawn loss that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub quality: MoveQuality,
    /// Centipawns lost against the engine's best line, never negative.
    pub loss: i32,
    #[serde(default)]
    pub flags: VerdictFlags,
}

/// Phase of the game at the moment a move was played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GamePhase {
    Opening,
    Middlegame,
    Endgame,
}

/// What the pipeline learned about one ply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlyOutcome {
    Analyzed {
        evaluation_before: Evaluation,
        evaluation_after: Evaluation,
        verdict: ClassificationVerdict,
    },
    /// The engine could not evaluate one of the two positions.
    Unanalyzed { reason: String },
}

/// One half-move of an analyzed game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlyRecord {
    /// 0-based index into the game's move list.
    pub ply: usize,
    /// The move in UCI notation.
    pub uci: String,
    pub san: String,
    pub mover: Side,
    pub position_before: Position,
    pub position_after: Position,
    pub phase: GamePhase,
    /// Thinking time of the player, when the game recorded clocks.
    pub time_spent: Option<Duration>,
    /// Clock remaining after the move.
    pub clock: Option<Duration>,
    pub outcome: PlyOutcome,
}

impl PlyRecord {
    pub fn verdict(&self) -> Option<&ClassificationVerdict> {
        match &self.outcome {
            PlyOutcome::Analyzed { verdict, .. } => Some(verdict),
            PlyOutcome::Unanalyzed { .. } => None,
        }
    }

    pub fn evaluations(&self) -> Option<(&Evaluation, &Evaluation)> {
        match &self.outcome {
            PlyOutcome::Analyzed { evaluation_before, evaluation_after, .. } => {
                Some((evaluation_before, evaluation_after))
            }
            PlyOutcome::Unanalyzed { .. } => None,
        }
    }
}

/// How far the analysis of a game got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    /// Cancelled part way; records cover a prefix of the game.
    PartiallyCompleted(String),
    /// The engine pool gave out; records cover a prefix of the game.
    Failed(String),
}

impl CompletionStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, CompletionStatus::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            CompletionStatus::Completed => "completed",
            CompletionStatus::PartiallyCompleted(_) => "partially_completed",
            CompletionStatus::Failed(_) => "failed",
        }
    }
}

/// Descriptive fields of a game, carried through analysis unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameInfo {
    pub id: String,
    pub white: String,
    pub black: String,
    pub result: String,
    pub opening: Option<String>,
    pub eco: Option<String>,
    /// Date the game was played, as written in the source.
    pub date: Option<String>,
}

/// Result of analyzing one game. Immutable once sealed.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedGame {
    info: GameInfo,
    start: Position,
    plies: Vec<PlyRecord>,
    summary: GameSummary,
    status: CompletionStatus,
    /// Number of moves in the input, analyzed or not.
    total_plies: usize,
    /// Input moves after the analyzed prefix, in UCI notation.
    remaining: Vec<String>,
}

impl AnalyzedGame {
    /// Freeze the records and compute every aggregate from them.
    pub fn seal(
        info: GameInfo,
        start: Position,
        plies: Vec<PlyRecord>,
        remaining: Vec<String>,
        status: CompletionStatus,
        config: &SummaryConfig,
    ) -> Self {
        let summary = summarize(&info, &plies, config);
        let total_plies = plies.len() + remaining.len();
        Self { info, start, plies, summary, status, total_plies, remaining }
    }

    pub fn info(&self) -> &GameInfo {
        &self.info
    }

    pub fn start(&self) -> &Position {
        &self.start
    }

    pub fn plies(&self) -> &[PlyRecord] {
        &self.plies
    }

    pub fn summary(&self) -> &GameSummary {
        &self.summary
    }

    pub fn status(&self) -> &CompletionStatus {
        &self.status
    }

    pub fn total_plies(&self) -> usize {
        self.total_plies
    }

    /// Moves the analysis never reached, in UCI notation.
    pub fn remaining(&self) -> &[String] {
        &self.remaining
    }

    /// Moves of the analyzed prefix in UCI notation.
    pub fn moves(&self) -> impl Iterator<Item = &str> {
        self.plies.iter().map(|p| p.uci.as_str())
    }
}
